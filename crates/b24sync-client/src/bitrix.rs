use b24sync_core::config::HttpConfig;
use b24sync_core::error::AppError;
use b24sync_core::models::{Deal, Source, Stage, User};
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

/// Marker value Bitrix uses on `CLOSED` to flag a finished deal. Any other
/// value, including a missing field, means the deal is still open.
const CLOSED_MARKER: &str = "Y";

/// Generic envelope for Bitrix REST responses.
///
/// Bitrix REST reference: <https://dev.1c-bitrix.ru/rest_help/>
///
/// List methods page their output: `result` holds up to 50 records and
/// `next` carries the offset of the following page while there is one.
/// Failures come back as `{"error": ..., "error_description": ...}`.
#[derive(Deserialize, Debug)]
struct BitrixPage {
    result: Option<Value>,
    next: Option<u64>,
    error: Option<Value>,
    error_description: Option<String>,
}

/// DTO for one record of `crm.status.list`.
///
/// The same method serves both pipeline stages and lead sources; the
/// caller distinguishes them with the `ENTITY_ID` filter.
#[derive(Deserialize, Debug, Clone)]
struct RawStatus {
    #[serde(rename = "NAME")]
    name: String,
    #[serde(rename = "STATUS_ID")]
    status_id: String,
}

/// DTO for one record of `user.get`.
#[derive(Deserialize, Debug, Clone)]
struct RawUser {
    #[serde(rename = "ID", deserialize_with = "int_from_bitrix")]
    id: i32,
    #[serde(rename = "NAME")]
    name: String,
    #[serde(rename = "LAST_NAME")]
    last_name: String,
}

/// DTO for one record of `crm.deal.list`.
///
/// Bitrix serializes numbers as decimal strings and dates as ISO 8601 with
/// a portal-local offset; all coercion to the typed model happens here, at
/// the fetch boundary, so no untyped map ever reaches the write layer.
#[derive(Deserialize, Debug, Clone)]
struct RawDeal {
    #[serde(rename = "ID", deserialize_with = "int_from_bitrix")]
    id: i32,
    #[serde(rename = "TITLE")]
    name: String,
    #[serde(rename = "STAGE_ID", default)]
    stage_id: Option<String>,
    #[serde(rename = "OPPORTUNITY", deserialize_with = "float_from_bitrix")]
    opportunity: f64,
    #[serde(rename = "BEGINDATE")]
    begin_date: DateTime<Utc>,
    #[serde(rename = "CLOSEDATE")]
    close_date: DateTime<Utc>,
    #[serde(rename = "CREATED_BY_ID", deserialize_with = "int_from_bitrix")]
    created_by: i32,
    #[serde(rename = "CLOSED", default)]
    closed: Option<String>,
    #[serde(rename = "SOURCE_ID", default)]
    source_id: Option<String>,
}

impl From<RawStatus> for Stage {
    fn from(raw: RawStatus) -> Self {
        Stage {
            name: raw.name,
            status_id: raw.status_id,
        }
    }
}

impl From<RawStatus> for Source {
    fn from(raw: RawStatus) -> Self {
        Source {
            name: raw.name,
            status_id: raw.status_id,
        }
    }
}

impl From<RawUser> for User {
    fn from(raw: RawUser) -> Self {
        User {
            id: raw.id,
            name: raw.name,
            last_name: raw.last_name,
        }
    }
}

impl From<RawDeal> for Deal {
    fn from(raw: RawDeal) -> Self {
        Deal {
            id: raw.id,
            name: raw.name,
            stage_id: raw.stage_id,
            opportunity: raw.opportunity,
            begin_date: raw.begin_date,
            close_date: raw.close_date,
            created_by: raw.created_by,
            is_closed: raw.closed.as_deref() == Some(CLOSED_MARKER),
            source_id: raw.source_id,
        }
    }
}

/// Accepts an integer either as a JSON number or as the decimal string
/// Bitrix usually sends.
fn int_from_bitrix<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => i32::try_from(n).map_err(serde::de::Error::custom),
        Raw::Str(s) => s.trim().parse::<i32>().map_err(serde::de::Error::custom),
    }
}

/// Accepts a decimal amount either as a JSON number or as a string.
fn float_from_bitrix<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.trim().parse::<f64>().map_err(serde::de::Error::custom),
    }
}

/// HTTP client for a Bitrix24 inbound webhook.
///
/// A webhook URL bakes the portal host, user id, and token into the path
/// (`https://portal.bitrix24.com/rest/1/abc123/`); REST methods are joined
/// onto it. The client fully materializes paginated collections before
/// returning, so callers never see partial pages.
///
/// # Examples
///
/// ```no_run
/// use b24sync_client::BitrixClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = BitrixClient::new("https://portal.bitrix24.com/rest/1/abc123/")?;
/// let deals = client.list_deals().await?;
/// println!("Found {} deals", deals.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct BitrixClient {
    client: Client,
    webhook: Url,
}

impl BitrixClient {
    /// Creates a client for the given webhook URL.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidWebhookUrl` if the URL is malformed.
    /// Returns `AppError::ClientError` if the HTTP client cannot be built.
    pub fn new(webhook_str: &str) -> Result<Self, AppError> {
        // Url::join treats a base without a trailing slash as a file and
        // would drop the token segment, so normalize first.
        let normalized = if webhook_str.ends_with('/') {
            webhook_str.to_string()
        } else {
            format!("{}/", webhook_str)
        };
        let webhook = Url::parse(&normalized)
            .map_err(|_| AppError::InvalidWebhookUrl(webhook_str.to_string()))?;

        let http = HttpConfig::default();
        let client = Client::builder()
            .user_agent("b24sync/0.1 (crm-mirror-bot)")
            .timeout(http.timeout)
            .build()
            .map_err(|e| AppError::ClientError(e.to_string()))?;

        Ok(Self { client, webhook })
    }

    /// Fetches all deal-pipeline stages (`crm.status.list` filtered to
    /// `DEAL_STAGE`).
    pub async fn list_stages(&self) -> Result<Vec<Stage>, AppError> {
        let raw = self
            .get_all(
                "crm.status.list",
                &["NAME", "STATUS_ID"],
                Some(json!({ "ENTITY_ID": "DEAL_STAGE" })),
            )
            .await?;
        map_records::<RawStatus>(raw, "stage").map(into_models)
    }

    /// Fetches all lead sources (`crm.status.list` filtered to `SOURCE`).
    pub async fn list_sources(&self) -> Result<Vec<Source>, AppError> {
        let raw = self
            .get_all(
                "crm.status.list",
                &["NAME", "STATUS_ID"],
                Some(json!({ "ENTITY_ID": "SOURCE" })),
            )
            .await?;
        map_records::<RawStatus>(raw, "source").map(into_models)
    }

    /// Fetches all CRM users (`user.get`).
    pub async fn list_users(&self) -> Result<Vec<User>, AppError> {
        let raw = self
            .get_all("user.get", &["ID", "NAME", "LAST_NAME"], None)
            .await?;
        map_records::<RawUser>(raw, "user").map(into_models)
    }

    /// Fetches all deals (`crm.deal.list`).
    pub async fn list_deals(&self) -> Result<Vec<Deal>, AppError> {
        let raw = self
            .get_all(
                "crm.deal.list",
                &[
                    "ID",
                    "TITLE",
                    "STAGE_ID",
                    "OPPORTUNITY",
                    "BEGINDATE",
                    "CLOSEDATE",
                    "CREATED_BY_ID",
                    "CLOSED",
                    "SOURCE_ID",
                ],
                None,
            )
            .await?;
        map_records::<RawDeal>(raw, "deal").map(into_models)
    }

    /// Requests every page of a list method and concatenates the results.
    ///
    /// There is deliberately no retry here: a nightly batch job re-runs in
    /// full on the next schedule, so the first failure aborts the sync.
    async fn get_all(
        &self,
        method: &str,
        select: &[&str],
        filter: Option<Value>,
    ) -> Result<Vec<Value>, AppError> {
        let url = self
            .webhook
            .join(method)
            .map_err(|e| AppError::Generic(e.to_string()))?;

        let mut items = Vec::new();
        let mut start = 0u64;
        loop {
            let mut body = json!({ "select": select, "start": start });
            if let Some(filter) = &filter {
                body["filter"] = filter.clone();
            }

            let resp = self
                .client
                .post(url.clone())
                .json(&body)
                .send()
                .await
                .map_err(|e| AppError::ClientError(e.to_string()))?;

            if !resp.status().is_success() {
                return Err(AppError::ClientError(format!(
                    "HTTP {} from {}",
                    resp.status().as_u16(),
                    method
                )));
            }

            let page: BitrixPage = resp
                .json()
                .await
                .map_err(|e| AppError::ClientError(e.to_string()))?;

            match append_page(&mut items, page, method)? {
                Some(next) => start = next,
                None => break,
            }
        }

        Ok(items)
    }
}

/// Validates one response page and appends its records to the accumulator.
///
/// Returns the offset of the next page, or `None` on the last one. A page
/// whose `result` is missing or not a list aborts the fetch: Bitrix answers
/// some methods with a bare object, and coercing that into an empty
/// collection would silently drop data.
fn append_page(
    items: &mut Vec<Value>,
    page: BitrixPage,
    method: &str,
) -> Result<Option<u64>, AppError> {
    if let Some(error) = page.error {
        let message = page
            .error_description
            .unwrap_or_else(|| error.to_string());
        return Err(AppError::RemoteError {
            method: method.to_string(),
            message,
        });
    }

    let result = page.result.ok_or_else(|| AppError::UnexpectedShape {
        method: method.to_string(),
    })?;
    let Value::Array(batch) = result else {
        return Err(AppError::UnexpectedShape {
            method: method.to_string(),
        });
    };

    items.extend(batch);
    Ok(page.next)
}

/// Converts every raw record into its DTO, aborting on the first malformed
/// one. No skip-bad-record lenience: a half-synced mirror is worse than a
/// failed run that gets retried by the next schedule.
fn map_records<T: DeserializeOwned>(raw: Vec<Value>, entity: &'static str) -> Result<Vec<T>, AppError> {
    raw.into_iter()
        .map(|item| {
            serde_json::from_value(item).map_err(|e| AppError::MalformedRecord { entity, source: e })
        })
        .collect()
}

fn into_models<R, T: From<R>>(raw: Vec<R>) -> Vec<T> {
    raw.into_iter().map(T::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn page(body: &str) -> BitrixPage {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_webhook_url_gets_trailing_slash() {
        let client = BitrixClient::new("https://portal.bitrix24.com/rest/1/abc123").unwrap();
        assert!(client.webhook.as_str().ends_with("/abc123/"));
        // join must preserve the token segment
        let url = client.webhook.join("crm.deal.list").unwrap();
        assert_eq!(
            url.as_str(),
            "https://portal.bitrix24.com/rest/1/abc123/crm.deal.list"
        );
    }

    #[test]
    fn test_invalid_webhook_url() {
        let err = BitrixClient::new("not a url").unwrap_err();
        assert!(matches!(err, AppError::InvalidWebhookUrl(_)));
    }

    #[test]
    fn test_append_page_accumulates_and_follows_next() {
        let mut items = Vec::new();

        let next = append_page(
            &mut items,
            page(r#"{"result": [{"ID": "1"}, {"ID": "2"}], "next": 50, "total": 52}"#),
            "crm.deal.list",
        )
        .unwrap();
        assert_eq!(next, Some(50));

        let next = append_page(
            &mut items,
            page(r#"{"result": [{"ID": "3"}], "total": 52}"#),
            "crm.deal.list",
        )
        .unwrap();
        assert_eq!(next, None);
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn test_append_page_rejects_non_list_result() {
        let mut items = Vec::new();
        let err = append_page(
            &mut items,
            page(r#"{"result": {"ID": "1"}}"#),
            "user.get",
        )
        .unwrap_err();
        assert!(matches!(err, AppError::UnexpectedShape { .. }));
        assert!(items.is_empty());
    }

    #[test]
    fn test_append_page_rejects_missing_result() {
        let mut items = Vec::new();
        let err = append_page(&mut items, page(r#"{"total": 0}"#), "user.get").unwrap_err();
        assert!(matches!(err, AppError::UnexpectedShape { .. }));
    }

    #[test]
    fn test_append_page_surfaces_error_payload() {
        let mut items = Vec::new();
        let err = append_page(
            &mut items,
            page(r#"{"error": "expired_token", "error_description": "The access token provided has expired"}"#),
            "crm.status.list",
        )
        .unwrap_err();
        match err {
            AppError::RemoteError { method, message } => {
                assert_eq!(method, "crm.status.list");
                assert_eq!(message, "The access token provided has expired");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_status_maps_to_stage_and_source() {
        let raw: RawStatus =
            serde_json::from_str(r#"{"NAME": "Negotiation", "STATUS_ID": "NEGOTIATION"}"#).unwrap();
        let stage = Stage::from(raw.clone());
        assert_eq!(stage.name, "Negotiation");
        assert_eq!(stage.status_id, "NEGOTIATION");

        let source = Source::from(raw);
        assert_eq!(source.status_id, "NEGOTIATION");
    }

    #[test]
    fn test_user_id_coerced_from_string() {
        let raw: RawUser = serde_json::from_str(
            r#"{"ID": "7", "NAME": "Anna", "LAST_NAME": "Kern", "EMAIL": "a@k.ru"}"#,
        )
        .unwrap();
        let user = User::from(raw);
        assert_eq!(user.id, 7);
        assert_eq!(user.last_name, "Kern");
    }

    #[test]
    fn test_deal_coercions() {
        let raw: RawDeal = serde_json::from_str(
            r#"{
                "ID": "10",
                "TITLE": "Big contract",
                "STAGE_ID": "NEW",
                "OPPORTUNITY": "5000.50",
                "BEGINDATE": "2024-03-01T10:00:00+03:00",
                "CLOSEDATE": "2024-04-01T10:00:00+03:00",
                "CREATED_BY_ID": "1",
                "CLOSED": "Y",
                "SOURCE_ID": "WEB"
            }"#,
        )
        .unwrap();
        let deal = Deal::from(raw);
        assert_eq!(deal.id, 10);
        assert_eq!(deal.name, "Big contract");
        assert_eq!(deal.opportunity, 5000.50);
        assert_eq!(deal.created_by, 1);
        assert!(deal.is_closed);
        assert_eq!(deal.source_id.as_deref(), Some("WEB"));
        // +03:00 offset normalized to UTC
        assert_eq!(
            deal.begin_date,
            Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_deal_numeric_fields_accept_json_numbers() {
        let raw: RawDeal = serde_json::from_str(
            r#"{
                "ID": 11,
                "TITLE": "Small contract",
                "OPPORTUNITY": 100,
                "BEGINDATE": "2024-03-01T10:00:00+00:00",
                "CLOSEDATE": "2024-04-01T10:00:00+00:00",
                "CREATED_BY_ID": 2,
                "CLOSED": "N",
                "SOURCE_ID": null
            }"#,
        )
        .unwrap();
        let deal = Deal::from(raw);
        assert_eq!(deal.id, 11);
        assert_eq!(deal.opportunity, 100.0);
        assert!(!deal.is_closed);
        assert_eq!(deal.source_id, None);
        assert_eq!(deal.stage_id, None);
    }

    #[test]
    fn test_closed_flag_is_strict_equality() {
        for (closed, expected) in [
            (r#""Y""#, true),
            (r#""N""#, false),
            (r#""y""#, false),
            (r#""""#, false),
            ("null", false),
        ] {
            let body = format!(
                r#"{{
                    "ID": "1", "TITLE": "t", "OPPORTUNITY": "0",
                    "BEGINDATE": "2024-01-01T00:00:00+00:00",
                    "CLOSEDATE": "2024-01-02T00:00:00+00:00",
                    "CREATED_BY_ID": "1", "CLOSED": {closed}
                }}"#
            );
            let raw: RawDeal = serde_json::from_str(&body).unwrap();
            assert_eq!(Deal::from(raw).is_closed, expected, "CLOSED={closed}");
        }
    }

    #[test]
    fn test_closed_flag_missing_means_open() {
        let raw: RawDeal = serde_json::from_str(
            r#"{
                "ID": "1", "TITLE": "t", "OPPORTUNITY": "0",
                "BEGINDATE": "2024-01-01T00:00:00+00:00",
                "CLOSEDATE": "2024-01-02T00:00:00+00:00",
                "CREATED_BY_ID": "1"
            }"#,
        )
        .unwrap();
        assert!(!Deal::from(raw).is_closed);
    }

    #[test]
    fn test_map_records_aborts_on_missing_field() {
        // second record has no TITLE
        let raw = vec![
            serde_json::json!({
                "ID": "1", "TITLE": "ok", "OPPORTUNITY": "0",
                "BEGINDATE": "2024-01-01T00:00:00+00:00",
                "CLOSEDATE": "2024-01-02T00:00:00+00:00",
                "CREATED_BY_ID": "1"
            }),
            serde_json::json!({
                "ID": "2", "OPPORTUNITY": "0",
                "BEGINDATE": "2024-01-01T00:00:00+00:00",
                "CLOSEDATE": "2024-01-02T00:00:00+00:00",
                "CREATED_BY_ID": "1"
            }),
        ];
        let err = map_records::<RawDeal>(raw, "deal").unwrap_err();
        assert!(matches!(err, AppError::MalformedRecord { entity: "deal", .. }));
    }

    #[test]
    fn test_map_records_aborts_on_malformed_value() {
        let raw = vec![serde_json::json!({
            "ID": "not-a-number", "TITLE": "t", "OPPORTUNITY": "0",
            "BEGINDATE": "2024-01-01T00:00:00+00:00",
            "CLOSEDATE": "2024-01-02T00:00:00+00:00",
            "CREATED_BY_ID": "1"
        })];
        assert!(map_records::<RawDeal>(raw, "deal").is_err());
    }

    // Mirror of the end-to-end scenario: 2 stages, 1 source, 2 users,
    // 3 deals (one closed, one without a source). Exercises the full
    // fetch-boundary mapping without a live portal.
    #[test]
    fn test_full_fixture_mapping() {
        let stages = map_records::<RawStatus>(
            serde_json::from_str(
                r#"[
                    {"NAME": "New", "STATUS_ID": "NEW"},
                    {"NAME": "Won", "STATUS_ID": "WON"}
                ]"#,
            )
            .unwrap(),
            "stage",
        )
        .map(into_models::<_, Stage>)
        .unwrap();
        assert_eq!(stages.len(), 2);

        let sources = map_records::<RawStatus>(
            serde_json::from_str(r#"[{"NAME": "Web", "STATUS_ID": "WEB"}]"#).unwrap(),
            "source",
        )
        .map(into_models::<_, Source>)
        .unwrap();
        assert_eq!(sources.len(), 1);

        let users = map_records::<RawUser>(
            serde_json::from_str(
                r#"[
                    {"ID": "1", "NAME": "Anna", "LAST_NAME": "Kern"},
                    {"ID": "2", "NAME": "Boris", "LAST_NAME": "Godunov"}
                ]"#,
            )
            .unwrap(),
            "user",
        )
        .map(into_models::<_, User>)
        .unwrap();
        assert_eq!(users.len(), 2);

        let deals = map_records::<RawDeal>(
            serde_json::from_str(
                r#"[
                    {"ID": "10", "TITLE": "A", "STAGE_ID": "NEW", "OPPORTUNITY": "100",
                     "BEGINDATE": "2024-01-01T00:00:00+00:00", "CLOSEDATE": "2024-02-01T00:00:00+00:00",
                     "CREATED_BY_ID": "1", "CLOSED": "N", "SOURCE_ID": "WEB"},
                    {"ID": "11", "TITLE": "B", "STAGE_ID": "WON", "OPPORTUNITY": "200",
                     "BEGINDATE": "2024-01-01T00:00:00+00:00", "CLOSEDATE": "2024-02-01T00:00:00+00:00",
                     "CREATED_BY_ID": "1", "CLOSED": "Y", "SOURCE_ID": "WEB"},
                    {"ID": "12", "TITLE": "C", "STAGE_ID": "NEW", "OPPORTUNITY": "300",
                     "BEGINDATE": "2024-01-01T00:00:00+00:00", "CLOSEDATE": "2024-02-01T00:00:00+00:00",
                     "CREATED_BY_ID": "2", "CLOSED": "N", "SOURCE_ID": null}
                ]"#,
            )
            .unwrap(),
            "deal",
        )
        .map(into_models::<_, Deal>)
        .unwrap();
        assert_eq!(deals.len(), 3);
        assert_eq!(deals.iter().filter(|d| d.is_closed).count(), 1);
        assert_eq!(deals.iter().filter(|d| d.source_id.is_none()).count(), 1);
        assert!(deals.iter().all(|d| d.created_by == 1 || d.created_by == 2));
    }
}
