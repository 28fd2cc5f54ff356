use thiserror::Error;

/// Application-wide error types.
///
/// This enum represents all possible errors that can occur during a sync run.
/// It uses the `thiserror` crate for ergonomic error handling and automatic
/// conversion from underlying library errors.
///
/// # Error Conversion
///
/// Errors from the database and serialization layers convert automatically
/// using the `#[from]` attribute:
/// - `sqlx::Error` → `AppError::DatabaseError`
/// - `serde_json::Error` → `AppError::SerializationError`
///
/// There is no recovery anywhere in the pipeline: every error propagates up
/// to the binary's `main` and terminates the run with a non-zero status. The
/// next scheduled run simply retries the full synchronization from scratch.
#[derive(Error, Debug)]
pub enum AppError {
    /// Database operation failed.
    ///
    /// Wraps all errors from SQLx, including connection failures, DDL
    /// errors, and constraint violations (e.g. a deal referencing a person
    /// row that was never written).
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// HTTP client request failed.
    #[error("API client error: {0}")]
    ClientError(String),

    /// The Bitrix REST API answered with an error payload.
    #[error("Bitrix error from {method}: {message}")]
    RemoteError { method: String, message: String },

    /// A list method returned something other than a list.
    ///
    /// Bitrix responds to some methods with a bare object or an error
    /// envelope; coercing those into an empty collection would silently
    /// drop data, so the fetch aborts instead.
    #[error("Unexpected response shape from {method}: expected a list")]
    UnexpectedShape { method: String },

    /// A remote record is missing a required field or carries a value that
    /// cannot be converted to the typed model.
    #[error("Malformed {entity} record: {source}")]
    MalformedRecord {
        entity: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The configured webhook URL is malformed.
    #[error("Invalid Bitrix webhook URL: {0}")]
    InvalidWebhookUrl(String),

    /// Generic application error for cases not covered by specific variants.
    ///
    /// Use this sparingly - prefer creating specific error variants
    /// for better error handling and debugging.
    #[error("Error: {0}")]
    Generic(String),
}

impl AppError {
    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::DatabaseError(e) => {
                if e.to_string().contains("connection") {
                    "Cannot connect to database. Is PostgreSQL running?\n   Check the POSTGRES_* environment variables.".to_string()
                } else {
                    format!("Database error: {}", e)
                }
            }
            AppError::ClientError(msg) => {
                if msg.contains("timeout") || msg.contains("timed out") {
                    "Request timed out. The Bitrix portal may be slow or unreachable.\n   Re-run the sync later.".to_string()
                } else if msg.contains("connect") {
                    format!("Cannot connect to Bitrix: {}\n   Check your internet connection and the webhook URL.", msg)
                } else {
                    format!("API error: {}", msg)
                }
            }
            AppError::InvalidWebhookUrl(url) => {
                format!(
                    "Invalid webhook URL: {}\n   Example: https://portal.bitrix24.com/rest/1/abc123/",
                    url
                )
            }
            _ => self.to_string(),
        }
    }
}
