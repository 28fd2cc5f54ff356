//! CRM mirror repository for PostgreSQL.
//!
//! The four tables are monotonically growing mirrors of the remote CRM:
//! rows are inserted or updated in place, never deleted. All statements
//! are runtime-bound so the crate builds without a live database.

use b24sync_core::error::AppError;
use b24sync_core::models::{Deal, MirrorStats, Source, Stage, User};
use sqlx::{PgPool, Pool, Postgres};

/// Idempotent DDL, executed in order on every run. `deal` comes last
/// since it references `person`.
const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS stage (
        name VARCHAR(255) NOT NULL,
        status_id VARCHAR(255) PRIMARY KEY
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS source (
        name VARCHAR(255) NOT NULL,
        status_id VARCHAR(255) PRIMARY KEY
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS person (
        id INT PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        last_name VARCHAR(255) NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS deal (
        id INT PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        stage_id VARCHAR(255),
        opportunity DOUBLE PRECISION NOT NULL,
        begin_date TIMESTAMPTZ NOT NULL,
        close_date TIMESTAMPTZ NOT NULL,
        created_by INT REFERENCES person(id),
        is_closed BOOLEAN NOT NULL,
        source_id VARCHAR(255)
    )
    "#,
];

const UPSERT_STAGE: &str = r#"
    INSERT INTO stage (name, status_id)
    VALUES ($1, $2)
    ON CONFLICT (status_id)
    DO UPDATE SET name = EXCLUDED.name
"#;

const UPSERT_SOURCE: &str = r#"
    INSERT INTO source (name, status_id)
    VALUES ($1, $2)
    ON CONFLICT (status_id)
    DO UPDATE SET name = EXCLUDED.name
"#;

const UPSERT_PERSON: &str = r#"
    INSERT INTO person (id, name, last_name)
    VALUES ($1, $2, $3)
    ON CONFLICT (id)
    DO UPDATE SET
        name = EXCLUDED.name,
        last_name = EXCLUDED.last_name
"#;

const UPSERT_DEAL: &str = r#"
    INSERT INTO deal (
        id, name, stage_id, opportunity, begin_date,
        close_date, created_by, is_closed, source_id
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
    ON CONFLICT (id)
    DO UPDATE SET
        name = EXCLUDED.name,
        stage_id = EXCLUDED.stage_id,
        opportunity = EXCLUDED.opportunity,
        begin_date = EXCLUDED.begin_date,
        close_date = EXCLUDED.close_date,
        created_by = EXCLUDED.created_by,
        is_closed = EXCLUDED.is_closed,
        source_id = EXCLUDED.source_id
"#;

/// Repository over the four CRM mirror tables.
///
/// # Examples
///
/// ```no_run
/// use sqlx::postgres::PgPoolOptions;
/// use b24sync_db::CrmRepository;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = PgPoolOptions::new()
///     .max_connections(5)
///     .connect("postgresql://localhost/crm")
///     .await?;
///
/// let repo = CrmRepository::new(pool);
/// repo.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CrmRepository {
    pool: Pool<Postgres>,
}

impl CrmRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Ensures the four mirror tables exist. Safe to run on every start;
    /// any DDL failure is fatal since the schema is a precondition for
    /// everything downstream.
    pub async fn migrate(&self) -> Result<(), AppError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?;
        }
        Ok(())
    }

    /// Upserts pipeline stages keyed by `status_id`.
    pub async fn upsert_stages(&self, stages: &[Stage]) -> Result<(), AppError> {
        for stage in stages {
            sqlx::query(UPSERT_STAGE)
                .bind(&stage.name)
                .bind(&stage.status_id)
                .execute(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?;
        }
        Ok(())
    }

    /// Upserts lead sources keyed by `status_id`.
    pub async fn upsert_sources(&self, sources: &[Source]) -> Result<(), AppError> {
        for source in sources {
            sqlx::query(UPSERT_SOURCE)
                .bind(&source.name)
                .bind(&source.status_id)
                .execute(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?;
        }
        Ok(())
    }

    /// Upserts users into `person`, keyed by `id`.
    ///
    /// Must complete before [`upsert_deals`](Self::upsert_deals) within a
    /// run: `deal.created_by` references `person.id`.
    pub async fn upsert_users(&self, users: &[User]) -> Result<(), AppError> {
        for user in users {
            sqlx::query(UPSERT_PERSON)
                .bind(user.id)
                .bind(&user.name)
                .bind(&user.last_name)
                .execute(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?;
        }
        Ok(())
    }

    /// Upserts deals keyed by `id`. A deal referencing a person row that
    /// was never written fails the run with a constraint violation.
    pub async fn upsert_deals(&self, deals: &[Deal]) -> Result<(), AppError> {
        for deal in deals {
            sqlx::query(UPSERT_DEAL)
                .bind(deal.id)
                .bind(&deal.name)
                .bind(&deal.stage_id)
                .bind(deal.opportunity)
                .bind(deal.begin_date)
                .bind(deal.close_date)
                .bind(deal.created_by)
                .bind(deal.is_closed)
                .bind(&deal.source_id)
                .execute(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?;
        }
        Ok(())
    }

    /// Row counts over the four mirror tables, for the end-of-run summary.
    pub async fn stats(&self) -> Result<MirrorStats, AppError> {
        let row: (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM stage),
                (SELECT COUNT(*) FROM source),
                (SELECT COUNT(*) FROM person),
                (SELECT COUNT(*) FROM deal)
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(MirrorStats {
            stages: row.0,
            sources: row.1,
            persons: row.2,
            deals: row.3,
        })
    }
}
