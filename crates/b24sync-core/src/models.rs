use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::prelude::FromRow;

/// A named deal-pipeline stage. Row of the `stage` table, keyed by
/// `status_id`.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Stage {
    pub name: String,
    pub status_id: String,
}

/// A named lead-origin category. Row of the `source` table, keyed by
/// `status_id` (independent namespace from `stage.status_id`).
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Source {
    pub name: String,
    pub status_id: String,
}

/// A CRM operator. Row of the `person` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub last_name: String,
}

/// A deal. Row of the `deal` table.
///
/// `created_by` is a hard foreign key to `person.id`, so person rows must
/// be written before deal rows within a run. `stage_id` and `source_id`
/// are loose references to `stage.status_id` / `source.status_id`: the
/// schema does not enforce them, remote data may drift.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Deal {
    pub id: i32,
    pub name: String,
    pub stage_id: Option<String>,
    pub opportunity: f64,
    pub begin_date: DateTime<Utc>,
    pub close_date: DateTime<Utc>,
    pub created_by: i32,
    pub is_closed: bool,
    pub source_id: Option<String>,
}

/// Aggregate row counts over the four mirror tables.
#[derive(Debug, Clone, Serialize)]
pub struct MirrorStats {
    pub stages: i64,
    pub sources: i64,
    pub persons: i64,
    pub deals: i64,
}
