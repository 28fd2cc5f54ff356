//! b24sync Core - Domain types, error handling, and configuration.

pub mod config;
pub mod error;
pub mod models;
pub mod sync;

pub use config::{DbConfig, HttpConfig};
pub use error::AppError;
pub use models::{Deal, MirrorStats, Source, Stage, User};
pub use sync::SyncReport;
