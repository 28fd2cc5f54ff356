use clap::Parser;
use sqlx::postgres::PgConnectOptions;

/// Runtime configuration, sourced from the environment (flags are
/// accepted too, but a cron deployment sets only the variables).
#[derive(Parser, Debug)]
#[command(name = "b24sync")]
#[command(version, about = "One-shot Bitrix24 CRM to PostgreSQL mirror sync")]
#[command(after_help = "Environment:
  BITRIX_WEBHOOK     inbound webhook URL, e.g. https://portal.bitrix24.com/rest/1/abc123/
  POSTGRES_USER      database user
  POSTGRES_PASSWORD  database password
  POSTGRES_DATABASE  database name
  POSTGRES_HOST      database host
  POSTGRES_PORT      database port (default 5432)")]
pub struct Config {
    /// Bitrix24 inbound webhook URL
    #[arg(long, env = "BITRIX_WEBHOOK")]
    pub webhook: String,

    /// PostgreSQL user
    #[arg(long, env = "POSTGRES_USER")]
    pub postgres_user: String,

    /// PostgreSQL password
    #[arg(long, env = "POSTGRES_PASSWORD")]
    pub postgres_password: String,

    /// PostgreSQL database name
    #[arg(long, env = "POSTGRES_DATABASE")]
    pub postgres_database: String,

    /// PostgreSQL host
    #[arg(long, env = "POSTGRES_HOST")]
    pub postgres_host: String,

    /// PostgreSQL port
    #[arg(long, env = "POSTGRES_PORT", default_value = "5432")]
    pub postgres_port: u16,
}

impl Config {
    /// Connection options assembled from the five discrete parameters.
    pub fn pg_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.postgres_host)
            .port(self.postgres_port)
            .username(&self.postgres_user)
            .password(&self.postgres_password)
            .database(&self.postgres_database)
    }
}
