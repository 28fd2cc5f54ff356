use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use futures::try_join;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use b24sync_cli::Config;
use b24sync_client::BitrixClient;
use b24sync_core::{DbConfig, SyncReport};
use b24sync_db::CrmRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Setup logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    // Parse configuration from flags and environment
    let config = Config::parse();

    // Database connection
    info!("Connecting to Postgres...");
    let db = DbConfig::default();
    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .connect_with(config.pg_options())
        .await
        .context("Failed to connect to database")?;
    let repo = CrmRepository::new(pool);

    // Schema is a precondition for every write below
    info!("Running migrations...");
    repo.migrate().await.context("Failed to run migrations")?;

    let bitrix = BitrixClient::new(&config.webhook).context("Invalid Bitrix webhook URL")?;

    // The four fetches are independent; fan them out and await jointly.
    // Everything is fully materialized before the first write.
    info!("Getting data from Bitrix...");
    let (stages, sources, users, deals) = try_join!(
        bitrix.list_stages(),
        bitrix.list_sources(),
        bitrix.list_users(),
        bitrix.list_deals(),
    )?;
    let report = SyncReport::new(stages.len(), sources.len(), users.len(), deals.len());
    info!("Fetched {}", report.summary());

    // Users before deals: deal.created_by references person.id
    info!("Inserting Bitrix data to Postgres...");
    repo.upsert_stages(&stages).await?;
    repo.upsert_sources(&sources).await?;
    repo.upsert_users(&users).await?;
    repo.upsert_deals(&deals).await?;

    let stats = repo.stats().await?;
    info!(
        "Done: synced {} records; mirror now holds {} stages, {} sources, {} persons, {} deals",
        report.total(),
        stats.stages,
        stats.sources,
        stats.persons,
        stats.deals
    );

    Ok(())
}
