use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::error::AppResult;

/// Build the connection pool and bring the schema up to date.
pub async fn init_pool(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await?;

    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}

/// Initialize logging and tracing
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,metacore_airdrop=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
