//! Creates the default admin and categories. Run once after the first migration.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sparepartshub::seed::{self, ADMIN_EMAIL, DEFAULT_ADMIN_PASSWORD};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set in environment")?;
    let password = std::env::var("SEED_ADMIN_PASSWORD").ok().filter(|p| !p.is_empty());
    if password.is_none() {
        tracing::warn!("SEED_ADMIN_PASSWORD not set, using the default admin password");
    }

    let db = PgPoolOptions::new().max_connections(2).connect(&database_url).await?;
    sqlx::migrate!("./migrations").run(&db).await?;
    let report = seed::run(&db, password.as_deref().unwrap_or(DEFAULT_ADMIN_PASSWORD)).await?;

    if report.admin_created {
        tracing::info!("✅ Admin created: {}", ADMIN_EMAIL);
    } else {
        tracing::info!("Admin {} already exists", ADMIN_EMAIL);
    }
    tracing::info!("✅ {} categories created", report.categories_created);
    Ok(())
}
