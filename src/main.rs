//! SparePartsHub - multi-vendor spare parts marketplace API

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sparepartshub::api::{self, AppState};
use sparepartshub::auth::TokenService;
use sparepartshub::chat::Classifier;
use sparepartshub::config::Config;
use sparepartshub::notify::Notifier;
use sparepartshub::payment::{PaymentGateway, RazorpayGateway};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,tower_http=info,sqlx=warn".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let db = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("connecting to PostgreSQL")?;
    sqlx::migrate!("./migrations").run(&db).await?;
    tracing::info!("✅ PostgreSQL connected, migrations applied");

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => {
                tracing::info!(%url, "📡 NATS connected");
                Some(client)
            }
            Err(e) => {
                tracing::warn!(%url, "NATS unavailable, emails will be logged instead: {}", e);
                None
            }
        },
        None => None,
    };

    let payments: Option<Arc<dyn PaymentGateway>> = match config.razorpay.clone() {
        Some(razorpay) => Some(Arc::new(RazorpayGateway::new(razorpay)?)),
        None => {
            tracing::warn!("Razorpay keys not set, online payments disabled");
            None
        }
    };

    let state = AppState {
        db,
        tokens: TokenService::new(&config),
        payments,
        notifier: Notifier::new(nats, config.mail_from.clone()),
        chatbot: Classifier::new()?,
        config: Arc::new(config),
    };
    let port = state.config.port;
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("🚀 SparePartsHub API listening on 0.0.0.0:{}", port);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
