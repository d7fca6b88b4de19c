use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tripline_api::{app, AppState, AuthConfig};
use tripline_core::payment::PaymentGateway;
use tripline_order::BookingStore;
use tripline_store::{Config, DbClient, PayosGateway, PgBookingStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tripline_api=debug,tripline_order=debug,tripline::events=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Tripline API on port {}", config.server.port);

    let db = DbClient::new(&config.database)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    let store: Arc<dyn BookingStore> = Arc::new(PgBookingStore::new(db.pool.clone()));
    let gateway: Arc<dyn PaymentGateway> =
        Arc::new(PayosGateway::new(&config.gateway).context("Failed to build gateway client")?);

    let app_state = AppState::new(
        store,
        gateway,
        config.gateway.link_settings(),
        config.refund_policy.clone(),
        AuthConfig { secret: config.auth.jwt_secret.clone() },
    );

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
