use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use tenancy_core::server::{app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, REDIS_URL, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = tenancy_core::config::config();
    tracing::info!(
        production = tenancy_core::is_production!(),
        "Starting tenancy server in {:?} mode",
        config.environment
    );

    let state = Arc::new(AppState::connect(config).await?);
    let pools = state.pools.clone();
    let maintenance = state.spawn_maintenance(config.cache.sweep_interval());

    // Allow tests or deployments to override port via env
    let port = std::env::var("TENANCY_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(3000);

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    maintenance.abort();
    if let Some(pools) = pools {
        pools.close_all().await;
    }
    Ok(())
}
