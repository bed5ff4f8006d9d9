use std::sync::Arc;

use campusmarket::{
    AppState, app,
    config::Config,
    db,
    rates::{HttpRateSource, RateCache, SqliteSnapshots, spawn_refresh_task},
};
use tokio::{net::TcpListener, sync::watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("campusmarket=info,tower_http=info")),
        )
        .with_target(true)
        .init();

    let config = Config::from_env()?;
    let db_pool = db::connect(&config.database_url).await?;

    let rates = Arc::new(RateCache::new(
        &config.base_currency,
        Arc::new(HttpRateSource::from_config(&config)?),
        Arc::new(SqliteSnapshots::new(db_pool.clone())),
        config.rate_fetch_timeout,
    ));
    rates.initialize().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let refresh_task = spawn_refresh_task(rates.clone(), config.refresh, shutdown_rx);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("listening on {}", listener.local_addr()?);

    let state = AppState::new(db_pool, config, rates);
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("received shutdown signal"),
                Err(e) => {
                    warn!("failed to listen for ctrl-c: {e}");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await?;

    let _ = shutdown_tx.send(true);
    refresh_task.await?;
    info!("shut down");
    Ok(())
}
