use std::time::Duration;

use anyhow::{Context, Result};
use hivemesh_schema::MeshConfig;
use hivemesh_server::state::AppState;
use hivemesh_store::StateStore;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const SHUTDOWN_BUDGET: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("hivemesh_server=info,tower_http=debug"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = MeshConfig::load();
    let store = StateStore::open(&config.store_path).context("opening state store")?;
    let state = AppState { store };

    let addr = format!("0.0.0.0:{}", config.http_port);
    let cancel = CancellationToken::new();
    let server = tokio::spawn({
        let cancel = cancel.clone();
        async move { hivemesh_server::serve(state, &addr, cancel).await }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("query api shutting down");
    cancel.cancel();
    if tokio::time::timeout(SHUTDOWN_BUDGET, server).await.is_err() {
        tracing::warn!("shutdown budget exceeded, exiting");
    }
    Ok(())
}
