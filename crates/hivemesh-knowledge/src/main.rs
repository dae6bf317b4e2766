use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hivemesh_bus::MeshBus;
use hivemesh_knowledge::KnowledgeService;
use hivemesh_schema::MeshConfig;
use hivemesh_store::StateStore;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const SHUTDOWN_BUDGET: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("hivemesh_knowledge=info,hivemesh_bus=info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = MeshConfig::load();
    tracing::info!("starting knowledge manager");

    let bus = MeshBus::open(&config.bus_path, &config.stream_prefix)
        .context("opening message bus")?;
    let store = StateStore::open(&config.store_path).context("opening state store")?;

    let service = Arc::new(KnowledgeService::new(bus, store));
    let cancel = CancellationToken::new();
    let worker = tokio::spawn(service.run(cancel.clone()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("knowledge manager shutting down");
    cancel.cancel();
    if tokio::time::timeout(SHUTDOWN_BUDGET, worker).await.is_err() {
        tracing::warn!("shutdown budget exceeded, exiting");
    }
    Ok(())
}
