//! Methane Monitor - Main Entry Point

use alerting::{AlertDispatcher, LogDispatcher, MqttDispatcher};
use anyhow::Context;
use api::settings::{AppConfig, DispatchBackend, StorageBackend};
use api::{init_logging, install_metrics, run_server, AppState};
use classification_engine::ValidationEngine;
use std::sync::Arc;
use storage::{ReadingStore, Repository, SqliteStore};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("loading configuration")?;
    init_logging(&config.logging)?;

    info!("=== Methane Monitor v{} ===", env!("CARGO_PKG_VERSION"));

    let metrics = install_metrics()?;

    let store: Arc<dyn ReadingStore> = match config.storage.backend {
        StorageBackend::Memory => Arc::new(Repository::with_retention(config.storage.retention)),
        StorageBackend::Sqlite => Arc::new(
            SqliteStore::connect(&config.storage.url)
                .await
                .with_context(|| format!("opening {}", config.storage.url))?,
        ),
    };

    let dispatcher: Arc<dyn AlertDispatcher> = match config.dispatch.backend {
        DispatchBackend::Log => Arc::new(LogDispatcher::new()),
        DispatchBackend::Mqtt => Arc::new(MqttDispatcher::connect(config.dispatch.mqtt.clone())),
    };

    let engine = ValidationEngine::start(config.engine.clone(), store, dispatcher)
        .context("starting validation engine")?;
    let state = Arc::new(AppState::new(Arc::new(engine), Some(metrics)));

    run_server(&config.server.addr(), state).await?;

    info!("Methane Monitor stopped");
    Ok(())
}
