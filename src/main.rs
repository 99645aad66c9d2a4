//! Sync sentinel daemon entry point
//!
//! Brings up the change log manager and the failure detector, then runs
//! until Ctrl+C / SIGTERM and shuts both down in order.

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sync_sentinel::changelog::ChangeLogManager;
use sync_sentinel::detector::{DetectorConfig, FailureDetector};
use sync_sentinel::event_store::{EventStore, EventStoreConfig};
use sync_sentinel::recovery::{ListenerRegistry, RecoveryEventKind};
use sync_sentinel::types::SentinelResult;

#[tokio::main]
async fn main() -> SentinelResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let data_dir =
        std::env::var("SENTINEL_DATA_DIR").unwrap_or_else(|_| "./sentinel-data".to_string());
    info!(version = sync_sentinel::VERSION, data_dir = %data_dir, "starting sync sentinel");

    let store = Arc::new(EventStore::with_config(EventStoreConfig::new(&data_dir)));
    let manager = Arc::new(ChangeLogManager::new(store));
    let loaded = manager.initialize()?;
    info!(events = loaded, "change log ready");

    let listeners = Arc::new(ListenerRegistry::new());
    listeners.subscribe(RecoveryEventKind::FailureDetected, |event| {
        warn!(
            id = %event.id,
            operation = event.operation_id.as_deref().unwrap_or("-"),
            error = event.error.as_deref().unwrap_or("-"),
            "failure handed to recovery pipeline"
        );
        Ok(())
    });

    let detector = Arc::new(FailureDetector::new(
        DetectorConfig::default(),
        manager.clone(),
        listeners,
    ));
    detector.start()?;

    wait_for_shutdown().await;
    info!("shutdown signal received");

    detector.stop().await;
    manager.close().await;
    info!("sync sentinel stopped");
    Ok(())
}

/// Resolves when the process receives Ctrl+C or SIGTERM.
async fn wait_for_shutdown() {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    }) {
        warn!(error = %e, "signal handler unavailable, running until killed");
        std::future::pending::<()>().await;
    }
    let _ = rx.recv().await;
}
