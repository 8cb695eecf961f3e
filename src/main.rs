use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::info;

use fleetyard::clock::SystemClock;
use fleetyard::config::Config;
use fleetyard::engine::Engine;
use fleetyard::notify::{self, NotifyHub};
use fleetyard::store::WalStore;
use fleetyard::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    fleetyard::observability::init(config.metrics_port);

    std::fs::create_dir_all(&config.data_dir)?;
    let wal_path = config.wal_path();
    let store = Arc::new(WalStore::open(&wal_path)?);
    let hub = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::with_retry_policy(
        store.clone(),
        hub.clone(),
        Arc::new(SystemClock),
        config.retry,
    ));

    info!("fleetyard started");
    info!("  wal: {}", wal_path.display());
    info!("  sweep_interval: {}s", config.sweep_interval.as_secs());
    info!("  compact_threshold: {}", config.compact_threshold);
    info!(
        "  replication: {} attempts, {}ms base backoff",
        config.retry.max_attempts,
        config.retry.base_backoff.as_millis()
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let mut tasks = vec![
        tokio::spawn(sweeper::run_maintenance_sweep(engine.clone(), config.sweep_interval)),
        tokio::spawn(sweeper::run_compactor(store.clone(), config.compact_threshold)),
    ];
    for kind in [notify::NEW_BOOKING, notify::MAINTENANCE_ALERT] {
        let mut rx = hub.subscribe(kind);
        tasks.push(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(n) => info!(kind = %n.kind, payload = %n.payload, "notification"),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("notification logger lagged, skipped {skipped}")
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    shutdown_signal().await?;
    info!("shutdown signal received, stopping background tasks");
    for task in tasks {
        task.abort();
    }

    // Leave a compact WAL behind for the next start.
    if let Err(e) = store.compact().await {
        tracing::error!("final compaction failed: {e}");
    }
    info!("fleetyard stopped");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = ctrl_c => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }
    Ok(())
}
