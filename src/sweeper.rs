use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::engine::Engine;
use crate::store::WalStore;

/// Background task that periodically runs the maintenance alert sweep.
pub async fn run_maintenance_sweep(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match engine.sweep_maintenance().await {
            Ok(report) if !report.created.is_empty() => {
                info!(created = report.created.len(), "maintenance sweep raised alerts")
            }
            Ok(_) => debug!("maintenance sweep: nothing new"),
            Err(e) => tracing::error!("maintenance sweep failed: {e}"),
        }
    }
}

/// Background task that compacts the WAL once enough records were appended.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        if compact_if_needed(&store, threshold).await {
            info!("WAL compacted");
        }
    }
}

/// Returns whether a compaction ran and succeeded.
pub async fn compact_if_needed(store: &WalStore, threshold: u64) -> bool {
    let appends = store.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            true
        }
        Err(e) => {
            tracing::error!("compaction failed after {appends} appends: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use crate::store::{self, Store};
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("fleetyard_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compactor_waits_for_threshold() {
        let store = WalStore::open(&test_wal_path("threshold.wal")).unwrap();
        let mut v = store::save_record(
            &store,
            Vehicle::new(Ulid::new(), "Swift".into(), "KL-07-0001".into(), "Maruti".into()),
        )
        .await
        .unwrap();
        for i in 1..5 {
            v.cumulative_distance = i;
            v = store::save_record(&store, v).await.unwrap();
        }

        assert!(!compact_if_needed(&store, 10).await);
        assert!(compact_if_needed(&store, 5).await);
        assert_eq!(store.wal_appends_since_compact().await, 0);
        let loaded = store.load(EntityKind::Vehicle, v.id).await.unwrap();
        assert_eq!(loaded.version(), 5);
    }

    #[tokio::test]
    async fn sweeper_raises_alerts_on_first_tick() {
        let store = Arc::new(WalStore::open(&test_wal_path("sweep.wal")).unwrap());
        let hub = Arc::new(NotifyHub::new());
        let mut alerts_rx = hub.subscribe(crate::notify::MAINTENANCE_ALERT);
        let clock = Arc::new(FixedClock::new(1_717_200_000_000));
        let engine = Arc::new(Engine::new(store.clone(), hub.clone(), clock));

        let mut v = Vehicle::new(Ulid::new(), "Swift".into(), "KL-07-0001".into(), "Maruti".into());
        v.service_interval_distance = 10_000;
        v.distance_since_service = 9_900;
        engine.add_vehicle(v).await.unwrap();

        // The first tick fires immediately.
        let task = tokio::spawn(run_maintenance_sweep(engine.clone(), Duration::from_secs(3600)));
        let notification = tokio::time::timeout(Duration::from_secs(5), alerts_rx.recv())
            .await
            .unwrap()
            .unwrap();
        task.abort();

        assert_eq!(notification.payload["kind"], "service-500");
        let alerts = engine.unseen_alerts(Ulid::new()).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::Service500);
    }
}
