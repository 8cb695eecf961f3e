use std::net::SocketAddr;

// ── Booking saga ────────────────────────────────────────────────

/// Counter: committed booking mutations. Labels: op.
pub const BOOKING_MUTATIONS_TOTAL: &str = "fleetyard_booking_mutations_total";

/// Counter: linked-record updates retried after a failure. Labels: kind.
pub const REPLICATION_RETRIES_TOTAL: &str = "fleetyard_replication_retries_total";

/// Counter: linked-record updates abandoned after the last retry. Labels: kind.
pub const REPLICATION_FAILURES_TOTAL: &str = "fleetyard_replication_failures_total";

/// Counter: bookings marked as needing replication repair.
pub const REPAIR_MARKERS_TOTAL: &str = "fleetyard_repair_markers_total";

// ── Alerts & notifications ──────────────────────────────────────

/// Counter: alerts persisted. Labels: kind.
pub const ALERTS_EMITTED_TOTAL: &str = "fleetyard_alerts_emitted_total";

/// Histogram: maintenance sweep duration in seconds.
pub const SWEEP_DURATION_SECONDS: &str = "fleetyard_sweep_duration_seconds";

/// Counter: notifications published. Labels: kind.
pub const NOTIFICATIONS_PUBLISHED_TOTAL: &str = "fleetyard_notifications_published_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "fleetyard_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "fleetyard_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "fleetyard_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}
