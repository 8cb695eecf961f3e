use std::path::PathBuf;
use std::time::Duration;

use crate::engine::RetryPolicy;

pub const WAL_FILE_NAME: &str = "fleetyard.wal";

/// Daemon settings, read from `FLEETYARD_*` environment variables.
/// Unset or unparsable values fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub sweep_interval: Duration,
    /// Compact the WAL once this many records were appended since the last compaction.
    pub compact_threshold: u64,
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            sweep_interval: Duration::from_secs(3600),
            compact_threshold: 1000,
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());
        let defaults = Self::default();

        Self {
            data_dir: lookup("FLEETYARD_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            metrics_port: lookup("FLEETYARD_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
            sweep_interval: parsed("FLEETYARD_SWEEP_INTERVAL_SECS")
                .filter(|&secs| secs > 0)
                .map_or(defaults.sweep_interval, Duration::from_secs),
            compact_threshold: parsed("FLEETYARD_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            retry: RetryPolicy {
                max_attempts: parsed("FLEETYARD_REPLICATION_ATTEMPTS")
                    .filter(|&n| n > 0)
                    .and_then(|n| u32::try_from(n).ok())
                    .unwrap_or(defaults.retry.max_attempts),
                base_backoff: parsed("FLEETYARD_REPLICATION_BACKOFF_MS")
                    .map_or(defaults.retry.base_backoff, Duration::from_millis),
            },
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }
}
