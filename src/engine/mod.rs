mod availability;
mod conflict;
mod error;
mod fleet;
mod ledger;
mod maintenance;
mod odometer;
mod queries;
mod replication;
mod revenue;

pub use availability::{
    BookingWindow, FleetPartition, Scheduled, ScheduledBooking, TimeRemaining, VehicleState,
    YardEntry, active_now, classify, fleet_partition, upcoming,
};
pub use error::EngineError;
pub use ledger::{BookingEdit, NewBooking};
pub use maintenance::{SweepReport, due_alerts};
pub use revenue::{Dashboard, RevenueSummary, VehicleRevenue, VehicleUsage};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ulid::Ulid;

use crate::clock::Clock;
use crate::limits::{DEFAULT_REPLICATION_ATTEMPTS, DEFAULT_REPLICATION_BACKOFF_MS};
use crate::model::*;
use crate::notify::Notifier;
use crate::store::{self, Store};

/// How hard the replication saga tries before leaving a repair marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`: base, 2×base, 4×base, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_REPLICATION_ATTEMPTS,
            base_backoff: Duration::from_millis(DEFAULT_REPLICATION_BACKOFF_MS),
        }
    }
}

/// Result of a write that touches several records. The primary record is
/// always committed; `pending_repair` names linked records the saga could
/// not update.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed<T> {
    pub value: T,
    pub pending_repair: Vec<EntityLink>,
}

impl<T> Committed<T> {
    pub(crate) fn clean(value: T) -> Self {
        Self {
            value,
            pending_repair: Vec::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.pending_repair.is_empty()
    }
}

/// Per-id outcome of a bulk operation. One failure never aborts the rest.
#[derive(Debug, Default)]
pub struct BulkReport {
    pub succeeded: Vec<Ulid>,
    /// Committed, but linked records still need repair.
    pub degraded: Vec<(Ulid, Vec<EntityLink>)>,
    pub failed: Vec<(Ulid, EngineError)>,
}

impl BulkReport {
    pub(crate) fn record<T>(&mut self, id: Ulid, outcome: Result<Committed<T>, EngineError>) {
        match outcome {
            Ok(c) if c.is_degraded() => self.degraded.push((id, c.pending_repair)),
            Ok(_) => self.succeeded.push(id),
            Err(e) => self.failed.push((id, e)),
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.degraded.len() + self.failed.len()
    }
}

pub struct Engine {
    pub(super) store: Arc<dyn Store>,
    pub(super) notifier: Arc<dyn Notifier>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) retry: RetryPolicy,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, clock: Arc<dyn Clock>) -> Self {
        Self::with_retry_policy(store, notifier, clock, RetryPolicy::default())
    }

    pub fn with_retry_policy(
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            retry,
        }
    }

    pub fn now(&self) -> Ms {
        self.clock.now()
    }

    /// Run a mutation on its own task. Once spawned it runs to completion
    /// even if the caller stops polling.
    pub(super) async fn run_detached<T, F, Fut>(self: &Arc<Self>, op: F) -> Result<T, EngineError>
    where
        F: FnOnce(Arc<Engine>) -> Fut,
        Fut: Future<Output = Result<T, EngineError>> + Send + 'static,
        T: Send + 'static,
    {
        let task = tokio::spawn(op(Arc::clone(self)));
        task.await
            .map_err(|e| EngineError::Aborted(e.to_string()))?
    }

    pub(super) async fn load<R: Record>(&self, id: Ulid) -> Result<R, EngineError> {
        Ok(store::load_record(&*self.store, id).await?)
    }

    /// Load a record that a new or edited booking is about to link to.
    /// Retired records can't take new links and read as missing.
    pub(super) async fn load_linkable<R: Record + Linked>(&self, id: Ulid) -> Result<R, EngineError> {
        let record: R = self.load(id).await?;
        if record.is_retired() {
            return Err(EngineError::NotFound(R::KIND, id));
        }
        Ok(record)
    }

    pub(super) async fn save<R: Record>(&self, record: R) -> Result<R, EngineError> {
        Ok(store::save_record(&*self.store, record).await?)
    }

    pub(super) async fn find<R, F>(&self, predicate: F) -> Result<Vec<R>, EngineError>
    where
        R: Record,
        F: Fn(&R) -> bool + Send + Sync,
    {
        Ok(store::find_records(&*self.store, predicate).await?)
    }

    pub async fn booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.load(id).await
    }
}
