//! Keeps the booking refs embedded in vehicles, customers and staff in
//! step with their bookings. This is the only code that writes
//! `booking_refs`.
//!
//! There is no multi-record transaction. The booking is written first and
//! is the source of truth; each linked record is then updated with its own
//! load-mutate-save cycle, retried with exponential backoff. Whatever still
//! fails is recorded on the booking as `repair_links` and flagged with
//! `needs_replication_repair`. The next saga on the same booking retries
//! those links before its own updates, and only clears the flag once they
//! have all gone through.

use tracing::{debug, error, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::{Committed, Engine, EngineError};

/// One change to one linked record's refs.
#[derive(Debug, Clone)]
pub(super) enum RefOp {
    Upsert(BookingRef),
    Remove(Ulid),
    /// Patch distance fields of an existing ref.
    Reconcile { booking_id: Ulid, distance: u64 },
    /// `Reconcile` plus the vehicle's own odometer counters.
    Odometer {
        booking_id: Ulid,
        reading: u64,
        distance: u64,
    },
}

impl RefOp {
    fn label(&self) -> &'static str {
        match self {
            RefOp::Upsert(_) => "upsert",
            RefOp::Remove(_) => "remove",
            RefOp::Reconcile { .. } => "reconcile",
            RefOp::Odometer { .. } => "odometer",
        }
    }

    /// Apply to a freshly loaded record. Returns whether anything changed,
    /// so a retry after an unacknowledged save doesn't write twice.
    fn apply(&self, entity: &mut Entity) -> bool {
        if let (RefOp::Odometer { reading, .. }, Entity::Vehicle(v)) = (self, &mut *entity)
            && *reading > v.cumulative_distance
        {
            v.distance_since_service += *reading - v.cumulative_distance;
            v.cumulative_distance = *reading;
            // Counters moved, so this record must be saved even if the ref
            // is already reconciled.
            let _ = Self::patch_ref(v, self);
            return true;
        }
        let Some(linked) = entity.as_linked_mut() else {
            return false;
        };
        Self::patch_ref(linked, self)
    }

    fn patch_ref(linked: &mut dyn Linked, op: &RefOp) -> bool {
        match op {
            RefOp::Upsert(r) => {
                if linked.booking_refs().iter().any(|x| x == r) {
                    return false;
                }
                linked.upsert_ref(r.clone());
                true
            }
            RefOp::Remove(booking_id) => linked.remove_ref(*booking_id).is_some(),
            RefOp::Reconcile {
                booking_id,
                distance,
            }
            | RefOp::Odometer {
                booking_id,
                distance,
                ..
            } => match linked.find_ref_mut(*booking_id) {
                Some(r) if r.distance_covered != *distance || !r.is_distance_reconciled => {
                    r.distance_covered = *distance;
                    r.is_distance_reconciled = true;
                    true
                }
                _ => false,
            },
        }
    }
}

/// A `RefOp` addressed to one record.
#[derive(Debug, Clone)]
pub(super) struct RefUpdate {
    pub link: EntityLink,
    pub op: RefOp,
}

impl RefUpdate {
    pub fn vehicle(id: Ulid, op: RefOp) -> Self {
        Self::new(EntityKind::Vehicle, id, op)
    }

    pub fn customer(id: Ulid, op: RefOp) -> Self {
        Self::new(EntityKind::Customer, id, op)
    }

    pub fn staff(id: Ulid, op: RefOp) -> Self {
        Self::new(EntityKind::Staff, id, op)
    }

    fn new(kind: EntityKind, id: Ulid, op: RefOp) -> Self {
        Self {
            link: EntityLink { kind, id },
            op,
        }
    }
}

/// Updates that move a booking from `old` owners to `new` owners. Links that
/// didn't change get their ref refreshed in place.
pub(super) fn relink(
    booking: &Booking,
    old_vehicle: Ulid,
    old_customer: Ulid,
    old_staff: Ulid,
) -> Vec<RefUpdate> {
    let fresh = booking.to_ref();
    let mut updates = Vec::with_capacity(6);
    let pairs = [
        (EntityKind::Vehicle, old_vehicle, booking.vehicle.id),
        (EntityKind::Customer, old_customer, booking.customer.id),
        (EntityKind::Staff, old_staff, booking.staff.id),
    ];
    for (kind, old, new) in pairs {
        if old != new {
            updates.push(RefUpdate::new(kind, old, RefOp::Remove(booking.id)));
        }
        updates.push(RefUpdate::new(kind, new, RefOp::Upsert(fresh.clone())));
    }
    updates
}

/// Updates that attach a new booking to its three owners.
pub(super) fn attach(booking: &Booking) -> Vec<RefUpdate> {
    let r = booking.to_ref();
    vec![
        RefUpdate::vehicle(booking.vehicle.id, RefOp::Upsert(r.clone())),
        RefUpdate::customer(booking.customer.id, RefOp::Upsert(r.clone())),
        RefUpdate::staff(booking.staff.id, RefOp::Upsert(r)),
    ]
}

/// Updates that detach a booking from its three owners.
pub(super) fn detach(booking: &Booking) -> Vec<RefUpdate> {
    vec![
        RefUpdate::vehicle(booking.vehicle.id, RefOp::Remove(booking.id)),
        RefUpdate::customer(booking.customer.id, RefOp::Remove(booking.id)),
        RefUpdate::staff(booking.staff.id, RefOp::Remove(booking.id)),
    ]
}

/// Updates that retry the links an earlier saga gave up on. A link the
/// booking still owns gets its ref rewritten; any other link loses the ref.
pub(super) fn repair(booking: &Booking) -> Vec<RefUpdate> {
    let mut updates = Vec::with_capacity(booking.repair_links.len());
    for &link in &booking.repair_links {
        let owner = match link.kind {
            EntityKind::Vehicle => booking.vehicle.id,
            EntityKind::Customer => booking.customer.id,
            EntityKind::Staff => booking.staff.id,
            EntityKind::Booking | EntityKind::Alert => continue,
        };
        if !booking.is_active() || link.id != owner {
            updates.push(RefUpdate {
                link,
                op: RefOp::Remove(booking.id),
            });
            continue;
        }
        updates.push(RefUpdate {
            link,
            op: RefOp::Upsert(booking.to_ref()),
        });
        if link.kind == EntityKind::Vehicle
            && let Some(reading) = booking.end_odometer
        {
            updates.push(RefUpdate {
                link,
                op: RefOp::Odometer {
                    booking_id: booking.id,
                    reading,
                    distance: booking.distance_covered,
                },
            });
        }
    }
    updates
}

impl Engine {
    /// Load-mutate-save one record, retrying with backoff. Each attempt
    /// starts from a fresh load so version conflicts resolve themselves.
    pub(super) async fn mutate_with_retry<F>(&self, link: EntityLink, mutate: F) -> Result<(), EngineError>
    where
        F: Fn(&mut Entity) -> bool + Send + Sync,
    {
        let mut attempt = 1;
        loop {
            let result = async {
                let mut entity = self.store.load(link.kind, link.id).await?;
                if mutate(&mut entity) {
                    self.store.save(entity).await?;
                }
                Ok::<(), EngineError>(())
            }
            .await;

            match result {
                Ok(()) => return Ok(()),
                // A missing record won't appear by waiting.
                Err(e @ EngineError::NotFound(..)) => return Err(e),
                Err(e) if attempt >= self.retry.max_attempts => return Err(e),
                Err(e) => {
                    debug!(%link, attempt, "retrying after: {e}");
                    metrics::counter!(observability::REPLICATION_RETRIES_TOTAL, "kind" => link.kind.to_string())
                        .increment(1);
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Apply every update, collecting the links that couldn't be written.
    pub(super) async fn replicate(&self, booking_id: Ulid, updates: Vec<RefUpdate>) -> Result<(), EngineError> {
        let mut failed = Vec::new();
        for update in updates {
            let op = &update.op;
            if let Err(e) = self.mutate_with_retry(update.link, |entity| op.apply(entity)).await {
                warn!(%booking_id, link = %update.link, op = op.label(), "replication failed: {e}");
                metrics::counter!(observability::REPLICATION_FAILURES_TOTAL, "kind" => update.link.kind.to_string())
                    .increment(1);
                if !failed.contains(&update.link) {
                    failed.push(update.link);
                }
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(EngineError::ReplicationPartialFailure { booking_id, failed })
        }
    }

    /// Run the saga for an already committed booking, after retrying any
    /// links an earlier saga left behind. Partial failure leaves a repair
    /// marker and becomes a degraded success.
    pub(super) async fn finish_saga(
        &self,
        booking: Booking,
        updates: Vec<RefUpdate>,
    ) -> Result<Committed<Booking>, EngineError> {
        let mut pending = repair(&booking);
        pending.extend(updates);
        let failed = match self.replicate(booking.id, pending).await {
            Ok(()) => Vec::new(),
            Err(EngineError::ReplicationPartialFailure { failed, .. }) => failed,
            Err(e) => return Err(e),
        };
        let booking = self.record_repair_links(booking, &failed).await;
        if failed.is_empty() {
            return Ok(Committed::clean(booking));
        }
        metrics::counter!(observability::REPAIR_MARKERS_TOTAL).increment(1);
        warn!(booking_id = %booking.id, pending = failed.len(), "booking needs replication repair");
        Ok(Committed {
            value: booking,
            pending_repair: failed,
        })
    }

    /// Persist the links still owed an update. An empty set clears the marker.
    async fn record_repair_links(&self, mut booking: Booking, failed: &[EntityLink]) -> Booking {
        let settled = |b: &Booking| {
            b.repair_links.as_slice() == failed && b.needs_replication_repair != failed.is_empty()
        };
        if settled(&booking) {
            return booking;
        }
        let link = EntityLink {
            kind: EntityKind::Booking,
            id: booking.id,
        };
        let recorded = self
            .mutate_with_retry(link, |entity| match entity {
                Entity::Booking(b) if !settled(&*b) => {
                    b.repair_links = failed.to_vec();
                    b.needs_replication_repair = !failed.is_empty();
                    true
                }
                _ => false,
            })
            .await;
        match recorded {
            Ok(()) => {
                if let Ok(fresh) = self.load::<Booking>(booking.id).await {
                    return fresh;
                }
            }
            Err(e) => error!(booking_id = %booking.id, "could not persist repair links: {e}"),
        }
        booking.repair_links = failed.to_vec();
        booking.needs_replication_repair = !failed.is_empty();
        booking
    }
}
