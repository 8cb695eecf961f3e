use std::sync::Arc;

use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::{MAX_VALID_TIMESTAMP_MS, MIN_VALID_TIMESTAMP_MS};
use crate::model::*;
use crate::observability;

use super::replication::{RefOp, RefUpdate};
use super::{Committed, Engine, EngineError};

impl Engine {
    /// Reconcile a finished trip against the vehicle's odometer. A booking
    /// is reconciled once; a second reading is rejected.
    ///
    /// A reading of 0 means "not read yet" and is always rejected before
    /// anything is loaded; `current` is reported as 0 in that case.
    pub async fn record_trip_distance(
        self: &Arc<Self>,
        booking_id: Ulid,
        odometer_reading: u64,
    ) -> Result<Committed<Booking>, EngineError> {
        if odometer_reading == 0 {
            return Err(EngineError::InvalidReading {
                reading: 0,
                current: 0,
            });
        }
        self.run_detached(move |engine| async move {
            engine.record_trip_distance_inner(booking_id, odometer_reading).await
        })
        .await
    }

    async fn record_trip_distance_inner(
        &self,
        booking_id: Ulid,
        reading: u64,
    ) -> Result<Committed<Booking>, EngineError> {
        let mut booking: Booking = self.load(booking_id).await?;
        if !booking.is_active() {
            return Err(EngineError::BookingCancelled(booking_id));
        }
        if booking.is_distance_reconciled {
            return Err(EngineError::AlreadyReconciled(booking_id));
        }
        let vehicle: Vehicle = self.load(booking.vehicle.id).await?;
        if reading < vehicle.cumulative_distance {
            return Err(EngineError::InvalidReading {
                reading,
                current: vehicle.cumulative_distance,
            });
        }
        let delta = reading - vehicle.cumulative_distance;

        booking.distance_covered = delta;
        booking.end_odometer = Some(reading);
        booking.is_distance_reconciled = true;
        let booking = self.save(booking).await?;

        let updates = vec![
            RefUpdate::vehicle(
                booking.vehicle.id,
                RefOp::Odometer {
                    booking_id,
                    reading,
                    distance: delta,
                },
            ),
            RefUpdate::customer(
                booking.customer.id,
                RefOp::Reconcile {
                    booking_id,
                    distance: delta,
                },
            ),
            RefUpdate::staff(
                booking.staff.id,
                RefOp::Reconcile {
                    booking_id,
                    distance: delta,
                },
            ),
        ];
        let committed = self.finish_saga(booking, updates).await?;

        metrics::counter!(observability::BOOKING_MUTATIONS_TOTAL, "op" => "reconcile").increment(1);
        info!(%booking_id, reading, delta, "trip distance recorded");
        Ok(committed)
    }

    /// Record a completed service: the distance counter restarts and the
    /// service alerts are cleared so the bands can fire again.
    pub async fn record_service(self: &Arc<Self>, vehicle_id: Ulid) -> Result<Vehicle, EngineError> {
        self.run_detached(move |engine| async move {
            let mut vehicle: Vehicle = engine.load(vehicle_id).await?;
            let now = engine.now();
            vehicle.distance_since_service = 0;
            vehicle.service_history.push(ServiceRecord {
                at: now,
                odometer: vehicle.cumulative_distance,
            });
            let vehicle = engine.save(vehicle).await?;
            let cleared = engine.clear_alerts(vehicle_id, AlertFamily::Service, now).await;
            info!(%vehicle_id, odometer = vehicle.cumulative_distance, cleared, "service recorded");
            Ok(vehicle)
        })
        .await
    }

    /// Set a new expiry date for a vehicle document and clear its alerts.
    pub async fn renew_document(
        self: &Arc<Self>,
        vehicle_id: Ulid,
        document: Document,
        due: Ms,
    ) -> Result<Vehicle, EngineError> {
        if !(MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&due) {
            return Err(EngineError::LimitExceeded("timestamp out of range"));
        }
        self.run_detached(move |engine| async move {
            let mut vehicle: Vehicle = engine.load(vehicle_id).await?;
            match document {
                Document::Insurance => vehicle.insurance_due = Some(due),
                Document::Pollution => vehicle.pollution_due = Some(due),
            }
            let vehicle = engine.save(vehicle).await?;
            let cleared = engine.clear_alerts(vehicle_id, document.family(), engine.now()).await;
            info!(%vehicle_id, ?document, due, cleared, "document renewed");
            Ok(vehicle)
        })
        .await
    }

    /// Mark every uncleared alert of `family` for the vehicle as cleared.
    /// Returns how many were cleared; failures are logged and skipped.
    async fn clear_alerts(&self, vehicle_id: Ulid, family: AlertFamily, now: Ms) -> usize {
        let alerts = match self
            .find::<MaintenanceAlert, _>(|a| {
                a.vehicle_id == vehicle_id && a.kind.family() == family && !a.is_cleared()
            })
            .await
        {
            Ok(alerts) => alerts,
            Err(e) => {
                warn!(%vehicle_id, ?family, "could not list alerts to clear: {e}");
                return 0;
            }
        };

        let mut cleared = 0;
        for alert in alerts {
            let link = EntityLink {
                kind: EntityKind::Alert,
                id: alert.id,
            };
            let result = self
                .mutate_with_retry(link, |entity| match entity {
                    Entity::Alert(a) if a.cleared_at.is_none() => {
                        a.cleared_at = Some(now);
                        true
                    }
                    _ => false,
                })
                .await;
            match result {
                Ok(()) => cleared += 1,
                Err(e) => warn!(alert_id = %alert.id, "could not clear alert: {e}"),
            }
        }
        cleared
    }
}
