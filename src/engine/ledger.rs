use std::sync::Arc;

use futures::StreamExt;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::MAX_BATCH_SIZE;
use crate::model::*;
use crate::observability;
use crate::timecodec;

use super::conflict::{check_no_conflict, validate_financials, validate_span};
use super::replication::{attach, detach, relink};
use super::{BulkReport, Committed, Engine, EngineError};

/// Request to create a booking. Times are `DD-MM-YYYY hh:mm AM|PM`.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub vehicle_id: Ulid,
    pub customer_id: Ulid,
    pub staff_id: Ulid,
    pub start: String,
    pub end: String,
    pub financials: Financials,
}

/// Fields to change on an existing booking. `None` keeps the current value.
/// The staff link always moves to whoever makes the edit.
#[derive(Debug, Clone, Default)]
pub struct BookingEdit {
    pub vehicle_id: Option<Ulid>,
    pub customer_id: Option<Ulid>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub financials: Option<Financials>,
}

impl Engine {
    pub async fn create_booking(self: &Arc<Self>, req: NewBooking) -> Result<Committed<Booking>, EngineError> {
        self.run_detached(move |engine| async move { engine.create_booking_inner(req).await })
            .await
    }

    pub async fn edit_booking(
        self: &Arc<Self>,
        booking_id: Ulid,
        acting_staff_id: Ulid,
        edit: BookingEdit,
    ) -> Result<Committed<Booking>, EngineError> {
        self.run_detached(move |engine| async move {
            engine.edit_booking_inner(booking_id, acting_staff_id, edit).await
        })
        .await
    }

    /// Cancel a booking. Cancelling twice is a successful no-op.
    pub async fn cancel_booking(
        self: &Arc<Self>,
        booking_id: Ulid,
        acting_staff_id: Ulid,
    ) -> Result<Committed<Booking>, EngineError> {
        self.run_detached(move |engine| async move {
            engine.cancel_booking_inner(booking_id, acting_staff_id).await
        })
        .await
    }

    pub async fn bulk_cancel(self: &Arc<Self>, ids: Vec<Ulid>, acting_staff_id: Ulid) -> Result<BulkReport, EngineError> {
        if ids.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        self.run_detached(move |engine| async move {
            let outcomes: Vec<_> = futures::stream::iter(ids)
                .then(|id| {
                    let engine = Arc::clone(&engine);
                    async move { (id, engine.cancel_booking_inner(id, acting_staff_id).await) }
                })
                .collect()
                .await;

            let mut report = BulkReport::default();
            for (id, outcome) in outcomes {
                report.record(id, outcome);
            }
            info!(
                cancelled = report.succeeded.len() + report.degraded.len(),
                failed = report.failed.len(),
                "bulk cancel finished"
            );
            Ok(report)
        })
        .await
    }

    pub async fn mark_invoiced(self: &Arc<Self>, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.run_detached(move |engine| async move {
            let mut booking: Booking = engine.load(booking_id).await?;
            if !booking.is_active() {
                return Err(EngineError::BookingCancelled(booking_id));
            }
            if booking.is_invoiced {
                return Ok(booking);
            }
            booking.is_invoiced = true;
            engine.save(booking).await
        })
        .await
    }

    // ── Saga bodies ──────────────────────────────────────────────

    async fn create_booking_inner(&self, req: NewBooking) -> Result<Committed<Booking>, EngineError> {
        // Everything is validated before the first write.
        let span = timecodec::parse_span(&req.start, &req.end)?;
        validate_span(&span)?;
        validate_financials(&req.financials)?;

        let vehicle: Vehicle = self.load_linkable(req.vehicle_id).await?;
        let customer: Customer = self.load_linkable(req.customer_id).await?;
        let staff: StaffMember = self.load_linkable(req.staff_id).await?;
        check_no_conflict(&vehicle, &span, None)?;

        let booking = Booking {
            id: Ulid::new(),
            version: 0,
            span,
            vehicle: vehicle.snapshot(),
            customer: customer.snapshot(),
            staff: staff.snapshot(),
            financials: req.financials,
            distance_covered: 0,
            end_odometer: None,
            status: BookingStatus::Active,
            is_distance_reconciled: false,
            is_invoiced: false,
            needs_replication_repair: false,
            repair_links: Vec::new(),
            created_at: self.now(),
            cancelled_by: None,
        };
        let booking = self.save(booking).await?;
        let updates = attach(&booking);
        let committed = self.finish_saga(booking, updates).await?;

        metrics::counter!(observability::BOOKING_MUTATIONS_TOTAL, "op" => "create").increment(1);
        info!(booking_id = %committed.value.id, vehicle = %committed.value.vehicle.name, "booking created");

        let b = &committed.value;
        if let Err(e) = self
            .emit_alert(b.vehicle.id, &b.vehicle.name, AlertKind::NewBooking, Some(b.id))
            .await
        {
            warn!(booking_id = %b.id, "new-booking alert not stored: {e}");
        }
        Ok(committed)
    }

    async fn edit_booking_inner(
        &self,
        booking_id: Ulid,
        acting_staff_id: Ulid,
        edit: BookingEdit,
    ) -> Result<Committed<Booking>, EngineError> {
        let mut booking: Booking = self.load(booking_id).await?;
        if !booking.is_active() {
            return Err(EngineError::BookingCancelled(booking_id));
        }

        let span = match (&edit.start, &edit.end) {
            (None, None) => booking.span,
            (start, end) => {
                let start = start.as_deref().map(timecodec::parse).transpose()?;
                let end = end.as_deref().map(timecodec::parse).transpose()?;
                Span::new(start.unwrap_or(booking.span.start), end.unwrap_or(booking.span.end))
            }
        };
        validate_span(&span)?;
        if let Some(f) = &edit.financials {
            validate_financials(f)?;
        }

        let vehicle_changed = edit.vehicle_id.is_some_and(|id| id != booking.vehicle.id);
        let customer_changed = edit.customer_id.is_some_and(|id| id != booking.customer.id);

        let vehicle_snapshot = match edit.vehicle_id {
            Some(id) if vehicle_changed => {
                let vehicle: Vehicle = self.load_linkable(id).await?;
                check_no_conflict(&vehicle, &span, Some(booking_id))?;
                vehicle.snapshot()
            }
            _ => {
                if span != booking.span {
                    let vehicle: Vehicle = self.load(booking.vehicle.id).await?;
                    check_no_conflict(&vehicle, &span, Some(booking_id))?;
                }
                booking.vehicle.clone()
            }
        };
        let customer_snapshot = match edit.customer_id {
            Some(id) if customer_changed => self.load_linkable::<Customer>(id).await?.snapshot(),
            _ => booking.customer.clone(),
        };
        let staff: StaffMember = self.load_linkable(acting_staff_id).await?;

        let (old_vehicle, old_customer, old_staff) =
            (booking.vehicle.id, booking.customer.id, booking.staff.id);
        booking.span = span;
        booking.vehicle = vehicle_snapshot;
        booking.customer = customer_snapshot;
        booking.staff = staff.snapshot();
        if let Some(f) = edit.financials {
            booking.financials = f;
        }

        let booking = self.save(booking).await?;
        let updates = relink(&booking, old_vehicle, old_customer, old_staff);
        let committed = self.finish_saga(booking, updates).await?;

        metrics::counter!(observability::BOOKING_MUTATIONS_TOTAL, "op" => "edit").increment(1);
        info!(%booking_id, staff = %acting_staff_id, "booking edited");
        Ok(committed)
    }

    pub(super) async fn cancel_booking_inner(
        &self,
        booking_id: Ulid,
        acting_staff_id: Ulid,
    ) -> Result<Committed<Booking>, EngineError> {
        let mut booking: Booking = self.load(booking_id).await?;
        if !booking.is_active() {
            // Already cancelled. A detach that failed last time is retried.
            if booking.repair_links.is_empty() {
                return Ok(Committed::clean(booking));
            }
            return self.finish_saga(booking, Vec::new()).await;
        }

        booking.status = BookingStatus::Cancelled;
        booking.cancelled_by = Some(acting_staff_id);
        let booking = self.save(booking).await?;
        let updates = detach(&booking);
        let committed = self.finish_saga(booking, updates).await?;

        metrics::counter!(observability::BOOKING_MUTATIONS_TOTAL, "op" => "cancel").increment(1);
        info!(%booking_id, staff = %acting_staff_id, "booking cancelled");
        Ok(committed)
    }
}
