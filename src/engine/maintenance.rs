use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::notify;
use crate::observability;
use crate::timecodec;

use super::{Engine, EngineError};

/// Alert kinds a vehicle qualifies for at `now`. Pure.
///
/// Service bands are on remaining distance: `[1000, 2000)` → 2000,
/// `[500, 1000)` → 1000, `[0, 500)` → 500, negative → overdue. Vehicles
/// without a service interval get no service alert. Documents fire on
/// exactly 10 and exactly 5 calendar days left, and once the date has passed.
pub fn due_alerts(vehicle: &Vehicle, now: Ms) -> Vec<AlertKind> {
    let mut kinds = Vec::new();

    if vehicle.service_interval_distance > 0 {
        let kind = match vehicle.remaining_service_distance() {
            r if r < 0 => Some(AlertKind::ServiceOverdue),
            0..500 => Some(AlertKind::Service500),
            500..1000 => Some(AlertKind::Service1000),
            1000..2000 => Some(AlertKind::Service2000),
            _ => None,
        };
        kinds.extend(kind);
    }

    let documents = [
        (
            vehicle.insurance_due,
            [AlertKind::Insurance10d, AlertKind::Insurance5d, AlertKind::InsuranceOverdue],
        ),
        (
            vehicle.pollution_due,
            [AlertKind::Pollution10d, AlertKind::Pollution5d, AlertKind::PollutionOverdue],
        ),
    ];
    for (due, [ten, five, overdue]) in documents {
        let Some(due) = due else { continue };
        let days = match timecodec::days_until(now, due) {
            Ok(days) => days,
            Err(e) => {
                warn!(vehicle_id = %vehicle.id, due, "skipping document check: {e}");
                continue;
            }
        };
        match days {
            10 => kinds.push(ten),
            5 => kinds.push(five),
            d if d < 0 => kinds.push(overdue),
            _ => {}
        }
    }

    kinds
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub vehicles_checked: usize,
    pub created: Vec<MaintenanceAlert>,
    /// Due kinds that already had an uncleared alert.
    pub duplicates_skipped: usize,
    pub failed: usize,
}

impl Engine {
    /// Evaluate every non-retired vehicle and emit the alerts that aren't
    /// already outstanding for the same vehicle and kind.
    pub async fn sweep_maintenance(self: &Arc<Self>) -> Result<SweepReport, EngineError> {
        self.run_detached(|engine| async move { engine.sweep_maintenance_inner().await })
            .await
    }

    async fn sweep_maintenance_inner(&self) -> Result<SweepReport, EngineError> {
        let started = std::time::Instant::now();
        let now = self.now();
        let vehicles: Vec<Vehicle> = self.find(|v: &Vehicle| !v.is_retired).await?;
        let mut outstanding: HashSet<(Ulid, AlertKind)> = self
            .find(|a: &MaintenanceAlert| !a.is_cleared())
            .await?
            .into_iter()
            .map(|a| (a.vehicle_id, a.kind))
            .collect();

        let mut report = SweepReport {
            vehicles_checked: vehicles.len(),
            ..SweepReport::default()
        };
        for vehicle in &vehicles {
            for kind in due_alerts(vehicle, now) {
                if outstanding.contains(&(vehicle.id, kind)) {
                    report.duplicates_skipped += 1;
                    continue;
                }
                match self.emit_alert(vehicle.id, &vehicle.name, kind, None).await {
                    Ok(alert) => {
                        outstanding.insert((vehicle.id, kind));
                        report.created.push(alert);
                    }
                    Err(e) => {
                        warn!(vehicle_id = %vehicle.id, %kind, "alert not stored: {e}");
                        report.failed += 1;
                    }
                }
            }
        }

        metrics::histogram!(observability::SWEEP_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        info!(
            vehicles = report.vehicles_checked,
            created = report.created.len(),
            skipped = report.duplicates_skipped,
            "maintenance sweep finished"
        );
        Ok(report)
    }

    /// Persist an alert and publish it. The alert is stored first; a failed
    /// publish is not observable.
    pub(super) async fn emit_alert(
        &self,
        vehicle_id: Ulid,
        vehicle_name: &str,
        kind: AlertKind,
        booking_id: Option<Ulid>,
    ) -> Result<MaintenanceAlert, EngineError> {
        let alert = MaintenanceAlert {
            id: Ulid::new(),
            version: 0,
            vehicle_id,
            kind,
            created_at: self.now(),
            title: kind.title(vehicle_name),
            seen_by: BTreeSet::new(),
            booking_id,
            cleared_at: None,
        };
        let alert = self.save(alert).await?;
        metrics::counter!(observability::ALERTS_EMITTED_TOTAL, "kind" => kind.as_str()).increment(1);

        let topic = match kind.family() {
            AlertFamily::Booking => notify::NEW_BOOKING,
            _ => notify::MAINTENANCE_ALERT,
        };
        self.notifier.publish(
            topic,
            serde_json::json!({
                "alert_id": alert.id.to_string(),
                "vehicle_id": vehicle_id.to_string(),
                "booking_id": booking_id.map(|id| id.to_string()),
                "kind": kind.as_str(),
                "title": &alert.title,
                "created_at": alert.created_at,
            }),
        );
        debug!(alert_id = %alert.id, %kind, "alert emitted");
        Ok(alert)
    }

    pub async fn mark_alert_seen(&self, alert_id: Ulid, staff_id: Ulid) -> Result<MaintenanceAlert, EngineError> {
        let link = EntityLink {
            kind: EntityKind::Alert,
            id: alert_id,
        };
        self.mutate_with_retry(link, |entity| match entity {
            Entity::Alert(a) => a.seen_by.insert(staff_id),
            _ => false,
        })
        .await?;
        self.load(alert_id).await
    }

    /// Returns how many alerts were newly marked.
    pub async fn mark_all_alerts_seen(&self, staff_id: Ulid) -> Result<usize, EngineError> {
        let unseen = self.unseen_alerts(staff_id).await?;
        let mut marked = 0;
        for alert in unseen {
            match self.mark_alert_seen(alert.id, staff_id).await {
                Ok(_) => marked += 1,
                Err(e) => warn!(alert_id = %alert.id, "could not mark alert seen: {e}"),
            }
        }
        Ok(marked)
    }

    /// Newest first.
    pub async fn unseen_alerts(&self, staff_id: Ulid) -> Result<Vec<MaintenanceAlert>, EngineError> {
        let mut alerts: Vec<MaintenanceAlert> = self
            .find(|a: &MaintenanceAlert| !a.seen_by.contains(&staff_id))
            .await?;
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(alerts)
    }
}
