use std::collections::HashMap;

use rust_decimal::Decimal;
use ulid::Ulid;

use crate::model::*;
use crate::timecodec;

use super::availability::{VehicleState, classify};
use super::{Engine, EngineError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleRevenue {
    pub vehicle: VehicleSnapshot,
    pub booking_count: usize,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevenueSummary {
    pub year: i32,
    pub month: u32,
    pub booking_count: usize,
    pub total: Decimal,
    pub advance_paid: Decimal,
    pub outstanding: Decimal,
    /// Highest total first.
    pub by_vehicle: Vec<VehicleRevenue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleUsage {
    pub vehicle: VehicleSnapshot,
    pub booking_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dashboard {
    pub running: usize,
    pub on_yard: usize,
    pub upcoming_bookings: usize,
    pub active_bookings: usize,
}

/// Totals over active bookings that start inside `month`. Pure.
pub(super) fn summarize(bookings: &[Booking], month: Span, year: i32, month_no: u32) -> RevenueSummary {
    let mut summary = RevenueSummary {
        year,
        month: month_no,
        booking_count: 0,
        total: Decimal::ZERO,
        advance_paid: Decimal::ZERO,
        outstanding: Decimal::ZERO,
        by_vehicle: Vec::new(),
    };
    let mut per_vehicle: HashMap<Ulid, VehicleRevenue> = HashMap::new();

    for b in bookings
        .iter()
        .filter(|b| b.is_active() && month.contains_instant(b.span.start))
    {
        summary.booking_count += 1;
        summary.total += b.financials.total;
        summary.advance_paid += b.financials.advance_paid;
        summary.outstanding += b.financials.balance_due();

        let entry = per_vehicle.entry(b.vehicle.id).or_insert_with(|| VehicleRevenue {
            vehicle: b.vehicle.clone(),
            booking_count: 0,
            total: Decimal::ZERO,
        });
        entry.booking_count += 1;
        entry.total += b.financials.total;
    }

    summary.by_vehicle = per_vehicle.into_values().collect();
    summary
        .by_vehicle
        .sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.vehicle.name.cmp(&b.vehicle.name)));
    summary
}

/// Vehicles ranked by active bookings that start or end inside `month`. Pure.
pub(super) fn rank_usage(bookings: &[Booking], month: Span, limit: usize) -> Vec<VehicleUsage> {
    let mut counts: HashMap<Ulid, VehicleUsage> = HashMap::new();
    for b in bookings.iter().filter(|b| {
        b.is_active() && (month.contains_instant(b.span.start) || month.contains_instant(b.span.end))
    }) {
        counts
            .entry(b.vehicle.id)
            .or_insert_with(|| VehicleUsage {
                vehicle: b.vehicle.clone(),
                booking_count: 0,
            })
            .booking_count += 1;
    }
    let mut ranked: Vec<VehicleUsage> = counts.into_values().collect();
    ranked.sort_by(|a, b| {
        b.booking_count
            .cmp(&a.booking_count)
            .then_with(|| a.vehicle.name.cmp(&b.vehicle.name))
    });
    ranked.truncate(limit);
    ranked
}

impl Engine {
    pub async fn monthly_revenue(&self, year: i32, month: u32) -> Result<RevenueSummary, EngineError> {
        let span = timecodec::month_span(year, month)?;
        let bookings: Vec<Booking> = self
            .find(|b: &Booking| b.is_active() && span.contains_instant(b.span.start))
            .await?;
        Ok(summarize(&bookings, span, year, month))
    }

    pub async fn most_booked_vehicles(
        &self,
        year: i32,
        month: u32,
        limit: usize,
    ) -> Result<Vec<VehicleUsage>, EngineError> {
        let span = timecodec::month_span(year, month)?;
        let bookings: Vec<Booking> = self.find(|b: &Booking| b.is_active()).await?;
        Ok(rank_usage(&bookings, span, limit))
    }

    /// Fleet counters at the clock's current instant.
    pub async fn dashboard(&self) -> Result<Dashboard, EngineError> {
        let now = self.now();
        let vehicles: Vec<Vehicle> = self.find(|v: &Vehicle| !v.is_retired).await?;
        let running = vehicles
            .iter()
            .filter(|v| classify(v, now) == VehicleState::Running)
            .count();
        Ok(Dashboard {
            running,
            on_yard: vehicles.len() - running,
            upcoming_bookings: self.upcoming_bookings().await?.len(),
            active_bookings: self.active_bookings().await?.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vehicle(name: &str) -> VehicleSnapshot {
        VehicleSnapshot {
            id: Ulid::new(),
            name: name.into(),
            registration: "KL-07-0001".into(),
        }
    }

    fn booking(vehicle: &VehicleSnapshot, start: &str, end: &str, total: i64, advance: i64) -> Booking {
        Booking {
            id: Ulid::new(),
            version: 1,
            span: timecodec::parse_span(start, end).unwrap(),
            vehicle: vehicle.clone(),
            customer: CustomerSnapshot {
                id: Ulid::new(),
                name: "Anu".into(),
                phone: "9".into(),
            },
            staff: StaffSnapshot {
                id: Ulid::new(),
                name: "Ravi".into(),
            },
            financials: Financials {
                total: Decimal::from(total),
                advance_paid: Decimal::from(advance),
                ..Financials::default()
            },
            distance_covered: 0,
            end_odometer: None,
            status: BookingStatus::Active,
            is_distance_reconciled: false,
            is_invoiced: false,
            needs_replication_repair: false,
            repair_links: Vec::new(),
            created_at: 0,
            cancelled_by: None,
        }
    }

    #[test]
    fn monthly_totals_use_local_month_boundaries() {
        let swift = vehicle("Swift");
        let innova = vehicle("Innova");
        let mut cancelled = booking(&swift, "10-06-2024 10:00 AM", "11-06-2024 10:00 AM", 999, 0);
        cancelled.status = BookingStatus::Cancelled;
        let bookings = vec![
            booking(&swift, "01-06-2024 12:00 AM", "02-06-2024 10:00 AM", 3000, 1000),
            booking(&swift, "15-06-2024 10:00 AM", "16-06-2024 10:00 AM", 2000, 2000),
            booking(&innova, "30-06-2024 11:59 PM", "02-07-2024 10:00 AM", 4000, 500),
            booking(&innova, "31-05-2024 11:59 PM", "01-06-2024 10:00 AM", 7000, 0),
            booking(&innova, "01-07-2024 12:00 AM", "02-07-2024 10:00 AM", 7000, 0),
            cancelled,
        ];

        let june = timecodec::month_span(2024, 6).unwrap();
        let s = summarize(&bookings, june, 2024, 6);
        assert_eq!(s.booking_count, 3);
        assert_eq!(s.total, Decimal::from(9000));
        assert_eq!(s.advance_paid, Decimal::from(3500));
        assert_eq!(s.outstanding, Decimal::from(5500));
        assert_eq!(s.by_vehicle.len(), 2);
        assert_eq!(s.by_vehicle[0].vehicle.name, "Swift");
        assert_eq!(s.by_vehicle[0].total, Decimal::from(5000));
        assert_eq!(s.by_vehicle[1].booking_count, 1);
    }

    #[test]
    fn usage_counts_bookings_touching_the_month() {
        let swift = vehicle("Swift");
        let innova = vehicle("Innova");
        let bookings = vec![
            booking(&swift, "31-05-2024 10:00 AM", "01-06-2024 10:00 AM", 1, 0),
            booking(&swift, "10-06-2024 10:00 AM", "11-06-2024 10:00 AM", 1, 0),
            booking(&innova, "30-06-2024 10:00 AM", "01-07-2024 10:00 AM", 1, 0),
            booking(&innova, "10-07-2024 10:00 AM", "11-07-2024 10:00 AM", 1, 0),
        ];
        let june = timecodec::month_span(2024, 6).unwrap();

        let ranked = rank_usage(&bookings, june, 10);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].vehicle.name, "Swift");
        assert_eq!(ranked[0].booking_count, 2);
        assert_eq!(ranked[1].booking_count, 1);

        assert_eq!(rank_usage(&bookings, june, 1).len(), 1);
    }
}
