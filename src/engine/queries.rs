use ulid::Ulid;

use crate::model::*;

use super::availability::{
    BookingWindow, FleetPartition, VehicleState, active_now, classify, fleet_partition, upcoming,
};
use super::{Engine, EngineError};

// Read models. Each loads a snapshot and evaluates it at the clock's now;
// a slightly stale snapshot is acceptable.
impl Engine {
    pub async fn vehicle_state(&self, vehicle_id: Ulid) -> Result<VehicleState, EngineError> {
        let vehicle: Vehicle = self.load(vehicle_id).await?;
        Ok(classify(&vehicle, self.now()))
    }

    pub async fn fleet_partition(&self) -> Result<FleetPartition, EngineError> {
        let vehicles: Vec<Vehicle> = self.find(|v: &Vehicle| !v.is_retired).await?;
        Ok(fleet_partition(&vehicles, self.now()))
    }

    pub async fn upcoming_bookings(&self) -> Result<BookingWindow<Booking>, EngineError> {
        let now = self.now();
        let bookings: Vec<Booking> = self
            .find(|b: &Booking| b.is_active() && b.span.start > now)
            .await?;
        Ok(upcoming(bookings, now))
    }

    pub async fn active_bookings(&self) -> Result<BookingWindow<Booking>, EngineError> {
        let now = self.now();
        let bookings: Vec<Booking> = self
            .find(|b: &Booking| b.is_active() && b.span.contains_instant(now))
            .await?;
        Ok(active_now(bookings, now))
    }
}
