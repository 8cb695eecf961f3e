use std::sync::Arc;

use futures::StreamExt;
use tracing::info;
use ulid::Ulid;

use crate::limits::MAX_BATCH_SIZE;
use crate::model::*;

use super::conflict::validate_name;
use super::{BulkReport, Committed, Engine, EngineError};

impl Engine {
    pub async fn add_vehicle(&self, mut vehicle: Vehicle) -> Result<Vehicle, EngineError> {
        validate_name(&vehicle.name)?;
        validate_name(&vehicle.registration)?;
        validate_name(&vehicle.manufacturer)?;
        vehicle.version = 0;
        vehicle.booking_refs.clear();
        vehicle.is_retired = false;
        let vehicle = self.save(vehicle).await?;
        info!(vehicle_id = %vehicle.id, name = %vehicle.name, "vehicle added");
        Ok(vehicle)
    }

    pub async fn add_customer(&self, mut customer: Customer) -> Result<Customer, EngineError> {
        validate_name(&customer.name)?;
        validate_name(&customer.phone)?;
        customer.version = 0;
        customer.booking_refs.clear();
        customer.is_retired = false;
        let customer = self.save(customer).await?;
        info!(customer_id = %customer.id, "customer added");
        Ok(customer)
    }

    pub async fn add_staff(&self, mut staff: StaffMember) -> Result<StaffMember, EngineError> {
        validate_name(&staff.name)?;
        validate_name(&staff.username)?;
        staff.version = 0;
        staff.booking_refs.clear();
        staff.is_retired = false;
        let staff = self.save(staff).await?;
        info!(staff_id = %staff.id, username = %staff.username, "staff added");
        Ok(staff)
    }

    /// Soft-delete a vehicle, customer or staff member. Existing booking refs
    /// stay; the record just can't be linked to new bookings. Idempotent.
    pub async fn retire(self: &Arc<Self>, kind: EntityKind, id: Ulid) -> Result<(), EngineError> {
        self.run_detached(move |engine| async move { engine.retire_inner(kind, id).await.map(|_| ()) })
            .await
    }

    pub async fn retire_many(
        self: &Arc<Self>,
        kind: EntityKind,
        ids: Vec<Ulid>,
    ) -> Result<BulkReport, EngineError> {
        if ids.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        self.run_detached(move |engine| async move {
            let outcomes: Vec<_> = futures::stream::iter(ids)
                .then(|id| {
                    let engine = Arc::clone(&engine);
                    async move { (id, engine.retire_inner(kind, id).await) }
                })
                .collect()
                .await;
            let mut report = BulkReport::default();
            for (id, outcome) in outcomes {
                report.record(id, outcome);
            }
            Ok(report)
        })
        .await
    }

    async fn retire_inner(&self, kind: EntityKind, id: Ulid) -> Result<Committed<()>, EngineError> {
        if !matches!(kind, EntityKind::Vehicle | EntityKind::Customer | EntityKind::Staff) {
            return Err(EngineError::NotRetirable(kind));
        }
        let mut entity = self.store.load(kind, id).await?;
        let newly_retired = match entity.as_linked_mut() {
            None => return Err(EngineError::NotRetirable(kind)),
            Some(linked) if linked.is_retired() => false,
            Some(linked) => {
                linked.set_retired();
                true
            }
        };
        if newly_retired {
            self.store.save(entity).await?;
            info!(%kind, %id, "retired");
        }
        Ok(Committed::clean(()))
    }
}
