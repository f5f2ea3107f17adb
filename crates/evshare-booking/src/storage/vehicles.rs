use crate::domain::types::VehicleId;
use crate::domain::vehicles::{Vehicle, VehicleCondition};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Vehicle status operations scoped to an open transaction.
#[async_trait]
pub trait VehicleRegistry: Send {
    /// Fails with `VehicleNotFound` for unknown ids.
    async fn is_available(&mut self, vehicle_id: &VehicleId) -> Result<bool>;

    /// Claims the vehicle only if it is currently Available; fails with
    /// `VehicleNotAvailable` otherwise.
    async fn mark_booked(&mut self, vehicle_id: &VehicleId, now: DateTime<Utc>) -> Result<()>;

    async fn mark_available(&mut self, vehicle_id: &VehicleId, now: DateTime<Utc>) -> Result<()>;

    async fn update_condition(
        &mut self,
        vehicle_id: &VehicleId,
        condition: &VehicleCondition,
        now: DateTime<Utc>,
    ) -> Result<Vehicle>;
}
