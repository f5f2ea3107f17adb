//! Transport-free facade over the booking engine.
//!
//! Timestamps cross this boundary as `YYYY-MM-DD HH:MM:SS` strings in UTC;
//! everything past it works with `DateTime<Utc>`.

use crate::domain::bookings::{BillingStatementLine, BookingView, RentalHistoryEntry};
use crate::domain::engine::{BookingEngine, BookingOperations};
use crate::domain::membership::MembershipBenefit;
use crate::domain::types::{parse_timestamp, BookingId, Cleanliness, Money, UserId, VehicleId};
use crate::domain::vehicles::{Vehicle, VehicleCondition};
use crate::error::{BookingError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingCreated {
    pub booking_id: BookingId,
    pub total_amount: Money,
}

#[derive(Clone)]
pub struct BookingApi {
    engine: Arc<BookingEngine>,
}

impl BookingApi {
    pub fn new(engine: Arc<BookingEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<BookingEngine> {
        &self.engine
    }

    pub async fn create_booking(
        &self,
        user_id: UserId,
        vehicle_id: VehicleId,
        start: &str,
        end: &str,
    ) -> Result<BookingCreated> {
        let start = parse_timestamp(start)?;
        let end = parse_timestamp(end)?;

        let booking = self
            .engine
            .create_booking(user_id, vehicle_id, start, end)
            .await?;

        Ok(BookingCreated {
            booking_id: booking.id,
            total_amount: booking.total_cost.unwrap_or_default(),
        })
    }

    pub async fn modify_booking(
        &self,
        booking_id: &str,
        user_id: UserId,
        new_start: &str,
        new_end: &str,
    ) -> Result<()> {
        let booking_id = parse_booking_id(booking_id)?;
        let new_start = parse_timestamp(new_start)?;
        let new_end = parse_timestamp(new_end)?;

        self.engine
            .modify_booking(&booking_id, &user_id, new_start, new_end)
            .await?;
        Ok(())
    }

    pub async fn cancel_booking(&self, booking_id: &str, user_id: UserId) -> Result<()> {
        let booking_id = parse_booking_id(booking_id)?;
        self.engine.cancel_booking(&booking_id, &user_id).await?;
        Ok(())
    }

    pub async fn list_active_bookings(&self, user_id: UserId) -> Result<Vec<BookingView>> {
        self.engine.list_active_bookings(&user_id).await
    }

    pub async fn available_vehicles(&self) -> Result<Vec<Vehicle>> {
        self.engine.available_vehicles().await
    }

    pub async fn rental_history(&self, user_id: UserId) -> Result<Vec<RentalHistoryEntry>> {
        self.engine.rental_history(&user_id).await
    }

    pub async fn billing_statement(&self, user_id: UserId) -> Result<Vec<BillingStatementLine>> {
        self.engine.billing_statement(&user_id).await
    }

    pub async fn membership_benefits(&self, user_id: UserId) -> Result<MembershipBenefit> {
        self.engine.membership_benefits(&user_id).await
    }

    pub async fn update_vehicle_condition(
        &self,
        vehicle_id: VehicleId,
        location: &str,
        charge_level: u8,
        cleanliness: &str,
    ) -> Result<Vehicle> {
        let cleanliness =
            cleanliness
                .parse::<Cleanliness>()
                .map_err(|_| BookingError::ValidationError {
                    field: "cleanliness".to_string(),
                    message: format!("expected Clean, Moderate or Dirty, got '{}'", cleanliness),
                })?;

        self.engine
            .update_vehicle_condition(
                &vehicle_id,
                VehicleCondition {
                    location: location.to_string(),
                    charge_level,
                    cleanliness,
                },
            )
            .await
    }
}

/// An id that does not parse cannot name an existing booking.
fn parse_booking_id(raw: &str) -> Result<BookingId> {
    raw.trim()
        .parse::<BookingId>()
        .map_err(|_| BookingError::BookingNotFound {
            id: raw.to_string(),
        })
}
