pub mod billing;
pub mod bookings;
pub mod catalog;
pub mod connection;
pub mod memory;
pub mod postgres;
pub mod vehicles;

pub use billing::BillingLedger;
pub use bookings::BookingLedger;
pub use catalog::{SqlMembershipCatalog, SqlPromotionCatalog, SqlUserDirectory};
pub use connection::DatabaseConnection;
pub use memory::{FailPoint, InMemoryBookingStore};
pub use postgres::SqlBookingStore;
pub use vehicles::VehicleRegistry;

use crate::domain::bookings::{BillingStatementLine, BookingView, RentalHistoryEntry};
use crate::domain::types::{BookingId, UserId, VehicleId};
use crate::domain::vehicles::Vehicle;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Unit of work spanning the booking, vehicle and billing tables.
///
/// Nothing written through a transaction is visible to other callers until
/// `commit` succeeds. Dropping an uncommitted transaction discards it.
#[async_trait]
pub trait BookingTransaction: BookingLedger + VehicleRegistry + BillingLedger + Send {
    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn BookingTransaction>>;

    /// Active bookings of a user, ordered by start time ascending.
    async fn active_booking_views(&self, user_id: &UserId) -> Result<Vec<BookingView>>;

    /// Completed bookings of a user, most recently updated first.
    async fn rental_history(&self, user_id: &UserId) -> Result<Vec<RentalHistoryEntry>>;

    async fn billing_statement(&self, user_id: &UserId) -> Result<Vec<BillingStatementLine>>;

    /// Active bookings whose end time is at or before `now`.
    async fn elapsed_active_bookings(&self, now: DateTime<Utc>) -> Result<Vec<BookingId>>;

    async fn available_vehicles(&self, min_charge_level: u8) -> Result<Vec<Vehicle>>;

    async fn get_vehicle(&self, vehicle_id: &VehicleId) -> Result<Option<Vehicle>>;
}
