use crate::domain::bookings::Booking;
use crate::domain::types::{BookingId, UserId};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait BookingLedger: Send {
    async fn insert_booking(&mut self, booking: &Booking) -> Result<()>;

    /// Loads a booking and holds it for the rest of the transaction.
    async fn lock_booking(&mut self, booking_id: &BookingId) -> Result<Option<Booking>>;

    async fn update_booking(&mut self, booking: &Booking) -> Result<()>;

    async fn count_active_bookings(&mut self, user_id: &UserId) -> Result<u64>;
}
