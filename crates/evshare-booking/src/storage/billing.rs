use crate::domain::billing::BillingRecord;
use crate::domain::types::BookingId;
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait BillingLedger: Send {
    async fn open_billing(&mut self, record: &BillingRecord) -> Result<()>;

    async fn lock_billing(&mut self, booking_id: &BookingId) -> Result<Option<BillingRecord>>;

    async fn update_billing(&mut self, record: &BillingRecord) -> Result<()>;
}
