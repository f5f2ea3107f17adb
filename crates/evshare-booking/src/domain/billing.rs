use crate::domain::types::{BillingId, BookingId, Money, PaymentMethod, PaymentStatus};
use crate::error::{BookingError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Billing record, one per booking. Rows are updated in place and never
/// deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingRecord {
    pub id: BillingId,
    pub booking_id: BookingId,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub total_amount: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BillingRecord {
    pub fn new_pending(booking_id: BookingId, amount: Money, now: DateTime<Utc>) -> Self {
        Self {
            id: BillingId::new(),
            booking_id,
            payment_status: PaymentStatus::Pending,
            payment_method: PaymentMethod::Other,
            total_amount: amount,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces the amount after the booking interval changed.
    pub fn reprice(&mut self, amount: Money, now: DateTime<Utc>) -> Result<()> {
        if self.payment_status == PaymentStatus::Refunded {
            return Err(BookingError::InvariantViolation {
                message: format!(
                    "cannot reprice refunded billing record for booking {}",
                    self.booking_id
                ),
            });
        }
        self.total_amount = amount;
        self.updated_at = now;
        Ok(())
    }

    pub fn refund(&mut self, now: DateTime<Utc>) {
        self.payment_status = PaymentStatus::Refunded;
        self.total_amount = Money::zero();
        self.updated_at = now;
    }
}
