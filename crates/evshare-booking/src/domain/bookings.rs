use crate::domain::types::{
    wire_timestamp, BookingId, BookingStatus, Money, PaymentMethod, PaymentStatus, UserId,
    VehicleId, VehicleStatus,
};
use crate::error::{BookingError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub user_id: UserId,
    pub vehicle_id: VehicleId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: BookingStatus,
    /// None until priced
    pub total_cost: Option<Money>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn new(
        user_id: UserId,
        vehicle_id: VehicleId,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        total_cost: Money,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        ensure_ordered(start_time, end_time)?;

        Ok(Self {
            id: BookingId::new(),
            user_id,
            vehicle_id,
            start_time,
            end_time,
            status: BookingStatus::Active,
            total_cost: Some(total_cost),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_owned_by(&self, user_id: &UserId) -> bool {
        self.user_id == *user_id
    }

    pub fn is_active(&self) -> bool {
        self.status == BookingStatus::Active
    }

    pub fn window(&self, now: DateTime<Utc>) -> BookingWindow {
        BookingWindow::classify(self.start_time, self.end_time, now)
    }

    pub fn transition_to(&mut self, next: BookingStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(BookingError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn reschedule(
        &mut self,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        total_cost: Money,
        now: DateTime<Utc>,
    ) -> Result<()> {
        ensure_ordered(start_time, end_time)?;
        self.start_time = start_time;
        self.end_time = end_time;
        self.total_cost = Some(total_cost);
        self.updated_at = now;
        Ok(())
    }
}

fn ensure_ordered(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
    if end <= start {
        return Err(BookingError::InvalidTimeRange {
            message: "end time must be after start time".to_string(),
        });
    }
    Ok(())
}

/// Where `now` falls relative to a booking interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingWindow {
    Upcoming,
    InProgress,
    Elapsed,
}

impl BookingWindow {
    pub fn classify(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if now < start {
            BookingWindow::Upcoming
        } else if now < end {
            BookingWindow::InProgress
        } else {
            BookingWindow::Elapsed
        }
    }
}

/// Active booking joined with its vehicle and billing amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingView {
    pub booking_id: BookingId,
    pub vehicle_id: VehicleId,
    pub license_plate: String,
    pub location: String,
    pub charge_level: u8,
    pub vehicle_status: VehicleStatus,
    #[serde(with = "wire_timestamp")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "wire_timestamp")]
    pub end_time: DateTime<Utc>,
    pub total_amount: Money,
}

/// Completed booking as shown in a user's rental history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RentalHistoryEntry {
    pub booking_id: BookingId,
    pub vehicle_id: VehicleId,
    pub license_plate: String,
    #[serde(with = "wire_timestamp")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "wire_timestamp")]
    pub end_time: DateTime<Utc>,
    pub total_cost: Money,
    #[serde(with = "wire_timestamp")]
    pub completed_at: DateTime<Utc>,
}

/// One line of a user's billing statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingStatementLine {
    pub booking_id: BookingId,
    pub booking_status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub total_amount: Money,
    #[serde(with = "wire_timestamp")]
    pub billed_at: DateTime<Utc>,
}
