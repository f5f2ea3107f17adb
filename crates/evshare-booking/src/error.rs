//! Error types for the booking engine

use rust_decimal::Decimal;
use thiserror::Error;

/// Coarse classification surfaced to the request-serving layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    Conflict,
    Internal,
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("User not found: {id}")]
    UserNotFound { id: String },

    #[error("Vehicle not found: {id}")]
    VehicleNotFound { id: String },

    /// Also returned when the booking exists but belongs to another user.
    #[error("Booking not found or not owned by caller: {id}")]
    BookingNotFound { id: String },

    #[error("Billing record not found for booking {booking_id}")]
    BillingNotFound { booking_id: String },

    #[error("Booking duration must be at least one second")]
    InvalidDuration,

    #[error("Invalid time range: {message}")]
    InvalidTimeRange { message: String },

    #[error("Invalid timestamp '{value}', expected YYYY-MM-DD HH:MM:SS")]
    InvalidTimestamp { value: String },

    #[error("Validation error on field '{field}': {message}")]
    ValidationError { field: String, message: String },

    #[error("Vehicle {id} is not available")]
    VehicleNotAvailable { id: String },

    #[error("Booking limit exceeded: {active} active bookings, tier limit is {limit}")]
    BookingLimitExceeded { active: u64, limit: u32 },

    #[error("No changes detected in booking details")]
    NoChangeDetected,

    #[error("Booking has already ended and can no longer be modified")]
    ModificationWindowClosed,

    #[error("Start time cannot change once the booking has started")]
    StartTimeLocked,

    #[error("Booking cannot be cancelled while it is in progress")]
    ActiveWindowCancelNotAllowed,

    #[error("Booking {id} is {status}, expected Active")]
    BookingNotActive { id: String, status: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("No membership benefits configured for tier '{tier}'")]
    MembershipTierNotFound { tier: String },

    #[error("Invalid discount rate {rate}, expected a percentage between 0 and 100")]
    InvalidDiscountRate { rate: Decimal },

    #[error("Invariant violation: {message}")]
    InvariantViolation { message: String },

    #[error("Database error during {operation}: {source}")]
    DatabaseError {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

pub type Result<T> = std::result::Result<T, BookingError>;

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BookingError::UserNotFound { .. }
            | BookingError::VehicleNotFound { .. }
            | BookingError::BookingNotFound { .. }
            | BookingError::BillingNotFound { .. } => ErrorKind::NotFound,

            BookingError::InvalidDuration
            | BookingError::InvalidTimeRange { .. }
            | BookingError::InvalidTimestamp { .. }
            | BookingError::ValidationError { .. } => ErrorKind::InvalidInput,

            BookingError::VehicleNotAvailable { .. }
            | BookingError::BookingLimitExceeded { .. }
            | BookingError::NoChangeDetected
            | BookingError::ModificationWindowClosed
            | BookingError::StartTimeLocked
            | BookingError::ActiveWindowCancelNotAllowed
            | BookingError::BookingNotActive { .. }
            | BookingError::InvalidStateTransition { .. } => ErrorKind::Conflict,

            BookingError::MembershipTierNotFound { .. }
            | BookingError::InvalidDiscountRate { .. }
            | BookingError::InvariantViolation { .. }
            | BookingError::DatabaseError { .. }
            | BookingError::Configuration { .. } => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code for the request-serving layer.
    pub fn error_code(&self) -> &'static str {
        match self {
            BookingError::UserNotFound { .. } => "EVSHARE_USER_NOT_FOUND",
            BookingError::VehicleNotFound { .. } => "EVSHARE_VEHICLE_NOT_FOUND",
            BookingError::BookingNotFound { .. } => "EVSHARE_BOOKING_NOT_FOUND",
            BookingError::BillingNotFound { .. } => "EVSHARE_BILLING_NOT_FOUND",
            BookingError::InvalidDuration => "EVSHARE_INVALID_DURATION",
            BookingError::InvalidTimeRange { .. } => "EVSHARE_INVALID_TIME_RANGE",
            BookingError::InvalidTimestamp { .. } => "EVSHARE_INVALID_TIMESTAMP",
            BookingError::ValidationError { .. } => "EVSHARE_VALIDATION_ERROR",
            BookingError::VehicleNotAvailable { .. } => "EVSHARE_VEHICLE_NOT_AVAILABLE",
            BookingError::BookingLimitExceeded { .. } => "EVSHARE_BOOKING_LIMIT_EXCEEDED",
            BookingError::NoChangeDetected => "EVSHARE_NO_CHANGE_DETECTED",
            BookingError::ModificationWindowClosed => "EVSHARE_MODIFICATION_WINDOW_CLOSED",
            BookingError::StartTimeLocked => "EVSHARE_START_TIME_LOCKED",
            BookingError::ActiveWindowCancelNotAllowed => "EVSHARE_CANCEL_IN_PROGRESS",
            BookingError::BookingNotActive { .. } => "EVSHARE_BOOKING_NOT_ACTIVE",
            BookingError::InvalidStateTransition { .. } => "EVSHARE_INVALID_STATE_TRANSITION",
            BookingError::MembershipTierNotFound { .. } => "EVSHARE_MEMBERSHIP_TIER_NOT_FOUND",
            BookingError::InvalidDiscountRate { .. } => "EVSHARE_INVALID_DISCOUNT_RATE",
            BookingError::InvariantViolation { .. } => "EVSHARE_INVARIANT_VIOLATION",
            BookingError::DatabaseError { .. } => "EVSHARE_DATABASE_ERROR",
            BookingError::Configuration { .. } => "EVSHARE_CONFIG_ERROR",
        }
    }

    pub fn is_client_error(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Internal)
    }

    pub(crate) fn database(operation: &str, source: sqlx::Error) -> Self {
        BookingError::DatabaseError {
            operation: operation.to_string(),
            source: Box::new(source),
        }
    }
}
