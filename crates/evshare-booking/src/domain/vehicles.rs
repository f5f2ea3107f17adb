use crate::domain::types::{Cleanliness, VehicleId, VehicleStatus};
use crate::error::{BookingError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fleet charge threshold below which a vehicle is not offered for booking.
pub const DEFAULT_MIN_CHARGE_LEVEL: u8 = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub license_plate: String,
    pub location: String,
    /// Battery percentage, 0-100
    pub charge_level: u8,
    pub status: VehicleStatus,
    pub cleanliness: Cleanliness,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Vehicle {
    pub fn new(
        id: VehicleId,
        license_plate: impl Into<String>,
        location: impl Into<String>,
        charge_level: u8,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let condition = VehicleCondition {
            location: location.into(),
            charge_level,
            cleanliness: Cleanliness::Clean,
        };
        condition.validate()?;

        Ok(Self {
            id,
            license_plate: license_plate.into(),
            location: condition.location,
            charge_level,
            status: VehicleStatus::Available,
            cleanliness: condition.cleanliness,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_available(&self) -> bool {
        self.status == VehicleStatus::Available
    }

    /// Available and charged enough to be listed to riders.
    pub fn is_bookable(&self, min_charge_level: u8) -> bool {
        self.is_available() && self.charge_level >= min_charge_level
    }

    /// Applies a condition report. Status is never touched here.
    pub fn apply_condition(&mut self, condition: &VehicleCondition, now: DateTime<Utc>) {
        self.location = condition.location.clone();
        self.charge_level = condition.charge_level;
        self.cleanliness = condition.cleanliness;
        self.updated_at = now;
    }
}

/// Condition report filed by fleet staff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleCondition {
    pub location: String,
    pub charge_level: u8,
    pub cleanliness: Cleanliness,
}

impl VehicleCondition {
    pub fn validate(&self) -> Result<()> {
        if self.charge_level > 100 {
            return Err(BookingError::ValidationError {
                field: "charge_level".to_string(),
                message: format!("must be between 0 and 100, got {}", self.charge_level),
            });
        }
        if self.location.trim().is_empty() {
            return Err(BookingError::ValidationError {
                field: "location".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
