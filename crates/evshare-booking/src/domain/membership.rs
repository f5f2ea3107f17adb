use crate::domain::types::{MembershipTier, UserId};
use crate::error::{BookingError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Benefits attached to a membership tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipBenefit {
    pub tier: MembershipTier,
    /// Percentage in [0, 100]
    pub discount_rate: Decimal,
    pub priority_access: bool,
    /// Concurrent Active bookings the tier is entitled to
    pub booking_limit: u32,
}

impl MembershipBenefit {
    pub fn new(
        tier: MembershipTier,
        discount_rate: Decimal,
        priority_access: bool,
        booking_limit: u32,
    ) -> Result<Self> {
        if discount_rate < Decimal::ZERO || discount_rate > Decimal::ONE_HUNDRED {
            return Err(BookingError::InvalidDiscountRate {
                rate: discount_rate,
            });
        }

        Ok(Self {
            tier,
            discount_rate,
            priority_access,
            booking_limit,
        })
    }

    /// Rejects only once the active count is strictly greater than the
    /// limit, so a user holding exactly `booking_limit` bookings may still
    /// open one more.
    pub fn exceeds_limit(&self, active_bookings: u64) -> bool {
        active_bookings > u64::from(self.booking_limit)
    }
}

/// Read-only lookup of tier benefits
#[async_trait]
pub trait MembershipCatalog: Send + Sync {
    async fn benefits_for_tier(&self, tier: &MembershipTier) -> Result<Option<MembershipBenefit>>;
}

/// Resolves a user to their current membership tier. Implemented by the
/// user-management collaborator; the engine never mutates users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn membership_tier(&self, user_id: &UserId) -> Result<Option<MembershipTier>>;
}

/// Fixed catalog, typically seeded from reference data at startup
#[derive(Debug, Clone, Default)]
pub struct StaticMembershipCatalog {
    benefits: HashMap<MembershipTier, MembershipBenefit>,
}

impl StaticMembershipCatalog {
    pub fn new(benefits: Vec<MembershipBenefit>) -> Self {
        let benefits = benefits
            .into_iter()
            .map(|benefit| (benefit.tier.clone(), benefit))
            .collect();
        Self { benefits }
    }
}

#[async_trait]
impl MembershipCatalog for StaticMembershipCatalog {
    async fn benefits_for_tier(&self, tier: &MembershipTier) -> Result<Option<MembershipBenefit>> {
        Ok(self.benefits.get(tier).cloned())
    }
}

/// In-memory user directory for development/testing
#[derive(Debug, Default, Clone)]
pub struct InMemoryUserDirectory {
    users: Arc<RwLock<HashMap<UserId, MembershipTier>>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, user_id: UserId, tier: MembershipTier) {
        self.users.write().await.insert(user_id, tier);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn membership_tier(&self, user_id: &UserId) -> Result<Option<MembershipTier>> {
        Ok(self.users.read().await.get(user_id).cloned())
    }
}
