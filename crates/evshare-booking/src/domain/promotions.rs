use crate::error::{BookingError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Promotion {
    pub id: i64,
    pub name: String,
    /// Percentage in [0, 100]
    pub discount_percentage: Decimal,
    pub expires_at: DateTime<Utc>,
}

impl Promotion {
    pub fn new(
        id: i64,
        name: impl Into<String>,
        discount_percentage: Decimal,
        expires_at: DateTime<Utc>,
    ) -> Result<Self> {
        if discount_percentage < Decimal::ZERO || discount_percentage > Decimal::ONE_HUNDRED {
            return Err(BookingError::InvalidDiscountRate {
                rate: discount_percentage,
            });
        }

        Ok(Self {
            id,
            name: name.into(),
            discount_percentage,
            expires_at,
        })
    }

    /// A promotion stays eligible through its expiry instant.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.expires_at >= now
    }
}

/// Picks the eligible promotion that expires soonest; ties go to the lower id.
pub fn applicable_promotion(promotions: &[Promotion], now: DateTime<Utc>) -> Option<&Promotion> {
    promotions
        .iter()
        .filter(|p| p.is_eligible(now))
        .min_by_key(|p| (p.expires_at, p.id))
}

/// Read-only promotion lookup
#[async_trait]
pub trait PromotionCatalog: Send + Sync {
    /// Discount percentage to apply at `now`, or zero when nothing is eligible.
    async fn current_discount(&self, now: DateTime<Utc>) -> Result<Decimal>;
}

/// In-memory promotion catalog for development/testing
#[derive(Debug, Default, Clone)]
pub struct InMemoryPromotionCatalog {
    promotions: Arc<RwLock<Vec<Promotion>>>,
}

impl InMemoryPromotionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_promotions(promotions: Vec<Promotion>) -> Self {
        Self {
            promotions: Arc::new(RwLock::new(promotions)),
        }
    }

    pub async fn add(&self, promotion: Promotion) {
        self.promotions.write().await.push(promotion);
    }
}

#[async_trait]
impl PromotionCatalog for InMemoryPromotionCatalog {
    async fn current_discount(&self, now: DateTime<Utc>) -> Result<Decimal> {
        let promotions = self.promotions.read().await;
        Ok(applicable_promotion(&promotions, now)
            .map(|p| p.discount_percentage)
            .unwrap_or(Decimal::ZERO))
    }
}
