//! PostgreSQL-backed read-only collaborators: user tiers, tier benefits and
//! promotions.

use crate::domain::membership::{MembershipBenefit, MembershipCatalog, UserDirectory};
use crate::domain::promotions::PromotionCatalog;
use crate::domain::types::{MembershipTier, UserId};
use crate::error::{BookingError, Result};
use crate::storage::DatabaseConnection;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use std::sync::Arc;

pub struct SqlUserDirectory {
    connection: Arc<DatabaseConnection>,
}

impl SqlUserDirectory {
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl UserDirectory for SqlUserDirectory {
    async fn membership_tier(&self, user_id: &UserId) -> Result<Option<MembershipTier>> {
        let tier: Option<String> =
            sqlx::query_scalar("SELECT membership_tier FROM users WHERE user_id = $1")
                .bind(user_id.value())
                .fetch_optional(self.connection.pool())
                .await
                .map_err(|e| BookingError::database("membership_tier", e))?;

        Ok(tier.map(MembershipTier::new))
    }
}

pub struct SqlMembershipCatalog {
    connection: Arc<DatabaseConnection>,
}

impl SqlMembershipCatalog {
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl MembershipCatalog for SqlMembershipCatalog {
    async fn benefits_for_tier(&self, tier: &MembershipTier) -> Result<Option<MembershipBenefit>> {
        let row = sqlx::query(
            r#"
            SELECT tier, discount_rate, priority_access, booking_limit
            FROM membership_benefits
            WHERE tier = $1
            "#,
        )
        .bind(tier.as_str())
        .fetch_optional(self.connection.pool())
        .await
        .map_err(|e| BookingError::database("benefits_for_tier", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let decode = |e| BookingError::database("benefits_for_tier", e);
        let booking_limit: i32 = row.try_get("booking_limit").map_err(decode)?;
        let booking_limit =
            u32::try_from(booking_limit).map_err(|_| BookingError::InvariantViolation {
                message: format!("tier '{}' has negative booking limit {}", tier, booking_limit),
            })?;

        MembershipBenefit::new(
            MembershipTier::new(row.try_get::<String, _>("tier").map_err(decode)?),
            row.try_get::<Decimal, _>("discount_rate").map_err(decode)?,
            row.try_get::<bool, _>("priority_access").map_err(decode)?,
            booking_limit,
        )
        .map(Some)
    }
}

pub struct SqlPromotionCatalog {
    connection: Arc<DatabaseConnection>,
}

impl SqlPromotionCatalog {
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl PromotionCatalog for SqlPromotionCatalog {
    async fn current_discount(&self, now: DateTime<Utc>) -> Result<Decimal> {
        let discount: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT discount_percentage
            FROM promotions
            WHERE expiry_date >= $1
            ORDER BY expiry_date ASC, promotion_id ASC
            LIMIT 1
            "#,
        )
        .bind(now)
        .fetch_optional(self.connection.pool())
        .await
        .map_err(|e| BookingError::database("current_discount", e))?;

        Ok(discount.unwrap_or(Decimal::ZERO))
    }
}
