use crate::domain::types::Money;
use crate::error::{BookingError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

pub const DEFAULT_HOURLY_RATE: Decimal = dec!(10.00);

const MILLIS_PER_HOUR: i64 = 3_600_000;

/// Price breakdown for one booking interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub billable_hours: i64,
    pub base: Money,
    pub membership_discount: Money,
    pub promotion_discount: Money,
    pub total: Money,
}

/// Duration-based pricing with compounding discounts.
///
/// The membership discount is taken off the base first and the promotion is
/// applied to what remains; the two percentages are never summed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingCalculator {
    hourly_rate: Money,
}

impl Default for PricingCalculator {
    fn default() -> Self {
        Self {
            hourly_rate: Money::from_decimal(DEFAULT_HOURLY_RATE),
        }
    }
}

impl PricingCalculator {
    pub fn new(hourly_rate: Money) -> Result<Self> {
        if hourly_rate.as_decimal() < Decimal::ZERO {
            return Err(BookingError::ValidationError {
                field: "hourly_rate".to_string(),
                message: format!("must not be negative, got {}", hourly_rate),
            });
        }
        Ok(Self { hourly_rate })
    }

    pub fn hourly_rate(&self) -> Money {
        self.hourly_rate
    }

    /// Whole hours billed for `[start, end)`: any started hour counts, and
    /// at least one hour is always billed.
    pub fn billable_hours(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<i64> {
        let millis = (end - start).num_milliseconds();
        if millis <= 0 {
            return Err(BookingError::InvalidDuration);
        }

        let hours = (millis + MILLIS_PER_HOUR - 1) / MILLIS_PER_HOUR;
        Ok(hours.max(1))
    }

    pub fn quote(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        membership_rate: Decimal,
        promotion_rate: Decimal,
    ) -> Result<PriceQuote> {
        Self::check_rate(membership_rate)?;
        Self::check_rate(promotion_rate)?;

        let hours = Self::billable_hours(start, end)?;
        let base = self.hourly_rate.as_decimal() * Decimal::from(hours);

        let membership_discount = base * membership_rate / Decimal::ONE_HUNDRED;
        let after_membership = base - membership_discount;

        let promotion_discount = after_membership * promotion_rate / Decimal::ONE_HUNDRED;
        let total = (after_membership - promotion_discount).max(Decimal::ZERO);

        Ok(PriceQuote {
            billable_hours: hours,
            base: Money::from_decimal(base),
            membership_discount: Money::from_decimal(membership_discount),
            promotion_discount: Money::from_decimal(promotion_discount),
            total: Money::from_decimal(total),
        })
    }

    pub fn price(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        membership_rate: Decimal,
        promotion_rate: Decimal,
    ) -> Result<Money> {
        Ok(self
            .quote(start, end, membership_rate, promotion_rate)?
            .total)
    }

    fn check_rate(rate: Decimal) -> Result<()> {
        if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED {
            return Err(BookingError::InvalidDiscountRate { rate });
        }
        Ok(())
    }
}
