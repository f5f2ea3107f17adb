use crate::domain::billing::BillingRecord;
use crate::domain::bookings::{
    BillingStatementLine, Booking, BookingView, BookingWindow, RentalHistoryEntry,
};
use crate::domain::clock::Clock;
use crate::domain::membership::{MembershipBenefit, MembershipCatalog, UserDirectory};
use crate::domain::pricing::{PriceQuote, PricingCalculator};
use crate::domain::promotions::PromotionCatalog;
use crate::domain::types::{BookingId, BookingStatus, UserId, VehicleId};
use crate::domain::vehicles::{Vehicle, VehicleCondition, DEFAULT_MIN_CHARGE_LEVEL};
use crate::error::{BookingError, Result};
use crate::storage::{BookingStore, BookingTransaction};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Booking lifecycle operations
#[async_trait]
pub trait BookingOperations: Send + Sync {
    async fn create_booking(
        &self,
        user_id: UserId,
        vehicle_id: VehicleId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Booking>;

    async fn modify_booking(
        &self,
        booking_id: &BookingId,
        user_id: &UserId,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
    ) -> Result<Booking>;

    async fn cancel_booking(&self, booking_id: &BookingId, user_id: &UserId) -> Result<Booking>;

    async fn list_active_bookings(&self, user_id: &UserId) -> Result<Vec<BookingView>>;
}

/// Membership and promotion discounts in effect at `now`
struct PricingTerms {
    benefit: MembershipBenefit,
    promotion_rate: Decimal,
    now: DateTime<Utc>,
}

/// Orchestrates booking, vehicle and billing state. Every mutating operation
/// runs as a single store transaction.
pub struct BookingEngine {
    store: Arc<dyn BookingStore>,
    users: Arc<dyn UserDirectory>,
    memberships: Arc<dyn MembershipCatalog>,
    promotions: Arc<dyn PromotionCatalog>,
    pricing: PricingCalculator,
    clock: Arc<dyn Clock>,
    min_charge_level: u8,
}

impl BookingEngine {
    pub fn new(
        store: Arc<dyn BookingStore>,
        users: Arc<dyn UserDirectory>,
        memberships: Arc<dyn MembershipCatalog>,
        promotions: Arc<dyn PromotionCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            users,
            memberships,
            promotions,
            pricing: PricingCalculator::default(),
            clock,
            min_charge_level: DEFAULT_MIN_CHARGE_LEVEL,
        }
    }

    pub fn with_pricing(mut self, pricing: PricingCalculator) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_min_charge_level(mut self, min_charge_level: u8) -> Self {
        self.min_charge_level = min_charge_level;
        self
    }

    pub fn store(&self) -> Arc<dyn BookingStore> {
        self.store.clone()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Vehicles that are Available and charged to at least the fleet minimum.
    pub async fn available_vehicles(&self) -> Result<Vec<Vehicle>> {
        self.store.available_vehicles(self.min_charge_level).await
    }

    pub async fn rental_history(&self, user_id: &UserId) -> Result<Vec<RentalHistoryEntry>> {
        self.store.rental_history(user_id).await
    }

    pub async fn billing_statement(&self, user_id: &UserId) -> Result<Vec<BillingStatementLine>> {
        self.store.billing_statement(user_id).await
    }

    pub async fn membership_benefits(&self, user_id: &UserId) -> Result<MembershipBenefit> {
        self.benefit_for(user_id).await
    }

    /// Records a fleet condition report. Vehicle status is left untouched.
    pub async fn update_vehicle_condition(
        &self,
        vehicle_id: &VehicleId,
        condition: VehicleCondition,
    ) -> Result<Vehicle> {
        condition.validate()?;
        let now = self.clock.now();

        let mut tx = self.store.begin().await?;
        let outcome = tx.update_condition(vehicle_id, &condition, now).await;
        let vehicle = Self::finish("update_vehicle_condition", tx, outcome).await?;

        info!(
            "Updated condition of vehicle {}: location={}, charge={}, cleanliness={}",
            vehicle.id, vehicle.location, vehicle.charge_level, vehicle.cleanliness
        );
        Ok(vehicle)
    }

    async fn benefit_for(&self, user_id: &UserId) -> Result<MembershipBenefit> {
        let tier = self
            .users
            .membership_tier(user_id)
            .await?
            .ok_or_else(|| BookingError::UserNotFound {
                id: user_id.to_string(),
            })?;

        self.memberships
            .benefits_for_tier(&tier)
            .await?
            .ok_or_else(|| {
                error!("User {} has tier '{}' with no benefit row", user_id, tier);
                BookingError::MembershipTierNotFound {
                    tier: tier.to_string(),
                }
            })
    }

    /// Resolved before a store transaction opens, so the transaction never
    /// waits on a second connection for catalog reads.
    async fn terms_for(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<PricingTerms> {
        let benefit = self.benefit_for(user_id).await?;
        let promotion_rate = self.promotions.current_discount(now).await?;
        Ok(PricingTerms {
            benefit,
            promotion_rate,
            now,
        })
    }

    fn quote_for(
        &self,
        terms: &PricingTerms,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PriceQuote> {
        let quote = self.pricing.quote(
            start,
            end,
            terms.benefit.discount_rate,
            terms.promotion_rate,
        )?;

        debug!(
            "Priced {}h for tier {}: base={}, membership=-{}, promotion=-{}, total={}",
            quote.billable_hours,
            terms.benefit.tier,
            quote.base,
            quote.membership_discount,
            quote.promotion_discount,
            quote.total
        );
        Ok(quote)
    }

    /// Commits on success, otherwise rolls back and hands back the step's
    /// error.
    async fn finish<T: Send>(
        operation: &str,
        mut tx: Box<dyn BookingTransaction>,
        outcome: Result<T>,
    ) -> Result<T> {
        match outcome {
            Ok(value) => {
                if let Err(e) = tx.commit().await {
                    error!("Failed to commit {}: {}", operation, e);
                    return Err(e);
                }
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(
                        "Invariant violation: rollback of {} failed ({}) after error: {}",
                        operation, rollback_err, e
                    );
                }
                Err(e)
            }
        }
    }

    async fn load_owned(
        tx: &mut dyn BookingTransaction,
        booking_id: &BookingId,
        user_id: &UserId,
    ) -> Result<Booking> {
        match tx.lock_booking(booking_id).await? {
            Some(booking) if booking.is_owned_by(user_id) => Ok(booking),
            Some(_) => {
                warn!(
                    "User {} attempted to access booking {} owned by another user",
                    user_id, booking_id
                );
                Err(BookingError::BookingNotFound {
                    id: booking_id.to_string(),
                })
            }
            None => Err(BookingError::BookingNotFound {
                id: booking_id.to_string(),
            }),
        }
    }

    fn ensure_active(booking: &Booking) -> Result<()> {
        if !booking.is_active() {
            return Err(BookingError::BookingNotActive {
                id: booking.id.to_string(),
                status: booking.status.to_string(),
            });
        }
        Ok(())
    }

    async fn load_billing(
        tx: &mut dyn BookingTransaction,
        booking_id: &BookingId,
    ) -> Result<BillingRecord> {
        tx.lock_billing(booking_id).await?.ok_or_else(|| {
            error!("Booking {} has no billing record", booking_id);
            BookingError::InvariantViolation {
                message: format!("billing record missing for booking {}", booking_id),
            }
        })
    }

    async fn create_in(
        &self,
        tx: &mut dyn BookingTransaction,
        booking: &Booking,
        benefit: &MembershipBenefit,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let active = tx.count_active_bookings(&booking.user_id).await?;
        if benefit.exceeds_limit(active) {
            return Err(BookingError::BookingLimitExceeded {
                active,
                limit: benefit.booking_limit,
            });
        }
        debug!(
            "User {} holds {} active bookings (tier {} limit {})",
            booking.user_id, active, benefit.tier, benefit.booking_limit
        );

        if !tx.is_available(&booking.vehicle_id).await? {
            return Err(BookingError::VehicleNotAvailable {
                id: booking.vehicle_id.to_string(),
            });
        }
        tx.mark_booked(&booking.vehicle_id, now).await?;
        tx.insert_booking(booking).await?;

        let amount = booking.total_cost.unwrap_or_default();
        tx.open_billing(&BillingRecord::new_pending(booking.id, amount, now))
            .await?;
        Ok(())
    }

    async fn modify_in(
        &self,
        tx: &mut dyn BookingTransaction,
        booking_id: &BookingId,
        user_id: &UserId,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
        terms: &PricingTerms,
    ) -> Result<Booking> {
        let now = terms.now;
        let mut booking = Self::load_owned(tx, booking_id, user_id).await?;

        if booking.start_time == new_start && booking.end_time == new_end {
            return Err(BookingError::NoChangeDetected);
        }
        Self::ensure_active(&booking)?;

        let (start, end) = match booking.window(now) {
            BookingWindow::Upcoming => {
                if new_end <= new_start {
                    return Err(BookingError::InvalidTimeRange {
                        message: "new end time must be after new start time".to_string(),
                    });
                }
                (new_start, new_end)
            }
            BookingWindow::InProgress => {
                if new_start != booking.start_time {
                    return Err(BookingError::StartTimeLocked);
                }
                if new_end <= now || new_end <= booking.start_time {
                    return Err(BookingError::InvalidTimeRange {
                        message: "new end time must be in the future and after the start time"
                            .to_string(),
                    });
                }
                (booking.start_time, new_end)
            }
            BookingWindow::Elapsed => return Err(BookingError::ModificationWindowClosed),
        };

        let quote = self.quote_for(terms, start, end)?;

        booking.reschedule(start, end, quote.total, now)?;
        tx.update_booking(&booking).await?;

        let mut billing = Self::load_billing(tx, &booking.id).await?;
        billing.reprice(quote.total, now)?;
        tx.update_billing(&billing).await?;

        Ok(booking)
    }

    async fn cancel_in(
        &self,
        tx: &mut dyn BookingTransaction,
        booking_id: &BookingId,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Booking> {
        let mut booking = Self::load_owned(tx, booking_id, user_id).await?;
        Self::ensure_active(&booking)?;

        if booking.window(now) == BookingWindow::InProgress {
            return Err(BookingError::ActiveWindowCancelNotAllowed);
        }

        tx.mark_available(&booking.vehicle_id, now).await?;

        booking.transition_to(BookingStatus::Cancelled, now)?;
        tx.update_booking(&booking).await?;

        let mut billing = Self::load_billing(tx, &booking.id).await?;
        billing.refund(now);
        tx.update_billing(&billing).await?;

        Ok(booking)
    }
}

#[async_trait]
impl BookingOperations for BookingEngine {
    async fn create_booking(
        &self,
        user_id: UserId,
        vehicle_id: VehicleId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Booking> {
        if end <= start {
            warn!(
                "Rejected booking for user {} on vehicle {}: end {} is not after start {}",
                user_id, vehicle_id, end, start
            );
            return Err(BookingError::InvalidTimeRange {
                message: "end time must be after start time".to_string(),
            });
        }

        let now = self.clock.now();
        let terms = self.terms_for(&user_id, now).await?;
        let quote = self.quote_for(&terms, start, end)?;
        let booking = Booking::new(user_id, vehicle_id, start, end, quote.total, now)?;

        let mut tx = self.store.begin().await?;
        let outcome = self.create_in(tx.as_mut(), &booking, &terms.benefit, now).await;
        if let Err(e) = Self::finish("create_booking", tx, outcome).await {
            warn!(
                "Booking for user {} on vehicle {} rejected: {}",
                user_id, vehicle_id, e
            );
            return Err(e);
        }

        info!(
            "Created booking {} for user {} on vehicle {} ({} to {}), total {}",
            booking.id, user_id, vehicle_id, start, end, quote.total
        );
        Ok(booking)
    }

    async fn modify_booking(
        &self,
        booking_id: &BookingId,
        user_id: &UserId,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
    ) -> Result<Booking> {
        let now = self.clock.now();
        let terms = self.terms_for(user_id, now).await?;

        let mut tx = self.store.begin().await?;
        let outcome = self
            .modify_in(
                tx.as_mut(),
                booking_id,
                user_id,
                new_start,
                new_end,
                &terms,
            )
            .await;
        let booking = Self::finish("modify_booking", tx, outcome)
            .await
            .map_err(|e| {
                warn!("Modification of booking {} rejected: {}", booking_id, e);
                e
            })?;

        info!(
            "Modified booking {} for user {}: {} to {}, total {}",
            booking.id,
            user_id,
            booking.start_time,
            booking.end_time,
            booking.total_cost.unwrap_or_default()
        );
        Ok(booking)
    }

    async fn cancel_booking(&self, booking_id: &BookingId, user_id: &UserId) -> Result<Booking> {
        let now = self.clock.now();

        let mut tx = self.store.begin().await?;
        let outcome = self.cancel_in(tx.as_mut(), booking_id, user_id, now).await;
        let booking = Self::finish("cancel_booking", tx, outcome)
            .await
            .map_err(|e| {
                warn!("Cancellation of booking {} rejected: {}", booking_id, e);
                e
            })?;

        info!(
            "Cancelled booking {} for user {}, vehicle {} released, billing refunded",
            booking.id, user_id, booking.vehicle_id
        );
        Ok(booking)
    }

    async fn list_active_bookings(&self, user_id: &UserId) -> Result<Vec<BookingView>> {
        self.store.active_booking_views(user_id).await
    }
}
