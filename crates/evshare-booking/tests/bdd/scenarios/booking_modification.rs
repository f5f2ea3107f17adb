use crate::bdd::{ts, TestContext};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use evshare_booking::domain::{
    BookingId, InMemoryPromotionCatalog, InMemoryUserDirectory, MembershipTier, Money,
    PromotionCatalog, UserDirectory, UserId, VehicleId,
};
use evshare_booking::storage::{BookingStore, FailPoint, InMemoryBookingStore};
use evshare_booking::BookingError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

async fn booked(context: &TestContext) -> (UserId, VehicleId, BookingId) {
    let user = context.create_test_user(1, MembershipTier::basic()).await;
    let vehicle = context.create_test_vehicle(101, 80).await;
    let created = context
        .api
        .create_booking(user, vehicle, "2024-05-01 09:00:00", "2024-05-01 11:30:00")
        .await
        .unwrap();
    (user, vehicle, created.booking_id)
}

#[tokio::test]
async fn test_upcoming_booking_moves_and_reprices() {
    let context = TestContext::new().await;
    let (user, _, booking_id) = booked(&context).await;

    context
        .api
        .modify_booking(
            &booking_id.to_string(),
            user,
            "2024-05-01 13:00:00",
            "2024-05-01 14:30:00",
        )
        .await
        .unwrap();

    let booking = context.store.booking(&booking_id).await.unwrap();
    assert_eq!(booking.start_time, ts("2024-05-01 13:00:00"));
    assert_eq!(booking.end_time, ts("2024-05-01 14:30:00"));
    assert_eq!(booking.total_cost, Some(Money::from_decimal(dec!(20.00))));

    let billing = context.store.billing(&booking_id).await.unwrap();
    assert_eq!(billing.total_amount, Money::from_decimal(dec!(20.00)));
}

#[tokio::test]
async fn test_in_progress_booking_can_be_extended() {
    let context = TestContext::new().await;
    let (user, _, booking_id) = booked(&context).await;
    context.set_now("2024-05-01 10:00:00");

    context
        .api
        .modify_booking(
            &booking_id.to_string(),
            user,
            "2024-05-01 09:00:00",
            "2024-05-01 12:00:00",
        )
        .await
        .unwrap();

    let booking = context.store.booking(&booking_id).await.unwrap();
    assert_eq!(booking.start_time, ts("2024-05-01 09:00:00"));
    assert_eq!(booking.end_time, ts("2024-05-01 12:00:00"));
    assert_eq!(
        context.store.billing(&booking_id).await.unwrap().total_amount,
        Money::from_decimal(dec!(30.00))
    );
}

#[tokio::test]
async fn test_start_is_locked_once_the_booking_has_started() {
    let context = TestContext::new().await;
    let (user, _, booking_id) = booked(&context).await;
    context.set_now("2024-05-01 10:00:00");

    let err = context
        .api
        .modify_booking(
            &booking_id.to_string(),
            user,
            "2024-05-01 09:30:00",
            "2024-05-01 12:00:00",
        )
        .await
        .unwrap_err();

    assert!(matches!(err, BookingError::StartTimeLocked));
    let booking = context.store.booking(&booking_id).await.unwrap();
    assert_eq!(booking.end_time, ts("2024-05-01 11:30:00"));
}

#[tokio::test]
async fn test_in_progress_end_must_stay_in_the_future() {
    let context = TestContext::new().await;
    let (user, _, booking_id) = booked(&context).await;
    context.set_now("2024-05-01 10:00:00");

    let err = context
        .api
        .modify_booking(
            &booking_id.to_string(),
            user,
            "2024-05-01 09:00:00",
            "2024-05-01 09:45:00",
        )
        .await
        .unwrap_err();

    assert!(matches!(err, BookingError::InvalidTimeRange { .. }));
}

#[tokio::test]
async fn test_upcoming_end_must_follow_start() {
    let context = TestContext::new().await;
    let (user, _, booking_id) = booked(&context).await;

    let err = context
        .api
        .modify_booking(
            &booking_id.to_string(),
            user,
            "2024-05-01 14:00:00",
            "2024-05-01 13:00:00",
        )
        .await
        .unwrap_err();

    assert!(matches!(err, BookingError::InvalidTimeRange { .. }));
}

#[tokio::test]
async fn test_identical_times_are_reported_as_no_change() {
    let context = TestContext::new().await;
    let (user, _, booking_id) = booked(&context).await;

    let err = context
        .api
        .modify_booking(
            &booking_id.to_string(),
            user,
            "2024-05-01 09:00:00",
            "2024-05-01 11:30:00",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::NoChangeDetected));

    // The no-change check runs before the window is classified
    context.set_now("2024-05-01 12:00:00");
    let err = context
        .api
        .modify_booking(
            &booking_id.to_string(),
            user,
            "2024-05-01 09:00:00",
            "2024-05-01 11:30:00",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::NoChangeDetected));
}

#[tokio::test]
async fn test_elapsed_booking_cannot_be_modified() {
    let context = TestContext::new().await;
    let (user, _, booking_id) = booked(&context).await;
    context.set_now("2024-05-01 11:30:00");

    let err = context
        .api
        .modify_booking(
            &booking_id.to_string(),
            user,
            "2024-05-01 09:00:00",
            "2024-05-01 13:00:00",
        )
        .await
        .unwrap_err();

    assert!(matches!(err, BookingError::ModificationWindowClosed));
}

#[tokio::test]
async fn test_other_users_booking_reads_as_not_found() {
    let context = TestContext::new().await;
    let (_, _, booking_id) = booked(&context).await;
    let intruder = context.create_test_user(2, MembershipTier::vip()).await;

    let err = context
        .api
        .modify_booking(
            &booking_id.to_string(),
            intruder,
            "2024-05-01 13:00:00",
            "2024-05-01 14:00:00",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::BookingNotFound { .. }));

    let err = context
        .api
        .modify_booking(
            &BookingId::new().to_string(),
            intruder,
            "2024-05-01 13:00:00",
            "2024-05-01 14:00:00",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::BookingNotFound { .. }));
}

#[tokio::test]
async fn test_cancelled_booking_is_not_active() {
    let context = TestContext::new().await;
    let (user, _, booking_id) = booked(&context).await;
    context
        .api
        .cancel_booking(&booking_id.to_string(), user)
        .await
        .unwrap();

    let err = context
        .api
        .modify_booking(
            &booking_id.to_string(),
            user,
            "2024-05-01 13:00:00",
            "2024-05-01 14:00:00",
        )
        .await
        .unwrap_err();

    assert!(matches!(err, BookingError::BookingNotActive { .. }));
}

#[tokio::test]
async fn test_failed_billing_update_keeps_the_old_schedule() {
    let context = TestContext::new().await;
    let (user, _, booking_id) = booked(&context).await;
    context.store.fail_at(FailPoint::UpdateBilling);

    let err = context
        .api
        .modify_booking(
            &booking_id.to_string(),
            user,
            "2024-05-01 13:00:00",
            "2024-05-01 14:30:00",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::DatabaseError { .. }));

    let booking = context.store.booking(&booking_id).await.unwrap();
    assert_eq!(booking.start_time, ts("2024-05-01 09:00:00"));
    assert_eq!(booking.end_time, ts("2024-05-01 11:30:00"));
    assert_eq!(booking.total_cost, Some(Money::from_decimal(dec!(30.00))));
    assert_eq!(
        context.store.billing(&booking_id).await.unwrap().total_amount,
        Money::from_decimal(dec!(30.00))
    );
}

#[tokio::test]
async fn test_modify_reprices_with_discounts_current_at_modify_time() {
    let context = TestContext::new().await;
    let user = context.create_test_user(1, MembershipTier::premium()).await;
    let vehicle = context.create_test_vehicle(101, 80).await;

    let created = context
        .api
        .create_booking(user, vehicle, "2024-05-01 09:00:00", "2024-05-01 12:00:00")
        .await
        .unwrap();
    assert_eq!(created.total_amount, Money::from_decimal(dec!(27.00)));

    // A promotion launched after the booking was made applies on modify
    context.add_promotion(1, dec!(20), "2024-06-01 00:00:00").await;
    context
        .api
        .modify_booking(
            &created.booking_id.to_string(),
            user,
            "2024-05-01 13:00:00",
            "2024-05-01 16:00:00",
        )
        .await
        .unwrap();

    let booking = context.store.booking(&created.booking_id).await.unwrap();
    assert_eq!(booking.total_cost, Some(Money::from_decimal(dec!(21.60))));
    assert_eq!(
        context.store.billing(&created.booking_id).await.unwrap().total_amount,
        Money::from_decimal(dec!(21.60))
    );

    // So does an upgraded tier
    context.create_test_user(1, MembershipTier::vip()).await;
    context
        .api
        .modify_booking(
            &created.booking_id.to_string(),
            user,
            "2024-05-01 13:00:00",
            "2024-05-01 17:00:00",
        )
        .await
        .unwrap();

    // 40.00 less 20% is 32.00, less a further 20% is 25.60
    let booking = context.store.booking(&created.booking_id).await.unwrap();
    assert_eq!(booking.total_cost, Some(Money::from_decimal(dec!(25.60))));
    assert_eq!(
        context.store.billing(&created.booking_id).await.unwrap().total_amount,
        Money::from_decimal(dec!(25.60))
    );
}

#[tokio::test]
async fn test_modify_drops_a_promotion_that_expired_since_creation() {
    let context = TestContext::new().await;
    let user = context.create_test_user(1, MembershipTier::premium()).await;
    let vehicle = context.create_test_vehicle(101, 80).await;
    context.add_promotion(1, dec!(50), "2024-05-01 08:30:00").await;

    let created = context
        .api
        .create_booking(user, vehicle, "2024-05-01 09:00:00", "2024-05-01 11:00:00")
        .await
        .unwrap();
    assert_eq!(created.total_amount, Money::from_decimal(dec!(9.00)));

    context.set_now("2024-05-01 08:45:00");
    context
        .api
        .modify_booking(
            &created.booking_id.to_string(),
            user,
            "2024-05-01 09:00:00",
            "2024-05-01 12:00:00",
        )
        .await
        .unwrap();

    let booking = context.store.booking(&created.booking_id).await.unwrap();
    assert_eq!(booking.total_cost, Some(Money::from_decimal(dec!(27.00))));
    assert_eq!(
        context.store.billing(&created.booking_id).await.unwrap().total_amount,
        Money::from_decimal(dec!(27.00))
    );
}

/// Catalog lookups that need the store themselves, the way the SQL catalogs
/// need a pooled connection. They fail if a booking transaction is already
/// holding the store.
struct StoreBoundCatalogs {
    store: Arc<InMemoryBookingStore>,
    users: Arc<InMemoryUserDirectory>,
    promotions: Arc<InMemoryPromotionCatalog>,
}

impl StoreBoundCatalogs {
    async fn ensure_store_free(&self, operation: &str) -> evshare_booking::Result<()> {
        match tokio::time::timeout(Duration::from_millis(200), self.store.begin()).await {
            Ok(tx) => {
                tx?;
                Ok(())
            }
            Err(_) => Err(BookingError::DatabaseError {
                operation: operation.to_string(),
                source: "timed out waiting for the store".into(),
            }),
        }
    }
}

#[async_trait]
impl UserDirectory for StoreBoundCatalogs {
    async fn membership_tier(
        &self,
        user_id: &UserId,
    ) -> evshare_booking::Result<Option<MembershipTier>> {
        self.ensure_store_free("membership_tier").await?;
        self.users.membership_tier(user_id).await
    }
}

#[async_trait]
impl PromotionCatalog for StoreBoundCatalogs {
    async fn current_discount(&self, now: DateTime<Utc>) -> evshare_booking::Result<Decimal> {
        self.ensure_store_free("current_discount").await?;
        self.promotions.current_discount(now).await
    }
}

#[tokio::test]
async fn test_catalog_reads_happen_outside_the_booking_transaction() {
    let context = TestContext::new().await;
    let user = context.create_test_user(1, MembershipTier::premium()).await;
    let vehicle = context.create_test_vehicle(101, 80).await;

    let catalogs = Arc::new(StoreBoundCatalogs {
        store: context.store.clone(),
        users: context.users.clone(),
        promotions: context.promotions.clone(),
    });
    let api = context.api_with_catalogs(catalogs.clone(), catalogs);

    let created = api
        .create_booking(user, vehicle, "2024-05-01 09:00:00", "2024-05-01 11:00:00")
        .await
        .unwrap();

    api.modify_booking(
        &created.booking_id.to_string(),
        user,
        "2024-05-01 09:00:00",
        "2024-05-01 12:00:00",
    )
    .await
    .unwrap();

    let booking = context.store.booking(&created.booking_id).await.unwrap();
    assert_eq!(booking.end_time, ts("2024-05-01 12:00:00"));
    assert_eq!(booking.total_cost, Some(Money::from_decimal(dec!(27.00))));

    api.cancel_booking(&created.booking_id.to_string(), user)
        .await
        .unwrap();
}
