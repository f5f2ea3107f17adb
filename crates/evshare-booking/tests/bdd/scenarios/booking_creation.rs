use crate::bdd::{ts, TestContext};
use evshare_booking::domain::{
    BookingStatus, MembershipTier, Money, PaymentMethod, PaymentStatus, UserId, VehicleStatus,
};
use evshare_booking::storage::FailPoint;
use evshare_booking::{BookingError, ErrorKind};
use futures::future::join_all;
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_basic_member_pays_per_started_hour() {
    let context = TestContext::new().await;
    let user = context.create_test_user(1, MembershipTier::basic()).await;
    let vehicle = context.create_test_vehicle(101, 80).await;

    let created = context
        .api
        .create_booking(user, vehicle, "2024-05-01 09:00:00", "2024-05-01 11:30:00")
        .await
        .unwrap();

    assert_eq!(created.total_amount, Money::from_decimal(dec!(30.00)));

    let booking = context.store.booking(&created.booking_id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Active);
    assert_eq!(booking.start_time, ts("2024-05-01 09:00:00"));
    assert_eq!(booking.end_time, ts("2024-05-01 11:30:00"));
    assert_eq!(booking.total_cost, Some(Money::from_decimal(dec!(30.00))));

    let billing = context.store.billing(&created.booking_id).await.unwrap();
    assert_eq!(billing.payment_status, PaymentStatus::Pending);
    assert_eq!(billing.payment_method, PaymentMethod::Other);
    assert_eq!(billing.total_amount, Money::from_decimal(dec!(30.00)));

    let vehicle = context.store.vehicle(&vehicle).await.unwrap();
    assert_eq!(vehicle.status, VehicleStatus::Booked);

    let active = context.api.list_active_bookings(user).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].booking_id, created.booking_id);
    assert_eq!(active[0].vehicle_status, VehicleStatus::Booked);
    assert_eq!(active[0].total_amount, Money::from_decimal(dec!(30.00)));
}

#[tokio::test]
async fn test_membership_and_promotion_discounts_compound() {
    let context = TestContext::new().await;
    let user = context.create_test_user(1, MembershipTier::premium()).await;
    let vehicle = context.create_test_vehicle(101, 80).await;
    context
        .add_promotion(1, dec!(20), "2024-06-01 00:00:00")
        .await;

    let created = context
        .api
        .create_booking(user, vehicle, "2024-05-01 09:00:00", "2024-05-01 12:00:00")
        .await
        .unwrap();

    // 30.00 less 10% is 27.00, less a further 20% is 21.60
    assert_eq!(created.total_amount, Money::from_decimal(dec!(21.60)));
}

#[tokio::test]
async fn test_soonest_expiring_promotion_applies() {
    let context = TestContext::new().await;
    let user = context.create_test_user(1, MembershipTier::basic()).await;
    let vehicle = context.create_test_vehicle(101, 80).await;
    context.add_promotion(1, dec!(30), "2024-12-31 00:00:00").await;
    context.add_promotion(2, dec!(5), "2024-05-02 00:00:00").await;
    context.add_promotion(3, dec!(50), "2024-04-30 00:00:00").await;

    let created = context
        .api
        .create_booking(user, vehicle, "2024-05-01 09:00:00", "2024-05-01 10:00:00")
        .await
        .unwrap();

    assert_eq!(created.total_amount, Money::from_decimal(dec!(9.50)));
}

#[tokio::test]
async fn test_limit_is_enforced_only_past_one_extra_booking() {
    let context = TestContext::new().await;
    let user = context.create_test_user(1, MembershipTier::basic()).await;
    let first = context.create_test_vehicle(101, 80).await;
    let second = context.create_test_vehicle(102, 80).await;
    let third = context.create_test_vehicle(103, 80).await;

    context
        .api
        .create_booking(user, first, "2024-05-01 09:00:00", "2024-05-01 10:00:00")
        .await
        .unwrap();

    // Basic allows one booking, but holding exactly one still admits another
    context
        .api
        .create_booking(user, second, "2024-05-01 09:00:00", "2024-05-01 10:00:00")
        .await
        .unwrap();

    let err = context
        .api
        .create_booking(user, third, "2024-05-01 09:00:00", "2024-05-01 10:00:00")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BookingError::BookingLimitExceeded {
            active: 2,
            limit: 1
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(
        context.store.vehicle(&third).await.unwrap().status,
        VehicleStatus::Available
    );
    assert_eq!(context.store.booking_count().await, 2);
}

#[tokio::test]
async fn test_vehicle_must_be_available() {
    let context = TestContext::new().await;
    let alice = context.create_test_user(1, MembershipTier::basic()).await;
    let bob = context.create_test_user(2, MembershipTier::basic()).await;
    let vehicle = context.create_test_vehicle(101, 80).await;
    let serviced = context.create_test_vehicle(102, 80).await;
    context
        .store
        .set_vehicle_status(&serviced, VehicleStatus::Maintenance)
        .await;

    let err = context
        .api
        .create_booking(alice, serviced, "2024-05-01 09:00:00", "2024-05-01 10:00:00")
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::VehicleNotAvailable { .. }));

    context
        .api
        .create_booking(alice, vehicle, "2024-05-01 09:00:00", "2024-05-01 10:00:00")
        .await
        .unwrap();

    let err = context
        .api
        .create_booking(bob, vehicle, "2024-05-01 13:00:00", "2024-05-01 14:00:00")
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::VehicleNotAvailable { .. }));
    assert!(context.api.list_active_bookings(bob).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_user_and_vehicle_are_not_found() {
    let context = TestContext::new().await;
    let user = context.create_test_user(1, MembershipTier::basic()).await;
    let vehicle = context.create_test_vehicle(101, 80).await;

    let err = context
        .api
        .create_booking(
            UserId::new(999),
            vehicle,
            "2024-05-01 09:00:00",
            "2024-05-01 10:00:00",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::UserNotFound { .. }));
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = context
        .api
        .create_booking(
            user,
            evshare_booking::domain::VehicleId::new(999),
            "2024-05-01 09:00:00",
            "2024-05-01 10:00:00",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::VehicleNotFound { .. }));
    assert_eq!(context.store.booking_count().await, 0);
}

#[tokio::test]
async fn test_tier_without_benefits_is_an_internal_error() {
    let context = TestContext::new().await;
    let user = context
        .create_test_user(1, MembershipTier::new("Gold"))
        .await;
    let vehicle = context.create_test_vehicle(101, 80).await;

    let err = context
        .api
        .create_booking(user, vehicle, "2024-05-01 09:00:00", "2024-05-01 10:00:00")
        .await
        .unwrap_err();

    assert!(matches!(err, BookingError::MembershipTierNotFound { .. }));
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(!err.is_client_error());
}

#[tokio::test]
async fn test_malformed_input_is_rejected() {
    let context = TestContext::new().await;
    let user = context.create_test_user(1, MembershipTier::basic()).await;
    let vehicle = context.create_test_vehicle(101, 80).await;

    let err = context
        .api
        .create_booking(user, vehicle, "2024-05-01 10:00:00", "2024-05-01 10:00:00")
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidTimeRange { .. }));

    let err = context
        .api
        .create_booking(user, vehicle, "2024-05-01T09:00:00Z", "2024-05-01 10:00:00")
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidTimestamp { .. }));
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    assert_eq!(
        context.store.vehicle(&vehicle).await.unwrap().status,
        VehicleStatus::Available
    );
}

#[tokio::test]
async fn test_failed_billing_insert_rolls_back_the_booking() {
    let context = TestContext::new().await;
    let user = context.create_test_user(1, MembershipTier::basic()).await;
    let vehicle = context.create_test_vehicle(101, 80).await;
    context.store.fail_at(FailPoint::OpenBilling);

    let err = context
        .api
        .create_booking(user, vehicle, "2024-05-01 09:00:00", "2024-05-01 10:00:00")
        .await
        .unwrap_err();

    assert!(matches!(err, BookingError::DatabaseError { .. }));
    assert_eq!(context.store.booking_count().await, 0);
    assert_eq!(
        context.store.vehicle(&vehicle).await.unwrap().status,
        VehicleStatus::Available
    );

    context.store.clear_fail_points();
    context
        .api
        .create_booking(user, vehicle, "2024-05-01 09:00:00", "2024-05-01 10:00:00")
        .await
        .unwrap();
    assert_eq!(context.store.booking_count().await, 1);
}

#[tokio::test]
async fn test_failed_commit_leaves_nothing_behind() {
    let context = TestContext::new().await;
    let user = context.create_test_user(1, MembershipTier::basic()).await;
    let vehicle = context.create_test_vehicle(101, 80).await;
    context.store.fail_at(FailPoint::Commit);

    let err = context
        .api
        .create_booking(user, vehicle, "2024-05-01 09:00:00", "2024-05-01 10:00:00")
        .await
        .unwrap_err();

    assert!(matches!(err, BookingError::DatabaseError { .. }));
    assert_eq!(context.store.booking_count().await, 0);
    assert_eq!(
        context.store.vehicle(&vehicle).await.unwrap().status,
        VehicleStatus::Available
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_for_one_vehicle_admit_exactly_one() {
    let context = TestContext::new().await;
    let vehicle = context.create_test_vehicle(101, 80).await;

    let mut users = Vec::new();
    for id in 1..=8 {
        users.push(context.create_test_user(id, MembershipTier::vip()).await);
    }

    let attempts = users.into_iter().map(|user| {
        let api = context.api.clone();
        tokio::spawn(async move {
            api.create_booking(user, vehicle, "2024-05-01 09:00:00", "2024-05-01 10:00:00")
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(BookingError::VehicleNotAvailable { .. })))
        .count();

    assert_eq!(succeeded, 1);
    assert_eq!(rejected, 7);
    assert_eq!(context.store.booking_count().await, 1);
}
