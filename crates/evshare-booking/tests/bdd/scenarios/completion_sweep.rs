use crate::bdd::{ts, TestContext};
use evshare_booking::domain::{
    BookingStatus, MembershipTier, Money, PaymentStatus, VehicleStatus,
};
use evshare_booking::storage::FailPoint;
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_sweep_completes_elapsed_bookings_and_frees_vehicles() {
    let context = TestContext::new().await;
    let user = context.create_test_user(1, MembershipTier::basic()).await;
    let vehicle = context.create_test_vehicle(101, 80).await;
    let created = context
        .api
        .create_booking(user, vehicle, "2024-05-01 09:00:00", "2024-05-01 11:30:00")
        .await
        .unwrap();

    context.set_now("2024-05-01 11:00:00");
    let report = context.sweeper.sweep().await.unwrap();
    assert!(report.completed.is_empty());

    // A booking whose end equals the sweep instant has elapsed
    context.set_now("2024-05-01 11:30:00");
    let report = context.sweeper.sweep().await.unwrap();
    assert_eq!(report.completed, vec![created.booking_id]);
    assert!(report.failed.is_empty());

    let booking = context.store.booking(&created.booking_id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Completed);
    assert_eq!(
        context.store.vehicle(&vehicle).await.unwrap().status,
        VehicleStatus::Available
    );

    let billing = context.store.billing(&created.booking_id).await.unwrap();
    assert_eq!(billing.payment_status, PaymentStatus::Pending);
    assert_eq!(billing.total_amount, Money::from_decimal(dec!(30.00)));

    assert!(context.api.list_active_bookings(user).await.unwrap().is_empty());
    assert!(context.sweeper.sweep().await.unwrap().completed.is_empty());
}

#[tokio::test]
async fn test_rental_history_lists_most_recent_completion_first() {
    let context = TestContext::new().await;
    let user = context.create_test_user(1, MembershipTier::basic()).await;
    let short_hop = context.create_test_vehicle(101, 80).await;
    let long_trip = context.create_test_vehicle(102, 80).await;

    let first = context
        .api
        .create_booking(user, short_hop, "2024-05-01 09:00:00", "2024-05-01 10:00:00")
        .await
        .unwrap();
    let second = context
        .api
        .create_booking(user, long_trip, "2024-05-01 09:00:00", "2024-05-01 11:00:00")
        .await
        .unwrap();

    context.set_now("2024-05-01 10:30:00");
    context.sweeper.sweep().await.unwrap();
    context.set_now("2024-05-01 12:00:00");
    context.sweeper.sweep().await.unwrap();

    let history = context.api.rental_history(user).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].booking_id, second.booking_id);
    assert_eq!(history[0].completed_at, ts("2024-05-01 12:00:00"));
    assert_eq!(history[0].total_cost, Money::from_decimal(dec!(20.00)));
    assert_eq!(history[1].booking_id, first.booking_id);
    assert_eq!(history[1].license_plate, "EV-101");
}

#[tokio::test]
async fn test_cancelled_bookings_are_not_swept() {
    let context = TestContext::new().await;
    let user = context.create_test_user(1, MembershipTier::basic()).await;
    let vehicle = context.create_test_vehicle(101, 80).await;
    let created = context
        .api
        .create_booking(user, vehicle, "2024-05-01 09:00:00", "2024-05-01 10:00:00")
        .await
        .unwrap();
    context
        .api
        .cancel_booking(&created.booking_id.to_string(), user)
        .await
        .unwrap();

    context.set_now("2024-05-01 12:00:00");
    let report = context.sweeper.sweep().await.unwrap();

    assert!(report.completed.is_empty());
    assert_eq!(
        context.store.booking(&created.booking_id).await.unwrap().status,
        BookingStatus::Cancelled
    );
    assert!(context.api.rental_history(user).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_completion_is_reported_and_retried() {
    let context = TestContext::new().await;
    let user = context.create_test_user(1, MembershipTier::basic()).await;
    let vehicle = context.create_test_vehicle(101, 80).await;
    let created = context
        .api
        .create_booking(user, vehicle, "2024-05-01 09:00:00", "2024-05-01 10:00:00")
        .await
        .unwrap();

    context.set_now("2024-05-01 12:00:00");
    context.store.fail_at(FailPoint::MarkAvailable);

    let report = context.sweeper.sweep().await.unwrap();
    assert!(report.completed.is_empty());
    assert_eq!(report.failed, vec![created.booking_id]);
    assert_eq!(
        context.store.booking(&created.booking_id).await.unwrap().status,
        BookingStatus::Active
    );
    assert_eq!(
        context.store.vehicle(&vehicle).await.unwrap().status,
        VehicleStatus::Booked
    );

    context.store.clear_fail_points();
    let report = context.sweeper.sweep().await.unwrap();
    assert_eq!(report.completed, vec![created.booking_id]);
}
