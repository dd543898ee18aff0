//! Овербукинг на автобусе с одним местом: запрос, одобрение, предел продаж.
//!
//! Run with: `cargo test --test overbooking_flow`

mod common;

use chrono::Duration;

use common::*;
use seat_segment_booking::error::BookingError;
use seat_segment_booking::models::{OverbookingStatus, TicketStatus};

const CLERK: i64 = 501;
const DISPATCHER: i64 = 900;

#[tokio::test]
async fn approved_request_allows_one_more_sale() {
    let fx = fixture(&["1A"], Duration::hours(24)).await;
    let engine = &fx.state.bookings;
    let overbooking = &fx.state.overbooking;

    // Пустой рейс: запрос ниже порога
    let err = overbooking.request_overbooking(TRIP_ID, CLERK, None).await.unwrap_err();
    assert!(matches!(err, BookingError::BelowOverbookingThreshold { .. }));
    assert!(!overbooking.can_overbook(TRIP_ID).await.unwrap());

    let first = engine.create_ticket(sale("1A", 0, 5, ADULT)).await.unwrap();
    assert!(!first.overbooked);

    // Без одобрения автобус полон
    let err = engine.create_ticket(sale("1A", 0, 5, SENIOR)).await.unwrap_err();
    assert!(matches!(err, BookingError::CapacityExceeded { limit: 1, .. }));

    assert_eq!(overbooking.get_current_occupancy_rate(TRIP_ID).await.unwrap(), 1.0);
    assert!(overbooking.can_overbook(TRIP_ID).await.unwrap());

    let request = overbooking
        .request_overbooking(TRIP_ID, CLERK, Some("school group".to_string()))
        .await
        .unwrap();
    assert_eq!(request.status, OverbookingStatus::Pending);
    assert_eq!(request.occupancy_at_request, 1.0);

    let err = overbooking.request_overbooking(TRIP_ID, CLERK, None).await.unwrap_err();
    assert!(matches!(
        err,
        BookingError::OverbookingAlreadyPending { request_id, .. } if request_id == request.id
    ));
    assert_eq!(overbooking.get_pending_requests().await.unwrap().len(), 1);

    let approved = overbooking
        .approve_overbooking(request.id, DISPATCHER, None, None)
        .await
        .unwrap();
    assert_eq!(approved.status, OverbookingStatus::Approved);
    assert_eq!(approved.decided_by, Some(DISPATCHER));
    assert_eq!(approved.approved_multiplier, Some(1.1));

    let second = engine.create_ticket(sale("1A", 0, 5, SENIOR)).await.unwrap();
    assert!(second.overbooked);
    assert_eq!(second.status, TicketStatus::Sold);

    // ceil(1 × 1.1) = 2, третьего места нет
    let err = engine.create_ticket(sale("1A", 0, 5, STUDENT)).await.unwrap_err();
    assert!(matches!(err, BookingError::CapacityExceeded { limit: 2, .. }));
    assert_eq!(engine.count_sold_tickets(TRIP_ID).await.unwrap(), 2);

    // Непересекающийся сегмент продаётся обычным порядком
    let tail = engine.create_ticket(sale("1A", 5, 6, STUDENT)).await.unwrap();
    assert!(!tail.overbooked);
}

#[tokio::test]
async fn decisions_only_apply_to_pending_requests() {
    let fx = fixture(&["1A"], Duration::hours(24)).await;
    let overbooking = &fx.state.overbooking;
    fx.state.bookings.create_ticket(sale("1A", 0, 6, ADULT)).await.unwrap();

    let request = overbooking.request_overbooking(TRIP_ID, CLERK, None).await.unwrap();
    let rejected = overbooking
        .reject_overbooking(request.id, DISPATCHER, Some("no spare driver".to_string()))
        .await
        .unwrap();
    assert_eq!(rejected.status, OverbookingStatus::Rejected);
    assert_eq!(rejected.reason.as_deref(), Some("no spare driver"));

    let err = overbooking
        .approve_overbooking(request.id, DISPATCHER, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidStateTransition { .. }));

    // Отклонённый запрос не поднимает предел
    let err = fx.state.bookings.create_ticket(sale("1A", 0, 6, SENIOR)).await.unwrap_err();
    assert!(matches!(err, BookingError::CapacityExceeded { limit: 1, .. }));

    // После отказа можно подать новый запрос
    let again = overbooking.request_overbooking(TRIP_ID, CLERK, None).await.unwrap();
    assert_eq!(
        overbooking
            .get_overbooking_requests_by_trip(TRIP_ID)
            .await
            .unwrap()
            .len(),
        2
    );
    assert_eq!(
        overbooking
            .get_overbooking_requests_by_status(OverbookingStatus::Rejected)
            .await
            .unwrap()
            .len(),
        1
    );
    assert_eq!(overbooking.get_overbooking_request(again.id).await.unwrap().id, again.id);
}

#[tokio::test]
async fn approved_multiplier_is_capped() {
    let fx = fixture(&["1A"], Duration::hours(24)).await;
    let overbooking = &fx.state.overbooking;
    fx.state.bookings.create_ticket(sale("1A", 0, 6, ADULT)).await.unwrap();

    let request = overbooking.request_overbooking(TRIP_ID, CLERK, None).await.unwrap();
    let approved = overbooking
        .approve_overbooking(request.id, DISPATCHER, Some(3.0), None)
        .await
        .unwrap();
    assert_eq!(approved.approved_multiplier, Some(1.1));
    assert_eq!(overbooking.sellable_limit(&fx.state.trips.get_trip(TRIP_ID).await.unwrap()).await.unwrap().0, 2);
}

#[tokio::test]
async fn stale_pending_request_expires_on_decision() {
    let fx = fixture(&["1A"], Duration::hours(24)).await;
    let overbooking = &fx.state.overbooking;
    fx.state.bookings.create_ticket(sale("1A", 0, 6, ADULT)).await.unwrap();

    let request = overbooking.request_overbooking(TRIP_ID, CLERK, None).await.unwrap();
    fx.clock.advance(Duration::minutes(31));

    let err = overbooking
        .approve_overbooking(request.id, DISPATCHER, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidStateTransition { .. }));
    assert_eq!(
        overbooking.get_overbooking_request(request.id).await.unwrap().status,
        OverbookingStatus::Expired
    );
    assert!(overbooking.active_approval(TRIP_ID).await.unwrap().is_none());
}
