//! Гонки за одно место: параллельные продажи и холды не дают пересечений.
//!
//! Run with: `cargo test --test concurrency`

mod common;

use chrono::Duration;
use futures::future::join_all;

use common::*;
use seat_segment_booking::error::BookingError;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn only_one_of_many_concurrent_sales_wins() {
    let fx = fixture(&["1A", "1B"], Duration::hours(48)).await;

    let attempts = (0..32).map(|i| {
        let state = fx.state.clone();
        let passenger = [ADULT, CHILD, SENIOR, STUDENT][i % 4];
        tokio::spawn(async move { state.bookings.create_ticket(sale("1A", 1, 4, passenger)).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let sold = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(BookingError::SegmentConflict { .. })))
        .count();
    assert_eq!(sold, 1);
    assert_eq!(conflicts, 31);
    assert_eq!(fx.state.bookings.count_sold_tickets(TRIP_ID).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_holds_and_sales_never_overlap() {
    let fx = fixture(&["1A", "1B"], Duration::hours(48)).await;

    // Смесь пересекающихся сегментов: [0,2) [1,3) [2,4) ... на одном месте
    let tasks = (0..5).flat_map(|from| {
        let hold_state = fx.state.clone();
        let sale_state = fx.state.clone();
        [
            tokio::spawn(async move {
                hold_state
                    .holds
                    .acquire_hold(TRIP_ID, "1A", stop(from), stop(from + 2), 100 + from as i64)
                    .await
                    .map(|h| (h.from_order, h.to_order))
            }),
            tokio::spawn(async move {
                sale_state
                    .bookings
                    .create_ticket(sale("1A", from, from + 2, ADULT))
                    .await
                    .map(|t| (t.from_order, t.to_order))
            }),
        ]
    });
    let mut taken: Vec<(i32, i32)> = join_all(tasks.collect::<Vec<_>>())
        .await
        .into_iter()
        .filter_map(|joined| joined.expect("task panicked").ok())
        .collect();
    taken.sort();

    assert!(!taken.is_empty());
    for pair in taken.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        assert!(a.1 <= b.0, "overlapping segments {:?} and {:?}", a, b);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hold_limit_holds_under_parallel_requests_on_different_seats() {
    let seats: Vec<String> = (1..=16).map(|n| format!("{}A", n)).collect();
    let seat_refs: Vec<&str> = seats.iter().map(String::as_str).collect();
    let fx = fixture(&seat_refs, Duration::hours(48)).await;
    let limit = fx.state.policy.holds.max_per_user;

    let attempts = seats.iter().cloned().map(|seat| {
        let state = fx.state.clone();
        tokio::spawn(async move { state.holds.acquire_hold(TRIP_ID, &seat, stop(0), stop(6), 42).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let held = results.iter().filter(|r| r.is_ok()).count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(BookingError::HoldLimitExceeded { user_id: 42, .. })))
        .count();
    assert_eq!(held, limit);
    assert_eq!(refused, seats.len() - limit);
    assert_eq!(fx.state.holds.user_holds(42).await.unwrap().len(), limit);
}
