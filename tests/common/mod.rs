//! Общие фикстуры интеграционных тестов: хранилище в памяти, ручные часы и один рейс.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

use seat_segment_booking::clock::ManualClock;
use seat_segment_booking::config::BookingPolicy;
use seat_segment_booking::models::{Bus, FareRule, Passenger, PassengerCategory, Stop, Trip, TripStatus};
use seat_segment_booking::services::CreateTicket;
use seat_segment_booking::store::InMemoryStore;
use seat_segment_booking::AppState;

pub const TRIP_ID: i64 = 1;
pub const ROUTE_ID: i64 = 1;
pub const BUS_ID: i64 = 1;
/// Остановки маршрута: порядок 0..=6
pub const STOP_COUNT: i32 = 7;

pub const ADULT: i64 = 1;
pub const CHILD: i64 = 2;
pub const SENIOR: i64 = 3;
pub const STUDENT: i64 = 4;
pub const UNKNOWN_AGE: i64 = 5;

pub struct Fixture {
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub clock: ManualClock,
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()
}

/// Идентификатор остановки по её порядковому номеру
pub fn stop(order: i32) -> i64 {
    100 + order as i64
}

pub fn sale(seat: &str, from: i32, to: i32, passenger_id: i64) -> CreateTicket {
    CreateTicket {
        trip_id: TRIP_ID,
        seat_number: seat.to_string(),
        from_stop_id: stop(from),
        to_stop_id: stop(to),
        passenger_id,
    }
}

pub async fn fixture(seats: &[&str], departs_in: Duration) -> Fixture {
    fixture_with(seats, departs_in, BookingPolicy::default()).await
}

pub async fn fixture_with(seats: &[&str], departs_in: Duration, policy: BookingPolicy) -> Fixture {
    let clock = ManualClock::new(start());
    let store = Arc::new(InMemoryStore::new());
    let departure_at = start() + departs_in;

    store
        .seed_trip(Trip {
            id: TRIP_ID,
            route_id: ROUTE_ID,
            bus_id: BUS_ID,
            date: departure_at.date_naive(),
            departure_at,
            arrival_at: Some(departure_at + Duration::hours(6)),
            status: TripStatus::Scheduled,
        })
        .await;
    store
        .seed_bus(
            Bus {
                id: BUS_ID,
                plate: "777 ABC 02".to_string(),
                capacity: seats.len() as i32,
            },
            seats,
        )
        .await;
    store
        .seed_stops(
            ROUTE_ID,
            (0..STOP_COUNT)
                .map(|order| Stop {
                    id: stop(order),
                    route_id: ROUTE_ID,
                    name: format!("Stop {}", order),
                    order,
                })
                .collect(),
        )
        .await;

    for (id, age, is_student) in [
        (ADULT, Some(35), false),
        (CHILD, Some(8), false),
        (SENIOR, Some(67), false),
        (STUDENT, Some(20), true),
        (UNKNOWN_AGE, None, false),
    ] {
        store
            .seed_passenger(Passenger {
                id,
                full_name: format!("Passenger {}", id),
                age,
                is_student,
            })
            .await;
    }

    store
        .seed_fare_rule(FareRule {
            id: 1,
            route_id: ROUTE_ID,
            from_stop_id: stop(0),
            to_stop_id: stop(3),
            base_price: Decimal::from(30000),
            discounts: HashMap::from([
                (PassengerCategory::Child, Decimal::from(50)),
                (PassengerCategory::Senior, Decimal::from(30)),
                (PassengerCategory::Student, Decimal::from(20)),
            ]),
            dynamic_pricing: false,
        })
        .await;

    let state = AppState::assemble(store.clone(), Arc::new(clock.clone()), policy, Vec::new());
    Fixture { state, store, clock }
}
