use chrono::Duration;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::clock::Clock;
use crate::error::{BookingError, BookingResult};
use crate::models::{TicketStatus, Trip, TripStatus};
use crate::services::booking::BookingEngine;
use crate::store::BookingStore;

/// Итог обработки no-show по рейсу
#[derive(Debug, Clone, Default, Serialize)]
pub struct NoShowReport {
    pub trip_id: i64,
    pub processed: usize,
    pub ticket_ids: Vec<i64>,
    pub fees_total: Decimal,
    /// Билеты, которые не удалось перевести; остаются SOLD до следующего прохода
    pub failed: usize,
}

/// Пакетная обработка неявки: после закрытия посадки все SOLD билеты рейса → NO_SHOW.
#[derive(Clone)]
pub struct NoShowService {
    store: Arc<dyn BookingStore>,
    engine: BookingEngine,
    clock: Arc<dyn Clock>,
}

impl NoShowService {
    pub fn new(store: Arc<dyn BookingStore>, engine: BookingEngine, clock: Arc<dyn Clock>) -> Self {
        Self { store, engine, clock }
    }

    fn grace(&self) -> Duration {
        Duration::minutes(self.engine.no_show_policy().grace_minutes)
    }

    /// Посадка закрыта, если автобус ушёл или прошло `grace_minutes` после отправления
    pub fn boarding_closed(&self, trip: &Trip) -> bool {
        matches!(trip.status, TripStatus::Departed | TripStatus::Arrived)
            || self.clock.now() >= trip.departure_at + self.grace()
    }

    /// Повторный вызов безопасен: уже обработанные билеты не в SOLD и штраф второй раз не берётся.
    /// Ошибка на одном билете пишется в лог и не останавливает остальные.
    pub async fn process_no_show_tickets(&self, trip_id: i64) -> BookingResult<NoShowReport> {
        let trip = self
            .store
            .trip(trip_id)
            .await?
            .ok_or_else(|| BookingError::not_found("trip", trip_id))?;

        if trip.status == TripStatus::Cancelled {
            return Err(BookingError::transition("trip", trip.status, "NO_SHOW_PROCESSING"));
        }
        if !self.boarding_closed(&trip) {
            return Err(BookingError::BoardingStillOpen { trip_id });
        }

        let sold = self.store.trip_tickets(trip_id, Some(TicketStatus::Sold)).await?;
        let mut report = NoShowReport {
            trip_id,
            ..NoShowReport::default()
        };

        for ticket in sold {
            match self.engine.release_as_no_show(&ticket, &trip).await {
                Ok(Some(released)) => {
                    report.processed += 1;
                    report.ticket_ids.push(released.id);
                    report.fees_total += released.no_show_fee.unwrap_or_default();
                }
                Ok(None) => {}
                Err(e) => {
                    report.failed += 1;
                    error!("🚫 Failed to mark ticket {} of trip {} as NO_SHOW: {}", ticket.id, trip_id, e);
                }
            }
        }

        if report.processed > 0 || report.failed > 0 {
            info!(
                "🚫 No-show processed for trip {}: {} tickets, fees {}, {} failed",
                trip_id, report.processed, report.fees_total, report.failed
            );
        }
        Ok(report)
    }

    /// Проход sweeper'а по рейсам, у которых посадка уже закрыта и остались SOLD билеты.
    /// Ошибка одного рейса пишется в лог, остальные обрабатываются.
    pub async fn process_upcoming_trips_no_show(&self) -> Vec<NoShowReport> {
        let cutoff = self.clock.now() - self.grace();
        let trips = match self.store.trips_departing_before(cutoff).await {
            Ok(trips) => trips,
            Err(e) => {
                error!("🚫 Failed to load trips for no-show processing: {:?}", e);
                return Vec::new();
            }
        };

        let mut reports = Vec::new();
        for trip in trips {
            match self.store.count_tickets(trip.id, TicketStatus::Sold).await {
                Ok(0) => continue,
                Ok(_) => {}
                Err(e) => {
                    error!("🚫 Failed to count sold tickets of trip {}: {:?}", trip.id, e);
                    continue;
                }
            }
            match self.process_no_show_tickets(trip.id).await {
                Ok(report) => reports.push(report),
                Err(e) => error!("🚫 No-show processing failed for trip {}: {}", trip.id, e),
            }
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::{AtomicI64, Ordering};

    use crate::clock::ManualClock;
    use crate::config::BookingPolicy;
    use crate::error::{StoreError, StoreResult};
    use crate::models::{
        Bus, FareRule, HoldStatus, NewOverbookingRequest, NewSeatHold, NewTicket, OverbookingDecision,
        OverbookingRequest, OverbookingStatus, Passenger, Seat, SeatHold, Stop, Ticket,
    };
    use crate::services::CreateTicket;
    use crate::store::{InMemoryStore, TicketTransition};
    use crate::AppState;

    /// Хранилище в памяти, у которого падает смена статуса одного выбранного билета
    struct FlakyStore {
        inner: InMemoryStore,
        broken_ticket: AtomicI64,
    }

    #[async_trait]
    impl BookingStore for FlakyStore {
        async fn trip(&self, id: i64) -> StoreResult<Option<Trip>> {
            self.inner.trip(id).await
        }
        async fn update_trip_status(&self, id: i64, from: TripStatus, to: TripStatus) -> StoreResult<bool> {
            self.inner.update_trip_status(id, from, to).await
        }
        async fn trips_departing_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Trip>> {
            self.inner.trips_departing_before(cutoff).await
        }
        async fn bus(&self, id: i64) -> StoreResult<Option<Bus>> {
            self.inner.bus(id).await
        }
        async fn bus_seats(&self, bus_id: i64) -> StoreResult<Vec<Seat>> {
            self.inner.bus_seats(bus_id).await
        }
        async fn route_stops(&self, route_id: i64) -> StoreResult<Vec<Stop>> {
            self.inner.route_stops(route_id).await
        }
        async fn passenger(&self, id: i64) -> StoreResult<Option<Passenger>> {
            self.inner.passenger(id).await
        }
        async fn fare_rule(&self, route_id: i64, from_stop_id: i64, to_stop_id: i64) -> StoreResult<Option<FareRule>> {
            self.inner.fare_rule(route_id, from_stop_id, to_stop_id).await
        }
        async fn ticket(&self, id: i64) -> StoreResult<Option<Ticket>> {
            self.inner.ticket(id).await
        }
        async fn ticket_by_qr(&self, qr_code: &str) -> StoreResult<Option<Ticket>> {
            self.inner.ticket_by_qr(qr_code).await
        }
        async fn seat_tickets(&self, trip_id: i64, seat_number: &str, status: Option<TicketStatus>) -> StoreResult<Vec<Ticket>> {
            self.inner.seat_tickets(trip_id, seat_number, status).await
        }
        async fn trip_tickets(&self, trip_id: i64, status: Option<TicketStatus>) -> StoreResult<Vec<Ticket>> {
            self.inner.trip_tickets(trip_id, status).await
        }
        async fn passenger_tickets(&self, passenger_id: i64) -> StoreResult<Vec<Ticket>> {
            self.inner.passenger_tickets(passenger_id).await
        }
        async fn count_tickets(&self, trip_id: i64, status: TicketStatus) -> StoreResult<i64> {
            self.inner.count_tickets(trip_id, status).await
        }
        async fn insert_ticket(&self, ticket: NewTicket) -> StoreResult<Ticket> {
            self.inner.insert_ticket(ticket).await
        }
        async fn transition_ticket(&self, id: i64, transition: &TicketTransition) -> StoreResult<Option<Ticket>> {
            if id == self.broken_ticket.load(Ordering::SeqCst) {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.transition_ticket(id, transition).await
        }
        async fn hold(&self, id: i64) -> StoreResult<Option<SeatHold>> {
            self.inner.hold(id).await
        }
        async fn seat_holds(&self, trip_id: i64, seat_number: &str, status: Option<HoldStatus>) -> StoreResult<Vec<SeatHold>> {
            self.inner.seat_holds(trip_id, seat_number, status).await
        }
        async fn trip_holds(&self, trip_id: i64, status: Option<HoldStatus>) -> StoreResult<Vec<SeatHold>> {
            self.inner.trip_holds(trip_id, status).await
        }
        async fn user_holds(&self, user_id: i64, status: Option<HoldStatus>) -> StoreResult<Vec<SeatHold>> {
            self.inner.user_holds(user_id, status).await
        }
        async fn insert_hold(&self, hold: NewSeatHold) -> StoreResult<SeatHold> {
            self.inner.insert_hold(hold).await
        }
        async fn update_hold_status(&self, id: i64, from: HoldStatus, to: HoldStatus) -> StoreResult<bool> {
            self.inner.update_hold_status(id, from, to).await
        }
        async fn convert_hold(&self, hold_id: i64, ticket: NewTicket) -> StoreResult<Option<Ticket>> {
            self.inner.convert_hold(hold_id, ticket).await
        }
        async fn expired_holds(&self, now: DateTime<Utc>) -> StoreResult<Vec<SeatHold>> {
            self.inner.expired_holds(now).await
        }
        async fn overbooking_request(&self, id: i64) -> StoreResult<Option<OverbookingRequest>> {
            self.inner.overbooking_request(id).await
        }
        async fn overbooking_requests(
            &self,
            trip_id: Option<i64>,
            status: Option<OverbookingStatus>,
        ) -> StoreResult<Vec<OverbookingRequest>> {
            self.inner.overbooking_requests(trip_id, status).await
        }
        async fn insert_overbooking_request(&self, request: NewOverbookingRequest) -> StoreResult<OverbookingRequest> {
            self.inner.insert_overbooking_request(request).await
        }
        async fn decide_overbooking_request(
            &self,
            id: i64,
            decision: &OverbookingDecision,
        ) -> StoreResult<Option<OverbookingRequest>> {
            self.inner.decide_overbooking_request(id, decision).await
        }
        async fn pending_requests_created_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<OverbookingRequest>> {
            self.inner.pending_requests_created_before(cutoff).await
        }
    }

    async fn seeded_store(departure_at: DateTime<Utc>) -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .seed_trip(Trip {
                id: 1,
                route_id: 1,
                bus_id: 1,
                date: departure_at.date_naive(),
                departure_at,
                arrival_at: None,
                status: TripStatus::Scheduled,
            })
            .await;
        store
            .seed_bus(
                Bus {
                    id: 1,
                    plate: "001 AAA 01".to_string(),
                    capacity: 3,
                },
                &["1A", "1B", "1C"],
            )
            .await;
        store
            .seed_stops(
                1,
                (0..3)
                    .map(|order| Stop {
                        id: 10 + order as i64,
                        route_id: 1,
                        name: format!("Stop {}", order),
                        order,
                    })
                    .collect(),
            )
            .await;
        store
            .seed_passenger(Passenger {
                id: 1,
                full_name: "Passenger 1".to_string(),
                age: Some(40),
                is_student: false,
            })
            .await;
        store
    }

    #[tokio::test]
    async fn one_failing_ticket_does_not_stop_the_batch() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        let clock = ManualClock::new(now);
        let store = Arc::new(FlakyStore {
            inner: seeded_store(now + Duration::hours(1)).await,
            broken_ticket: AtomicI64::new(0),
        });
        let state = AppState::assemble(store.clone(), Arc::new(clock.clone()), BookingPolicy::default(), Vec::new());

        let mut ids = Vec::new();
        for seat in ["1A", "1B", "1C"] {
            let ticket = state
                .bookings
                .create_ticket(CreateTicket {
                    trip_id: 1,
                    seat_number: seat.to_string(),
                    from_stop_id: 10,
                    to_stop_id: 12,
                    passenger_id: 1,
                })
                .await
                .unwrap();
            ids.push(ticket.id);
        }
        store.broken_ticket.store(ids[1], Ordering::SeqCst);

        clock.advance(Duration::hours(2));
        let report = state.no_show.process_no_show_tickets(1).await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.ticket_ids, vec![ids[0], ids[2]]);
        assert_eq!(report.fees_total, Decimal::from(10000));

        let stuck = state.bookings.get_ticket(ids[1]).await.unwrap();
        assert_eq!(stuck.status, TicketStatus::Sold);
        let last = state.bookings.get_ticket(ids[2]).await.unwrap();
        assert_eq!(last.status, TicketStatus::NoShow);

        // Следующий проход добирает оставшийся билет
        store.broken_ticket.store(0, Ordering::SeqCst);
        let retry = state.no_show.process_no_show_tickets(1).await.unwrap();
        assert_eq!((retry.processed, retry.failed), (1, 0));
        assert_eq!(retry.ticket_ids, vec![ids[1]]);
    }
}
