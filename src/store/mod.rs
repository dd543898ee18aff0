//! Слой хранения. Движок зависит только от трейта `BookingStore`;
//! `PgStore` работает с Postgres, `InMemoryStore` используется без DATABASE_URL и в тестах.
//!
//! Все смены статусов - compare-and-set: запись меняется только если текущий статус
//! совпадает с ожидаемым. Повторный sweep или устаревшее решение ничего не делают.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::StoreResult;
use crate::models::{
    Bus, CancellationPolicy, FareRule, HoldStatus, NewOverbookingRequest, NewSeatHold, NewTicket,
    OverbookingDecision, OverbookingRequest, OverbookingStatus, Passenger, Seat, SeatHold, Stop,
    Ticket, TicketStatus, Trip, TripStatus,
};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Смена статуса билета вместе с полями, которые она заполняет.
#[derive(Debug, Clone)]
pub struct TicketTransition {
    pub from: TicketStatus,
    pub to: TicketStatus,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refund_amount: Option<Decimal>,
    pub cancellation_policy: Option<CancellationPolicy>,
    pub no_show_fee: Option<Decimal>,
}

impl TicketTransition {
    pub fn simple(from: TicketStatus, to: TicketStatus) -> Self {
        Self {
            from,
            to,
            cancelled_at: None,
            refund_amount: None,
            cancellation_policy: None,
            no_show_fee: None,
        }
    }
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    // --- рейсы, автобусы, маршруты ---
    async fn trip(&self, id: i64) -> StoreResult<Option<Trip>>;

    /// CAS: `true`, если статус был `from` и стал `to`
    async fn update_trip_status(&self, id: i64, from: TripStatus, to: TripStatus) -> StoreResult<bool>;

    /// Рейсы в SCHEDULED/BOARDING/DEPARTED с отправлением не позже `cutoff`
    async fn trips_departing_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Trip>>;

    async fn bus(&self, id: i64) -> StoreResult<Option<Bus>>;

    async fn bus_seats(&self, bus_id: i64) -> StoreResult<Vec<Seat>>;

    /// Остановки маршрута по возрастанию порядка
    async fn route_stops(&self, route_id: i64) -> StoreResult<Vec<Stop>>;

    async fn passenger(&self, id: i64) -> StoreResult<Option<Passenger>>;

    async fn fare_rule(&self, route_id: i64, from_stop_id: i64, to_stop_id: i64) -> StoreResult<Option<FareRule>>;

    // --- билеты ---
    async fn ticket(&self, id: i64) -> StoreResult<Option<Ticket>>;

    async fn ticket_by_qr(&self, qr_code: &str) -> StoreResult<Option<Ticket>>;

    async fn seat_tickets(&self, trip_id: i64, seat_number: &str, status: Option<TicketStatus>) -> StoreResult<Vec<Ticket>>;

    async fn trip_tickets(&self, trip_id: i64, status: Option<TicketStatus>) -> StoreResult<Vec<Ticket>>;

    async fn passenger_tickets(&self, passenger_id: i64) -> StoreResult<Vec<Ticket>>;

    async fn count_tickets(&self, trip_id: i64, status: TicketStatus) -> StoreResult<i64>;

    async fn insert_ticket(&self, ticket: NewTicket) -> StoreResult<Ticket>;

    /// CAS по `transition.from`; `None`, если билет уже в другом статусе
    async fn transition_ticket(&self, id: i64, transition: &TicketTransition) -> StoreResult<Option<Ticket>>;

    // --- холды ---
    async fn hold(&self, id: i64) -> StoreResult<Option<SeatHold>>;

    async fn seat_holds(&self, trip_id: i64, seat_number: &str, status: Option<HoldStatus>) -> StoreResult<Vec<SeatHold>>;

    async fn trip_holds(&self, trip_id: i64, status: Option<HoldStatus>) -> StoreResult<Vec<SeatHold>>;

    async fn user_holds(&self, user_id: i64, status: Option<HoldStatus>) -> StoreResult<Vec<SeatHold>>;

    async fn insert_hold(&self, hold: NewSeatHold) -> StoreResult<SeatHold>;

    async fn update_hold_status(&self, id: i64, from: HoldStatus, to: HoldStatus) -> StoreResult<bool>;

    /// Атомарно: холд HOLD → CONVERTED и вставка билета. `None`, если холд уже не HOLD.
    async fn convert_hold(&self, hold_id: i64, ticket: NewTicket) -> StoreResult<Option<Ticket>>;

    /// Холды в статусе HOLD с `expires_at < now`
    async fn expired_holds(&self, now: DateTime<Utc>) -> StoreResult<Vec<SeatHold>>;

    // --- овербукинг ---
    async fn overbooking_request(&self, id: i64) -> StoreResult<Option<OverbookingRequest>>;

    async fn overbooking_requests(
        &self,
        trip_id: Option<i64>,
        status: Option<OverbookingStatus>,
    ) -> StoreResult<Vec<OverbookingRequest>>;

    async fn insert_overbooking_request(&self, request: NewOverbookingRequest) -> StoreResult<OverbookingRequest>;

    /// CAS из PENDING; `None`, если запрос уже решён
    async fn decide_overbooking_request(
        &self,
        id: i64,
        decision: &OverbookingDecision,
    ) -> StoreResult<Option<OverbookingRequest>>;

    async fn pending_requests_created_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<OverbookingRequest>>;
}
