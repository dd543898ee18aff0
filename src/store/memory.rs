use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

use super::{BookingStore, TicketTransition};
use crate::error::StoreResult;
use crate::models::{
    Bus, FareRule, HoldStatus, NewOverbookingRequest, NewSeatHold, NewTicket, OverbookingDecision,
    OverbookingRequest, OverbookingStatus, Passenger, Seat, SeatHold, Stop, Ticket, TicketStatus,
    Trip, TripStatus,
};

#[derive(Default)]
struct Tables {
    trips: HashMap<i64, Trip>,
    buses: HashMap<i64, Bus>,
    seats: HashMap<i64, Vec<Seat>>,
    stops: HashMap<i64, Vec<Stop>>,
    passengers: HashMap<i64, Passenger>,
    fare_rules: Vec<FareRule>,
    tickets: HashMap<i64, Ticket>,
    holds: HashMap<i64, SeatHold>,
    overbooking: HashMap<i64, OverbookingRequest>,
}

/// Хранилище в памяти процесса. Справочники (рейсы, автобусы, остановки, тарифы)
/// заполняются через `seed_*`, CRUD для них движок не предоставляет.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    next_id: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub async fn seed_trip(&self, trip: Trip) {
        self.tables.write().await.trips.insert(trip.id, trip);
    }

    /// Автобус и его места; номера мест задаются строками вроде "1A"
    pub async fn seed_bus(&self, bus: Bus, seat_numbers: &[&str]) {
        let seats = seat_numbers
            .iter()
            .enumerate()
            .map(|(i, number)| Seat {
                id: bus.id * 1000 + i as i64,
                bus_id: bus.id,
                number: number.to_string(),
            })
            .collect();
        let mut tables = self.tables.write().await;
        tables.seats.insert(bus.id, seats);
        tables.buses.insert(bus.id, bus);
    }

    pub async fn seed_stops(&self, route_id: i64, mut stops: Vec<Stop>) {
        stops.sort_by_key(|s| s.order);
        self.tables.write().await.stops.insert(route_id, stops);
    }

    pub async fn seed_passenger(&self, passenger: Passenger) {
        self.tables
            .write()
            .await
            .passengers
            .insert(passenger.id, passenger);
    }

    pub async fn seed_fare_rule(&self, rule: FareRule) {
        self.tables.write().await.fare_rules.push(rule);
    }
}

fn sorted_by_id<T, F: Fn(&T) -> i64>(mut items: Vec<T>, key: F) -> Vec<T> {
    items.sort_by_key(key);
    items
}

fn ticket_from_new(id: i64, t: NewTicket) -> Ticket {
    Ticket {
        id,
        trip_id: t.trip_id,
        seat_number: t.seat_number,
        from_stop_id: t.from_stop_id,
        to_stop_id: t.to_stop_id,
        from_order: t.segment.from_order(),
        to_order: t.segment.to_order(),
        passenger_id: t.passenger_id,
        passenger_category: t.passenger_category,
        price: t.price,
        discount: t.discount,
        status: TicketStatus::Sold,
        qr_code: t.qr_code,
        overbooked: t.overbooked,
        created_at: t.created_at,
        cancelled_at: None,
        refund_amount: None,
        cancellation_policy: None,
        no_show_fee: None,
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn trip(&self, id: i64) -> StoreResult<Option<Trip>> {
        Ok(self.tables.read().await.trips.get(&id).cloned())
    }

    async fn update_trip_status(&self, id: i64, from: TripStatus, to: TripStatus) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.trips.get_mut(&id) {
            Some(trip) if trip.status == from => {
                trip.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn trips_departing_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Trip>> {
        let tables = self.tables.read().await;
        let trips: Vec<Trip> = tables
            .trips
            .values()
            .filter(|t| {
                matches!(
                    t.status,
                    TripStatus::Scheduled | TripStatus::Boarding | TripStatus::Departed
                ) && t.departure_at <= cutoff
            })
            .cloned()
            .collect();
        Ok(sorted_by_id(trips, |t| t.id))
    }

    async fn bus(&self, id: i64) -> StoreResult<Option<Bus>> {
        Ok(self.tables.read().await.buses.get(&id).cloned())
    }

    async fn bus_seats(&self, bus_id: i64) -> StoreResult<Vec<Seat>> {
        Ok(self
            .tables
            .read()
            .await
            .seats
            .get(&bus_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn route_stops(&self, route_id: i64) -> StoreResult<Vec<Stop>> {
        Ok(self
            .tables
            .read()
            .await
            .stops
            .get(&route_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn passenger(&self, id: i64) -> StoreResult<Option<Passenger>> {
        Ok(self.tables.read().await.passengers.get(&id).cloned())
    }

    async fn fare_rule(&self, route_id: i64, from_stop_id: i64, to_stop_id: i64) -> StoreResult<Option<FareRule>> {
        Ok(self
            .tables
            .read()
            .await
            .fare_rules
            .iter()
            .find(|r| r.route_id == route_id && r.from_stop_id == from_stop_id && r.to_stop_id == to_stop_id)
            .cloned())
    }

    async fn ticket(&self, id: i64) -> StoreResult<Option<Ticket>> {
        Ok(self.tables.read().await.tickets.get(&id).cloned())
    }

    async fn ticket_by_qr(&self, qr_code: &str) -> StoreResult<Option<Ticket>> {
        Ok(self
            .tables
            .read()
            .await
            .tickets
            .values()
            .find(|t| t.qr_code == qr_code)
            .cloned())
    }

    async fn seat_tickets(&self, trip_id: i64, seat_number: &str, status: Option<TicketStatus>) -> StoreResult<Vec<Ticket>> {
        let tables = self.tables.read().await;
        let tickets: Vec<Ticket> = tables
            .tickets
            .values()
            .filter(|t| t.trip_id == trip_id && t.seat_number == seat_number)
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        Ok(sorted_by_id(tickets, |t| t.id))
    }

    async fn trip_tickets(&self, trip_id: i64, status: Option<TicketStatus>) -> StoreResult<Vec<Ticket>> {
        let tables = self.tables.read().await;
        let tickets: Vec<Ticket> = tables
            .tickets
            .values()
            .filter(|t| t.trip_id == trip_id)
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        Ok(sorted_by_id(tickets, |t| t.id))
    }

    async fn passenger_tickets(&self, passenger_id: i64) -> StoreResult<Vec<Ticket>> {
        let tables = self.tables.read().await;
        let tickets: Vec<Ticket> = tables
            .tickets
            .values()
            .filter(|t| t.passenger_id == passenger_id)
            .cloned()
            .collect();
        Ok(sorted_by_id(tickets, |t| t.id))
    }

    async fn count_tickets(&self, trip_id: i64, status: TicketStatus) -> StoreResult<i64> {
        Ok(self
            .tables
            .read()
            .await
            .tickets
            .values()
            .filter(|t| t.trip_id == trip_id && t.status == status)
            .count() as i64)
    }

    async fn insert_ticket(&self, ticket: NewTicket) -> StoreResult<Ticket> {
        let ticket = ticket_from_new(self.next_id(), ticket);
        self.tables
            .write()
            .await
            .tickets
            .insert(ticket.id, ticket.clone());
        Ok(ticket)
    }

    async fn transition_ticket(&self, id: i64, transition: &TicketTransition) -> StoreResult<Option<Ticket>> {
        let mut tables = self.tables.write().await;
        let Some(ticket) = tables.tickets.get_mut(&id) else {
            return Ok(None);
        };
        if ticket.status != transition.from {
            return Ok(None);
        }
        ticket.status = transition.to;
        if transition.cancelled_at.is_some() {
            ticket.cancelled_at = transition.cancelled_at;
        }
        if transition.refund_amount.is_some() {
            ticket.refund_amount = transition.refund_amount;
        }
        if transition.cancellation_policy.is_some() {
            ticket.cancellation_policy = transition.cancellation_policy;
        }
        if transition.no_show_fee.is_some() {
            ticket.no_show_fee = transition.no_show_fee;
        }
        Ok(Some(ticket.clone()))
    }

    async fn hold(&self, id: i64) -> StoreResult<Option<SeatHold>> {
        Ok(self.tables.read().await.holds.get(&id).cloned())
    }

    async fn seat_holds(&self, trip_id: i64, seat_number: &str, status: Option<HoldStatus>) -> StoreResult<Vec<SeatHold>> {
        let tables = self.tables.read().await;
        let holds: Vec<SeatHold> = tables
            .holds
            .values()
            .filter(|h| h.trip_id == trip_id && h.seat_number == seat_number)
            .filter(|h| status.map_or(true, |s| h.status == s))
            .cloned()
            .collect();
        Ok(sorted_by_id(holds, |h| h.id))
    }

    async fn trip_holds(&self, trip_id: i64, status: Option<HoldStatus>) -> StoreResult<Vec<SeatHold>> {
        let tables = self.tables.read().await;
        let holds: Vec<SeatHold> = tables
            .holds
            .values()
            .filter(|h| h.trip_id == trip_id)
            .filter(|h| status.map_or(true, |s| h.status == s))
            .cloned()
            .collect();
        Ok(sorted_by_id(holds, |h| h.id))
    }

    async fn user_holds(&self, user_id: i64, status: Option<HoldStatus>) -> StoreResult<Vec<SeatHold>> {
        let tables = self.tables.read().await;
        let holds: Vec<SeatHold> = tables
            .holds
            .values()
            .filter(|h| h.user_id == user_id)
            .filter(|h| status.map_or(true, |s| h.status == s))
            .cloned()
            .collect();
        Ok(sorted_by_id(holds, |h| h.id))
    }

    async fn insert_hold(&self, hold: NewSeatHold) -> StoreResult<SeatHold> {
        let hold = SeatHold {
            id: self.next_id(),
            trip_id: hold.trip_id,
            seat_number: hold.seat_number,
            from_stop_id: hold.from_stop_id,
            to_stop_id: hold.to_stop_id,
            from_order: hold.segment.from_order(),
            to_order: hold.segment.to_order(),
            user_id: hold.user_id,
            status: HoldStatus::Hold,
            created_at: hold.created_at,
            expires_at: hold.expires_at,
        };
        self.tables.write().await.holds.insert(hold.id, hold.clone());
        Ok(hold)
    }

    async fn update_hold_status(&self, id: i64, from: HoldStatus, to: HoldStatus) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.holds.get_mut(&id) {
            Some(hold) if hold.status == from => {
                hold.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn convert_hold(&self, hold_id: i64, ticket: NewTicket) -> StoreResult<Option<Ticket>> {
        let mut tables = self.tables.write().await;
        match tables.holds.get_mut(&hold_id) {
            Some(hold) if hold.status == HoldStatus::Hold => hold.status = HoldStatus::Converted,
            _ => return Ok(None),
        }
        let ticket = ticket_from_new(self.next_id(), ticket);
        tables.tickets.insert(ticket.id, ticket.clone());
        Ok(Some(ticket))
    }

    async fn expired_holds(&self, now: DateTime<Utc>) -> StoreResult<Vec<SeatHold>> {
        let tables = self.tables.read().await;
        let holds: Vec<SeatHold> = tables
            .holds
            .values()
            .filter(|h| h.status == HoldStatus::Hold && h.expires_at < now)
            .cloned()
            .collect();
        Ok(sorted_by_id(holds, |h| h.id))
    }

    async fn overbooking_request(&self, id: i64) -> StoreResult<Option<OverbookingRequest>> {
        Ok(self.tables.read().await.overbooking.get(&id).cloned())
    }

    async fn overbooking_requests(
        &self,
        trip_id: Option<i64>,
        status: Option<OverbookingStatus>,
    ) -> StoreResult<Vec<OverbookingRequest>> {
        let tables = self.tables.read().await;
        let requests: Vec<OverbookingRequest> = tables
            .overbooking
            .values()
            .filter(|r| trip_id.map_or(true, |t| r.trip_id == t))
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        Ok(sorted_by_id(requests, |r| r.id))
    }

    async fn insert_overbooking_request(&self, request: NewOverbookingRequest) -> StoreResult<OverbookingRequest> {
        let request = OverbookingRequest {
            id: self.next_id(),
            trip_id: request.trip_id,
            requested_by: request.requested_by,
            status: OverbookingStatus::Pending,
            occupancy_at_request: request.occupancy_at_request,
            approved_multiplier: None,
            created_at: request.created_at,
            decided_by: None,
            decided_at: None,
            reason: request.reason,
        };
        self.tables
            .write()
            .await
            .overbooking
            .insert(request.id, request.clone());
        Ok(request)
    }

    async fn decide_overbooking_request(
        &self,
        id: i64,
        decision: &OverbookingDecision,
    ) -> StoreResult<Option<OverbookingRequest>> {
        let mut tables = self.tables.write().await;
        let Some(request) = tables.overbooking.get_mut(&id) else {
            return Ok(None);
        };
        if request.status != OverbookingStatus::Pending {
            return Ok(None);
        }
        request.status = decision.status;
        request.decided_by = decision.decided_by;
        request.decided_at = Some(decision.decided_at);
        request.approved_multiplier = decision.approved_multiplier;
        if decision.reason.is_some() {
            request.reason = decision.reason.clone();
        }
        Ok(Some(request.clone()))
    }

    async fn pending_requests_created_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<OverbookingRequest>> {
        let tables = self.tables.read().await;
        let requests: Vec<OverbookingRequest> = tables
            .overbooking
            .values()
            .filter(|r| r.status == OverbookingStatus::Pending && r.created_at < cutoff)
            .cloned()
            .collect();
        Ok(sorted_by_id(requests, |r| r.id))
    }
}
