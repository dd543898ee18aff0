//! Движок продаж: билеты по сегментам, выкуп холдов, отмены с возвратом, посадка и no-show.
//!
//! Проверка и запись выполняются под блокировкой места `(trip_id, seat_number)`.
//! Продажа сверх вместимости дополнительно берёт блокировку рейса (всегда после места).

use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{NoShowPolicy, RefundPolicy};
use crate::error::{BookingError, BookingResult};
use crate::models::{
    CancellationPolicy, HoldStatus, NewTicket, Passenger, Segment, Ticket, TicketStatus, Trip, TripStatus,
};
use crate::services::fares::{FareCalculator, PriceQuote};
use crate::services::locks::{LockTable, SeatKey};
use crate::services::notifier::{QuickSaleNotifier, ReleaseReason};
use crate::services::overbooking::OverbookingCoordinator;
use crate::services::segments::SegmentValidator;
use crate::services::stops::StopIndex;
use crate::store::{BookingStore, TicketTransition};

/// Команда продажи билета; все связи передаются идентификаторами
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTicket {
    pub trip_id: i64,
    pub seat_number: String,
    pub from_stop_id: i64,
    pub to_stop_id: i64,
    pub passenger_id: i64,
}

/// Сегмент, освобождённый отменой или no-show и снова доступный для продажи
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuickSaleSegment {
    pub seat_number: String,
    pub from_stop_id: i64,
    pub to_stop_id: i64,
    pub from_order: i32,
    pub to_order: i32,
    pub released_by: ReleaseReason,
}

/// `TICKET-{trip}-{seat}-{8 hex}`
pub fn generate_qr_code(trip_id: i64, seat_number: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("TICKET-{}-{}-{}", trip_id, seat_number, suffix)
}

/// Ступень возврата по времени до отправления. Билет отменённого рейса возвращается полностью.
pub fn refund_for(
    policy: &RefundPolicy,
    trip: &Trip,
    price: Decimal,
    now: DateTime<Utc>,
) -> (CancellationPolicy, Decimal) {
    if trip.status == TripStatus::Cancelled {
        return (CancellationPolicy::FullRefund, price);
    }

    let until_departure = trip.departure_at - now;
    if until_departure >= Duration::hours(policy.full_refund_hours) {
        (CancellationPolicy::FullRefund, price)
    } else if until_departure >= Duration::hours(policy.partial_refund_hours) {
        let amount = (price * policy.partial_refund_percent / Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        (CancellationPolicy::PartialRefund, amount)
    } else {
        (CancellationPolicy::NoRefund, Decimal::ZERO)
    }
}

#[derive(Clone)]
pub struct BookingEngine {
    store: Arc<dyn BookingStore>,
    stops: StopIndex,
    validator: SegmentValidator,
    fares: FareCalculator,
    overbooking: OverbookingCoordinator,
    seat_locks: Arc<LockTable<SeatKey>>,
    trip_locks: Arc<LockTable<i64>>,
    notifier: QuickSaleNotifier,
    clock: Arc<dyn Clock>,
    refunds: RefundPolicy,
    no_show: NoShowPolicy,
}

impl BookingEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn BookingStore>,
        fares: FareCalculator,
        overbooking: OverbookingCoordinator,
        seat_locks: Arc<LockTable<SeatKey>>,
        trip_locks: Arc<LockTable<i64>>,
        notifier: QuickSaleNotifier,
        clock: Arc<dyn Clock>,
        refunds: RefundPolicy,
        no_show: NoShowPolicy,
    ) -> Self {
        Self {
            stops: StopIndex::new(store.clone()),
            validator: SegmentValidator::new(store.clone(), clock.clone()),
            store,
            fares,
            overbooking,
            seat_locks,
            trip_locks,
            notifier,
            clock,
            refunds,
            no_show,
        }
    }

    pub fn no_show_policy(&self) -> &NoShowPolicy {
        &self.no_show
    }

    async fn trip(&self, trip_id: i64) -> BookingResult<Trip> {
        self.store
            .trip(trip_id)
            .await?
            .ok_or_else(|| BookingError::not_found("trip", trip_id))
    }

    async fn bookable_trip(&self, trip_id: i64) -> BookingResult<Trip> {
        let trip = self.trip(trip_id).await?;
        if !trip.status.is_bookable() {
            return Err(BookingError::TripNotBookable {
                trip_id,
                status: trip.status,
            });
        }
        Ok(trip)
    }

    async fn passenger(&self, passenger_id: i64) -> BookingResult<Passenger> {
        self.store
            .passenger(passenger_id)
            .await?
            .ok_or_else(|| BookingError::not_found("passenger", passenger_id))
    }

    async fn ensure_seat(&self, trip: &Trip, seat_number: &str) -> BookingResult<()> {
        let seats = self.store.bus_seats(trip.bus_id).await?;
        if seats.iter().any(|s| s.number == seat_number) {
            Ok(())
        } else {
            Err(BookingError::not_found("seat", seat_number))
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn new_ticket(
        &self,
        trip: &Trip,
        seat_number: &str,
        from_stop_id: i64,
        to_stop_id: i64,
        segment: Segment,
        passenger: &Passenger,
        overbooked: bool,
    ) -> BookingResult<NewTicket> {
        let occupancy = self.overbooking.get_current_occupancy_rate(trip.id).await?;
        let quote = self
            .fares
            .quote(trip.route_id, from_stop_id, to_stop_id, passenger, occupancy)
            .await?;
        Ok(NewTicket {
            trip_id: trip.id,
            seat_number: seat_number.to_string(),
            from_stop_id,
            to_stop_id,
            segment,
            passenger_id: passenger.id,
            passenger_category: quote.category,
            price: quote.final_price,
            discount: quote.discount,
            qr_code: generate_qr_code(trip.id, seat_number),
            overbooked,
            created_at: self.clock.now(),
        })
    }

    pub async fn create_ticket(&self, cmd: CreateTicket) -> BookingResult<Ticket> {
        let trip = self.bookable_trip(cmd.trip_id).await?;
        let passenger = self.passenger(cmd.passenger_id).await?;
        let resolved = self
            .stops
            .resolve(trip.route_id, cmd.from_stop_id, cmd.to_stop_id)
            .await?;
        let segment = resolved.segment;
        self.ensure_seat(&trip, &cmd.seat_number).await?;

        let _seat_guard = self.seat_locks.lock((trip.id, cmd.seat_number.clone())).await;
        let mut _trip_guard = None;

        let overbooked = match self
            .validator
            .assert_segment_free(trip.id, &cmd.seat_number, segment)
            .await
        {
            Ok(()) => false,
            Err(conflict @ BookingError::SegmentConflict { .. }) => {
                // Есть другое свободное место - это обычный конфликт, овербукинг не нужен
                if !self.validator.free_seats(&trip, segment).await?.is_empty() {
                    return Err(conflict);
                }

                _trip_guard = Some(self.trip_locks.lock(trip.id).await);
                let (limit, approval) = self.overbooking.sellable_limit(&trip).await?;
                let peak = self.validator.peak_occupancy(trip.id, segment).await?;
                if approval.is_none() || peak >= limit {
                    return Err(BookingError::CapacityExceeded {
                        trip_id: trip.id,
                        limit,
                    });
                }
                true
            }
            Err(e) => return Err(e),
        };

        let new_ticket = self
            .new_ticket(
                &trip,
                &cmd.seat_number,
                cmd.from_stop_id,
                cmd.to_stop_id,
                segment,
                &passenger,
                overbooked,
            )
            .await?;
        let ticket = self.store.insert_ticket(new_ticket).await?;

        if overbooked {
            warn!(
                "📈 Ticket {} sold over capacity: trip={} seat={} {}",
                ticket.id, trip.id, ticket.seat_number, segment
            );
        } else {
            info!(
                "🎫 Ticket {} sold: trip={} seat={} {} price={}",
                ticket.id, trip.id, ticket.seat_number, segment, ticket.price
            );
        }
        Ok(ticket)
    }

    /// Выкуп живого холда: HOLD → CONVERTED и новый SOLD билет в одной операции.
    pub async fn confirm_hold(&self, hold_id: i64, passenger_id: i64) -> BookingResult<Ticket> {
        let hold = self
            .store
            .hold(hold_id)
            .await?
            .ok_or_else(|| BookingError::not_found("hold", hold_id))?;
        let passenger = self.passenger(passenger_id).await?;

        let _guard = self.seat_locks.lock((hold.trip_id, hold.seat_number.clone())).await;
        let hold = self
            .store
            .hold(hold_id)
            .await?
            .ok_or_else(|| BookingError::not_found("hold", hold_id))?;

        if hold.status != HoldStatus::Hold {
            return Err(BookingError::transition("hold", hold.status, HoldStatus::Converted));
        }
        if hold.is_stale(self.clock.now()) {
            self.store
                .update_hold_status(hold.id, HoldStatus::Hold, HoldStatus::Expired)
                .await?;
            return Err(BookingError::transition("hold", HoldStatus::Expired, HoldStatus::Converted));
        }

        let trip = self.bookable_trip(hold.trip_id).await?;
        let new_ticket = self
            .new_ticket(
                &trip,
                &hold.seat_number,
                hold.from_stop_id,
                hold.to_stop_id,
                hold.segment(),
                &passenger,
                false,
            )
            .await?;

        let ticket = self
            .store
            .convert_hold(hold.id, new_ticket)
            .await?
            .ok_or_else(|| BookingError::transition("hold", "UNKNOWN", HoldStatus::Converted))?;

        info!("🎫 Hold {} converted into ticket {}", hold.id, ticket.id);
        Ok(ticket)
    }

    /// SOLD → CANCELLED с возвратом по ступеням. Уведомление уходит после записи
    /// и только если сегмент места действительно освободился.
    pub async fn cancel_ticket(&self, ticket_id: i64) -> BookingResult<Ticket> {
        let ticket = self.get_ticket(ticket_id).await?;

        let (cancelled, trip, still_free) = {
            let _guard = self.seat_locks.lock((ticket.trip_id, ticket.seat_number.clone())).await;
            let ticket = self.get_ticket(ticket_id).await?;
            match ticket.status {
                TicketStatus::Sold => {}
                TicketStatus::Cancelled => return Err(BookingError::AlreadyCancelled { ticket_id }),
                other => return Err(BookingError::transition("ticket", other, TicketStatus::Cancelled)),
            }

            let trip = self.trip(ticket.trip_id).await?;
            if matches!(trip.status, TripStatus::Departed | TripStatus::Arrived) {
                return Err(BookingError::transition(
                    "ticket",
                    format!("{} on {} trip", ticket.status, trip.status),
                    TicketStatus::Cancelled,
                ));
            }

            let now = self.clock.now();
            let (policy, refund) = refund_for(&self.refunds, &trip, ticket.price, now);
            let transition = TicketTransition {
                cancelled_at: Some(now),
                refund_amount: Some(refund),
                cancellation_policy: Some(policy),
                ..TicketTransition::simple(TicketStatus::Sold, TicketStatus::Cancelled)
            };
            let cancelled = self
                .store
                .transition_ticket(ticket_id, &transition)
                .await?
                .ok_or(BookingError::AlreadyCancelled { ticket_id })?;
            let still_free = self
                .validator
                .released_segment_free(trip.id, &cancelled.seat_number, cancelled.segment())
                .await;
            (cancelled, trip, still_free)
        };

        info!(
            "🗑️ Ticket {} cancelled: {} refund {}",
            cancelled.id,
            cancelled
                .cancellation_policy
                .map(|p| p.as_str())
                .unwrap_or("-"),
            cancelled.refund_amount.unwrap_or_default()
        );
        if still_free {
            self.notifier.segment_released(
                &trip,
                &cancelled.seat_number,
                cancelled.from_stop_id,
                cancelled.to_stop_id,
                ReleaseReason::Cancelled,
            );
        }
        Ok(cancelled)
    }

    /// Посадка: SOLD → USED
    pub async fn mark_used(&self, ticket_id: i64) -> BookingResult<Ticket> {
        let ticket = self.get_ticket(ticket_id).await?;
        let _guard = self.seat_locks.lock((ticket.trip_id, ticket.seat_number.clone())).await;

        match self
            .store
            .transition_ticket(ticket_id, &TicketTransition::simple(TicketStatus::Sold, TicketStatus::Used))
            .await?
        {
            Some(used) => {
                info!("✅ Ticket {} boarded", used.id);
                Ok(used)
            }
            None => {
                let current = self.get_ticket(ticket_id).await?;
                Err(BookingError::transition("ticket", current.status, TicketStatus::Used))
            }
        }
    }

    /// Ручной no-show одного билета: SOLD → NO_SHOW со штрафом, сегмент освобождается.
    pub async fn mark_no_show(&self, ticket_id: i64) -> BookingResult<Ticket> {
        let ticket = self.get_ticket(ticket_id).await?;
        let trip = self.trip(ticket.trip_id).await?;
        match self.release_as_no_show(&ticket, &trip).await? {
            Some(released) => Ok(released),
            None => {
                let current = self.get_ticket(ticket_id).await?;
                Err(BookingError::transition("ticket", current.status, TicketStatus::NoShow))
            }
        }
    }

    /// CAS SOLD → NO_SHOW под блокировкой места. `None`, если билет уже не SOLD.
    pub(crate) async fn release_as_no_show(&self, ticket: &Ticket, trip: &Trip) -> BookingResult<Option<Ticket>> {
        let (released, still_free) = {
            let _guard = self.seat_locks.lock((ticket.trip_id, ticket.seat_number.clone())).await;
            let transition = TicketTransition {
                no_show_fee: Some(self.no_show.fee),
                ..TicketTransition::simple(TicketStatus::Sold, TicketStatus::NoShow)
            };
            let released = self.store.transition_ticket(ticket.id, &transition).await?;
            let still_free = match released.as_ref() {
                Some(t) => {
                    self.validator
                        .released_segment_free(t.trip_id, &t.seat_number, t.segment())
                        .await
                }
                None => false,
            };
            (released, still_free)
        };

        if let Some(released) = released.as_ref() {
            info!(
                "🚫 Ticket {} marked NO_SHOW (fee {}), seat {} {} released",
                released.id,
                self.no_show.fee,
                released.seat_number,
                released.segment()
            );
            if still_free {
                self.notifier.segment_released(
                    trip,
                    &released.seat_number,
                    released.from_stop_id,
                    released.to_stop_id,
                    ReleaseReason::NoShow,
                );
            }
        }
        Ok(released)
    }

    /// Цена сегмента для пассажира без продажи
    pub async fn quote_fare(
        &self,
        trip_id: i64,
        from_stop_id: i64,
        to_stop_id: i64,
        passenger_id: i64,
    ) -> BookingResult<PriceQuote> {
        let trip = self.trip(trip_id).await?;
        let passenger = self.passenger(passenger_id).await?;
        self.stops.resolve(trip.route_id, from_stop_id, to_stop_id).await?;
        let occupancy = self.overbooking.get_current_occupancy_rate(trip_id).await?;
        self.fares
            .quote(trip.route_id, from_stop_id, to_stop_id, &passenger, occupancy)
            .await
    }

    /// Место свободно целиком: ни SOLD билета, ни живого холда
    pub async fn is_seat_available(&self, trip_id: i64, seat_number: &str) -> BookingResult<bool> {
        let trip = self.trip(trip_id).await?;
        self.ensure_seat(&trip, seat_number).await?;

        let now = self.clock.now();
        let sold = self
            .store
            .seat_tickets(trip_id, seat_number, Some(TicketStatus::Sold))
            .await?;
        let held = self
            .store
            .seat_holds(trip_id, seat_number, Some(HoldStatus::Hold))
            .await?
            .iter()
            .any(|h| h.is_live(now));
        Ok(sold.is_empty() && !held)
    }

    pub async fn is_segment_available(
        &self,
        trip_id: i64,
        seat_number: &str,
        from_stop_id: i64,
        to_stop_id: i64,
    ) -> BookingResult<bool> {
        let trip = self.trip(trip_id).await?;
        self.ensure_seat(&trip, seat_number).await?;
        let resolved = self.stops.resolve(trip.route_id, from_stop_id, to_stop_id).await?;
        Ok(self
            .validator
            .conflicts(trip_id, seat_number, resolved.segment)
            .await?
            .is_empty())
    }

    pub async fn get_ticket(&self, ticket_id: i64) -> BookingResult<Ticket> {
        self.store
            .ticket(ticket_id)
            .await?
            .ok_or_else(|| BookingError::not_found("ticket", ticket_id))
    }

    pub async fn get_ticket_by_qr(&self, qr_code: &str) -> BookingResult<Ticket> {
        self.store
            .ticket_by_qr(qr_code)
            .await?
            .ok_or_else(|| BookingError::not_found("ticket", qr_code))
    }

    pub async fn tickets_by_trip(&self, trip_id: i64, status: Option<TicketStatus>) -> BookingResult<Vec<Ticket>> {
        Ok(self.store.trip_tickets(trip_id, status).await?)
    }

    pub async fn tickets_by_passenger(&self, passenger_id: i64) -> BookingResult<Vec<Ticket>> {
        Ok(self.store.passenger_tickets(passenger_id).await?)
    }

    pub async fn count_sold_tickets(&self, trip_id: i64) -> BookingResult<i64> {
        Ok(self.store.count_tickets(trip_id, TicketStatus::Sold).await?)
    }

    /// Сегменты, освобождённые отменой или no-show, которые сейчас снова свободны
    pub async fn quick_sale_segments(&self, trip_id: i64) -> BookingResult<Vec<QuickSaleSegment>> {
        let trip = self.trip(trip_id).await?;
        if !trip.status.is_bookable() && trip.status != TripStatus::Departed {
            return Ok(Vec::new());
        }

        let released = self.store.trip_tickets(trip_id, None).await?;
        let mut seen = HashSet::new();
        let mut segments = Vec::new();

        for ticket in released {
            let released_by = match ticket.status {
                TicketStatus::Cancelled => ReleaseReason::Cancelled,
                TicketStatus::NoShow => ReleaseReason::NoShow,
                _ => continue,
            };
            if !seen.insert((ticket.seat_number.clone(), ticket.from_order, ticket.to_order)) {
                continue;
            }
            let free = self
                .validator
                .conflicts(trip_id, &ticket.seat_number, ticket.segment())
                .await?
                .is_empty();
            if free {
                segments.push(QuickSaleSegment {
                    seat_number: ticket.seat_number,
                    from_stop_id: ticket.from_stop_id,
                    to_stop_id: ticket.to_stop_id,
                    from_order: ticket.from_order,
                    to_order: ticket.to_order,
                    released_by,
                });
            }
        }
        Ok(segments)
    }

    /// Пассажиры в салоне на перегоне, который начинается с остановки `stop_id`
    pub async fn passengers_on_board(&self, trip_id: i64, stop_id: i64) -> BookingResult<Vec<Ticket>> {
        let trip = self.trip(trip_id).await?;
        let stop_order = self.stops.stop_order(trip.route_id, stop_id).await?;
        let tickets = self.store.trip_tickets(trip_id, None).await?;
        Ok(tickets
            .into_iter()
            .filter(|t| matches!(t.status, TicketStatus::Sold | TicketStatus::Used))
            .filter(|t| t.segment().covers(stop_order))
            .collect())
    }
}
