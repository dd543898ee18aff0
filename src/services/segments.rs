//! Проверка пересечения сегментов на одном месте.
//!
//! Учитываются только SOLD билеты и HOLD холды. Сегменты полуоткрытые, касание границами
//! не конфликт. Вызовы `assert_segment_free` выполняются под блокировкой места.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error};

use crate::clock::Clock;
use crate::error::{BookingError, BookingResult};
use crate::models::{HoldStatus, SeatHold, Segment, Ticket, TicketStatus, Trip};
use crate::store::BookingStore;

/// Что мешает продать сегмент
#[derive(Debug, Clone, Default)]
pub struct SegmentConflicts {
    pub tickets: Vec<Ticket>,
    pub holds: Vec<SeatHold>,
}

impl SegmentConflicts {
    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty() && self.holds.is_empty()
    }
}

#[derive(Clone)]
pub struct SegmentValidator {
    store: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
}

impl SegmentValidator {
    pub fn new(store: Arc<dyn BookingStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Пересекающиеся SOLD билеты и живые HOLD холды. Только чтение:
    /// просроченные холды пропускаются, но не переводятся в EXPIRED.
    pub async fn conflicts(&self, trip_id: i64, seat_number: &str, segment: Segment) -> BookingResult<SegmentConflicts> {
        let now = self.clock.now();
        let tickets = self
            .store
            .seat_tickets(trip_id, seat_number, Some(TicketStatus::Sold))
            .await?
            .into_iter()
            .filter(|t| t.segment().overlaps(&segment))
            .collect();
        let holds = self
            .store
            .seat_holds(trip_id, seat_number, Some(HoldStatus::Hold))
            .await?
            .into_iter()
            .filter(|h| h.is_live(now) && h.segment().overlaps(&segment))
            .collect();
        Ok(SegmentConflicts { tickets, holds })
    }

    /// Проверка после освобождения сегмента: событие quick-sale имеет смысл, только если
    /// на месте не осталось пересекающегося SOLD билета (овербукинг) или живого холда.
    /// Ошибка хранилища считается занятостью, событие в этом случае не отправляется.
    pub async fn released_segment_free(&self, trip_id: i64, seat_number: &str, segment: Segment) -> bool {
        match self.conflicts(trip_id, seat_number, segment).await {
            Ok(conflicts) if conflicts.is_empty() => true,
            Ok(conflicts) => {
                debug!(
                    "🔕 Trip {} seat {} {} is still occupied ({} tickets, {} holds), no quick-sale event",
                    trip_id,
                    seat_number,
                    segment,
                    conflicts.tickets.len(),
                    conflicts.holds.len()
                );
                false
            }
            Err(e) => {
                error!(
                    "Failed to re-check trip {} seat {} {} after release: {:?}",
                    trip_id, seat_number, segment, e
                );
                false
            }
        }
    }

    pub async fn is_segment_free(&self, trip_id: i64, seat_number: &str, from_order: i32, to_order: i32) -> BookingResult<bool> {
        let segment = Segment::new(from_order, to_order)?;
        Ok(self.conflicts(trip_id, seat_number, segment).await?.is_empty())
    }

    /// Проверка под блокировкой места. Холд с истёкшим сроком, который sweeper ещё
    /// не обработал, переводится в EXPIRED здесь же и дальше не учитывается.
    pub async fn assert_segment_free(&self, trip_id: i64, seat_number: &str, segment: Segment) -> BookingResult<()> {
        let now = self.clock.now();

        let holds = self
            .store
            .seat_holds(trip_id, seat_number, Some(HoldStatus::Hold))
            .await?;
        for hold in holds.iter().filter(|h| h.is_stale(now)) {
            if self
                .store
                .update_hold_status(hold.id, HoldStatus::Hold, HoldStatus::Expired)
                .await?
            {
                debug!("⏰ Lazily expired stale hold {} on trip {} seat {}", hold.id, trip_id, seat_number);
            }
        }
        let hold_conflict = holds
            .iter()
            .any(|h| h.is_live(now) && h.segment().overlaps(&segment));

        let ticket_conflict = !hold_conflict
            && self
                .store
                .seat_tickets(trip_id, seat_number, Some(TicketStatus::Sold))
                .await?
                .iter()
                .any(|t| t.segment().overlaps(&segment));

        if hold_conflict || ticket_conflict {
            return Err(BookingError::SegmentConflict {
                trip_id,
                seat_number: seat_number.to_string(),
                from_order: segment.from_order(),
                to_order: segment.to_order(),
            });
        }
        Ok(())
    }

    /// Места автобуса рейса, свободные на всём сегменте. Без блокировок.
    pub async fn free_seats(&self, trip: &Trip, segment: Segment) -> BookingResult<Vec<String>> {
        let now = self.clock.now();
        let seats = self.store.bus_seats(trip.bus_id).await?;
        let sold = self.store.trip_tickets(trip.id, Some(TicketStatus::Sold)).await?;
        let holds = self.store.trip_holds(trip.id, Some(HoldStatus::Hold)).await?;

        let taken: HashSet<&str> = sold
            .iter()
            .filter(|t| t.segment().overlaps(&segment))
            .map(|t| t.seat_number.as_str())
            .chain(
                holds
                    .iter()
                    .filter(|h| h.is_live(now) && h.segment().overlaps(&segment))
                    .map(|h| h.seat_number.as_str()),
            )
            .collect();

        Ok(seats
            .into_iter()
            .filter(|s| !taken.contains(s.number.as_str()))
            .map(|s| s.number)
            .collect())
    }

    /// Максимальное число занятых (SOLD + живые HOLD) мест на любой остановке сегмента.
    pub async fn peak_occupancy(&self, trip_id: i64, segment: Segment) -> BookingResult<i64> {
        let now = self.clock.now();
        let sold = self.store.trip_tickets(trip_id, Some(TicketStatus::Sold)).await?;
        let holds = self.store.trip_holds(trip_id, Some(HoldStatus::Hold)).await?;

        let intervals: Vec<Segment> = sold
            .iter()
            .map(|t| t.segment())
            .chain(holds.iter().filter(|h| h.is_live(now)).map(|h| h.segment()))
            .collect();

        Ok(segment
            .stop_orders()
            .map(|order| intervals.iter().filter(|s| s.covers(order)).count() as i64)
            .max()
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{Bus, NewSeatHold, NewTicket, PassengerCategory, TripStatus};
    use crate::store::InMemoryStore;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    fn seg(a: i32, b: i32) -> Segment {
        Segment::new(a, b).unwrap()
    }

    async fn setup() -> (Arc<InMemoryStore>, ManualClock, SegmentValidator, Trip) {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        let clock = ManualClock::new(now);
        let store = Arc::new(InMemoryStore::new());
        store
            .seed_bus(Bus { id: 1, plate: "A001AA".into(), capacity: 2 }, &["1A", "1B"])
            .await;
        let trip = Trip {
            id: 1,
            route_id: 1,
            bus_id: 1,
            date: now.date_naive(),
            departure_at: now + Duration::hours(5),
            arrival_at: None,
            status: TripStatus::Scheduled,
        };
        store.seed_trip(trip.clone()).await;
        let validator = SegmentValidator::new(store.clone(), Arc::new(clock.clone()));
        (store, clock, validator, trip)
    }

    async fn sell(store: &InMemoryStore, seat: &str, segment: Segment, qr: &str) {
        store
            .insert_ticket(NewTicket {
                trip_id: 1,
                seat_number: seat.into(),
                from_stop_id: 100 + segment.from_order() as i64,
                to_stop_id: 100 + segment.to_order() as i64,
                segment,
                passenger_id: 1,
                passenger_category: PassengerCategory::Adult,
                price: Decimal::from(100),
                discount: Decimal::ZERO,
                qr_code: qr.into(),
                overbooked: false,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn adjacent_sale_is_free_overlapping_is_not() {
        let (store, _clock, validator, _trip) = setup().await;
        sell(&store, "1A", seg(0, 2), "Q1").await;

        assert!(validator.is_segment_free(1, "1A", 2, 5).await.unwrap());
        assert!(!validator.is_segment_free(1, "1A", 1, 3).await.unwrap());
        assert!(validator.is_segment_free(1, "1B", 1, 3).await.unwrap());

        let err = validator.assert_segment_free(1, "1A", seg(1, 3)).await.unwrap_err();
        assert!(matches!(err, BookingError::SegmentConflict { from_order: 1, to_order: 3, .. }));
    }

    #[tokio::test]
    async fn reversed_segment_is_invalid() {
        let (_store, _clock, validator, _trip) = setup().await;
        assert!(matches!(
            validator.is_segment_free(1, "1A", 3, 1).await,
            Err(BookingError::InvalidSegment { .. })
        ));
    }

    #[tokio::test]
    async fn stale_hold_is_expired_in_place() {
        let (store, clock, validator, _trip) = setup().await;
        let hold = store
            .insert_hold(NewSeatHold {
                trip_id: 1,
                seat_number: "1A".into(),
                from_stop_id: 100,
                to_stop_id: 103,
                segment: seg(0, 3),
                user_id: 9,
                created_at: clock.now(),
                expires_at: clock.now() + Duration::minutes(10),
            })
            .await
            .unwrap();

        assert!(validator.assert_segment_free(1, "1A", seg(1, 2)).await.is_err());

        clock.advance(Duration::minutes(11));
        validator.assert_segment_free(1, "1A", seg(1, 2)).await.unwrap();
        let hold = store.hold(hold.id).await.unwrap().unwrap();
        assert_eq!(hold.status, HoldStatus::Expired);
    }

    #[tokio::test]
    async fn free_seats_and_peak_occupancy() {
        let (store, _clock, validator, trip) = setup().await;
        sell(&store, "1A", seg(0, 2), "Q1").await;
        sell(&store, "1B", seg(1, 4), "Q2").await;

        assert_eq!(validator.free_seats(&trip, seg(2, 4)).await.unwrap(), vec!["1A".to_string()]);
        assert!(validator.free_seats(&trip, seg(1, 2)).await.unwrap().is_empty());
        assert_eq!(validator.peak_occupancy(1, seg(0, 4)).await.unwrap(), 2);
        assert_eq!(validator.peak_occupancy(1, seg(2, 4)).await.unwrap(), 1);
        assert_eq!(validator.peak_occupancy(1, seg(4, 6)).await.unwrap(), 0);
    }
}
