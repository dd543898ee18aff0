use chrono::Duration;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::HoldPolicy;
use crate::error::{BookingError, BookingResult};
use crate::models::{HoldStatus, NewSeatHold, SeatHold, Trip};
use crate::services::locks::{LockTable, SeatKey};
use crate::services::notifier::{QuickSaleNotifier, ReleaseReason};
use crate::services::segments::SegmentValidator;
use crate::services::stops::StopIndex;
use crate::store::BookingStore;

/// Результат одного прохода sweeper'а холдов
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HoldSweepStats {
    pub scanned: usize,
    pub expired: usize,
    pub notified: usize,
    pub failed: usize,
}

/// Временные холды сегментов: захват, ручное освобождение, истечение по TTL.
#[derive(Clone)]
pub struct HoldManager {
    store: Arc<dyn BookingStore>,
    stops: StopIndex,
    validator: SegmentValidator,
    seat_locks: Arc<LockTable<SeatKey>>,
    /// Счёт холдов пользователя и вставка идут под его блокировкой (после блокировки места)
    user_locks: Arc<LockTable<i64>>,
    notifier: QuickSaleNotifier,
    clock: Arc<dyn Clock>,
    policy: HoldPolicy,
}

impl HoldManager {
    pub fn new(
        store: Arc<dyn BookingStore>,
        seat_locks: Arc<LockTable<SeatKey>>,
        notifier: QuickSaleNotifier,
        clock: Arc<dyn Clock>,
        policy: HoldPolicy,
    ) -> Self {
        Self {
            stops: StopIndex::new(store.clone()),
            validator: SegmentValidator::new(store.clone(), clock.clone()),
            store,
            seat_locks,
            user_locks: Arc::new(LockTable::new()),
            notifier,
            clock,
            policy,
        }
    }

    async fn bookable_trip(&self, trip_id: i64) -> BookingResult<Trip> {
        let trip = self
            .store
            .trip(trip_id)
            .await?
            .ok_or_else(|| BookingError::not_found("trip", trip_id))?;
        if !trip.status.is_bookable() {
            return Err(BookingError::TripNotBookable {
                trip_id,
                status: trip.status,
            });
        }
        Ok(trip)
    }

    pub async fn acquire_hold(
        &self,
        trip_id: i64,
        seat_number: &str,
        from_stop_id: i64,
        to_stop_id: i64,
        user_id: i64,
    ) -> BookingResult<SeatHold> {
        let trip = self.bookable_trip(trip_id).await?;
        let resolved = self.stops.resolve(trip.route_id, from_stop_id, to_stop_id).await?;

        let seats = self.store.bus_seats(trip.bus_id).await?;
        if !seats.iter().any(|s| s.number == seat_number) {
            return Err(BookingError::not_found("seat", seat_number));
        }

        let _guard = self.seat_locks.lock((trip_id, seat_number.to_string())).await;
        let _user_guard = self.user_locks.lock(user_id).await;

        let now = self.clock.now();
        let live = self
            .store
            .user_holds(user_id, Some(HoldStatus::Hold))
            .await?
            .into_iter()
            .filter(|h| h.is_live(now))
            .count();
        if live >= self.policy.max_per_user {
            return Err(BookingError::HoldLimitExceeded {
                user_id,
                limit: self.policy.max_per_user,
            });
        }

        self.validator
            .assert_segment_free(trip_id, seat_number, resolved.segment)
            .await?;

        let hold = self
            .store
            .insert_hold(NewSeatHold {
                trip_id,
                seat_number: seat_number.to_string(),
                from_stop_id,
                to_stop_id,
                segment: resolved.segment,
                user_id,
                created_at: now,
                expires_at: now + Duration::seconds(self.policy.ttl_seconds),
            })
            .await?;

        info!(
            "🔒 Hold {} created: trip={} seat={} {} user={} until {}",
            hold.id, trip_id, seat_number, resolved.segment, user_id, hold.expires_at
        );
        Ok(hold)
    }

    /// HOLD → EXPIRED. Повторное освобождение ничего не делает,
    /// освобождение уже выкупленного холда - ошибка.
    pub async fn release_hold(&self, hold_id: i64) -> BookingResult<SeatHold> {
        let hold = self.get_hold(hold_id).await?;

        let (released, still_free) = {
            let _guard = self.seat_locks.lock((hold.trip_id, hold.seat_number.clone())).await;
            let current = self.get_hold(hold_id).await?;
            match current.status {
                HoldStatus::Expired => return Ok(current),
                HoldStatus::Converted => {
                    return Err(BookingError::transition("hold", current.status, HoldStatus::Expired))
                }
                HoldStatus::Hold => {
                    let released = self
                        .store
                        .update_hold_status(hold_id, HoldStatus::Hold, HoldStatus::Expired)
                        .await?;
                    let still_free = released && self.segment_free_after(&current).await;
                    (released, still_free)
                }
            }
        };

        let hold = self.get_hold(hold_id).await?;
        if released {
            info!("🔓 Hold {} released by user {}", hold.id, hold.user_id);
            if still_free {
                self.notify_released(&hold, ReleaseReason::HoldReleased).await;
            }
        }
        Ok(hold)
    }

    pub async fn get_hold(&self, hold_id: i64) -> BookingResult<SeatHold> {
        self.store
            .hold(hold_id)
            .await?
            .ok_or_else(|| BookingError::not_found("hold", hold_id))
    }

    /// Живые холды пользователя
    pub async fn user_holds(&self, user_id: i64) -> BookingResult<Vec<SeatHold>> {
        let now = self.clock.now();
        Ok(self
            .store
            .user_holds(user_id, Some(HoldStatus::Hold))
            .await?
            .into_iter()
            .filter(|h| h.is_live(now))
            .collect())
    }

    pub async fn count_active_holds(&self, trip_id: i64) -> BookingResult<usize> {
        let now = self.clock.now();
        Ok(self
            .store
            .trip_holds(trip_id, Some(HoldStatus::Hold))
            .await?
            .iter()
            .filter(|h| h.is_live(now))
            .count())
    }

    /// Проход sweeper'а: все HOLD со стёкшим сроком → EXPIRED.
    /// Ошибка на одном холде не останавливает остальные.
    pub async fn expire_old_holds(&self) -> HoldSweepStats {
        let now = self.clock.now();
        let mut stats = HoldSweepStats::default();

        let candidates = match self.store.expired_holds(now).await {
            Ok(holds) => holds,
            Err(e) => {
                error!("⏰ Failed to load expired holds: {:?}", e);
                stats.failed += 1;
                return stats;
            }
        };
        stats.scanned = candidates.len();
        if candidates.is_empty() {
            return stats;
        }
        info!("⏰ Found {} expired holds to release", candidates.len());

        for hold in candidates {
            let expired = {
                let _guard = self.seat_locks.lock((hold.trip_id, hold.seat_number.clone())).await;
                match self
                    .store
                    .update_hold_status(hold.id, HoldStatus::Hold, HoldStatus::Expired)
                    .await
                {
                    Ok(true) => Ok(Some(self.segment_free_after(&hold).await)),
                    Ok(false) => Ok(None),
                    Err(e) => Err(e),
                }
            };
            match expired {
                Ok(Some(still_free)) => {
                    stats.expired += 1;
                    if still_free && self.notify_released(&hold, ReleaseReason::HoldExpired).await {
                        stats.notified += 1;
                    }
                }
                Ok(None) => {
                    warn!("⏰ Hold {} was not expired (status changed?)", hold.id);
                }
                Err(e) => {
                    stats.failed += 1;
                    error!("⏰ Failed to expire hold {}: {:?}", hold.id, e);
                }
            }
        }

        info!(
            "⏰ Hold sweep done: {} expired, {} notified, {} failed",
            stats.expired, stats.notified, stats.failed
        );
        stats
    }

    /// Снимает все живые холды рейса (рейс отменён). Уведомлений не шлёт.
    pub async fn expire_trip_holds(&self, trip_id: i64) -> BookingResult<usize> {
        let holds = self.store.trip_holds(trip_id, Some(HoldStatus::Hold)).await?;
        let mut expired = 0;
        for hold in holds {
            let _guard = self.seat_locks.lock((hold.trip_id, hold.seat_number.clone())).await;
            if self
                .store
                .update_hold_status(hold.id, HoldStatus::Hold, HoldStatus::Expired)
                .await?
            {
                expired += 1;
            }
        }
        if expired > 0 {
            info!("🔓 Released {} holds of cancelled trip {}", expired, trip_id);
        }
        Ok(expired)
    }

    /// Вызывать под блокировкой места сразу после перевода холда в EXPIRED
    async fn segment_free_after(&self, hold: &SeatHold) -> bool {
        self.validator
            .released_segment_free(hold.trip_id, &hold.seat_number, hold.segment())
            .await
    }

    /// Очистка неиспользуемых блокировок пользователей
    pub fn prune_locks(&self) -> usize {
        self.user_locks.prune()
    }

    async fn notify_released(&self, hold: &SeatHold, reason: ReleaseReason) -> bool {
        match self.store.trip(hold.trip_id).await {
            Ok(Some(trip)) => self.notifier.segment_released(
                &trip,
                &hold.seat_number,
                hold.from_stop_id,
                hold.to_stop_id,
                reason,
            ),
            Ok(None) => false,
            Err(e) => {
                error!("Failed to load trip {} for quick-sale notification: {:?}", hold.trip_id, e);
                false
            }
        }
    }
}
