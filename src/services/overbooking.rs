//! Овербукинг: кассир просит продавать сверх вместимости, диспетчер одобряет или отклоняет.
//!
//! Одобренный запрос поднимает предел продаж рейса до `ceil(capacity × multiplier)`.

use chrono::Duration;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::OverbookingPolicy;
use crate::error::{BookingError, BookingResult};
use crate::models::{
    NewOverbookingRequest, OverbookingDecision, OverbookingRequest, OverbookingStatus, TicketStatus, Trip,
};
use crate::services::locks::LockTable;
use crate::store::BookingStore;

/// Вместимость с учётом множителя. Произведение сначала округляется до 1e-6,
/// чтобы `40 × 1.1` не превращалось в 45.
pub fn elevated_capacity(capacity: i32, multiplier: f64) -> i64 {
    let raw = capacity as f64 * multiplier.max(1.0);
    let rounded = (raw * 1_000_000.0).round() / 1_000_000.0;
    rounded.ceil() as i64
}

#[derive(Clone)]
pub struct OverbookingCoordinator {
    store: Arc<dyn BookingStore>,
    trip_locks: Arc<LockTable<i64>>,
    clock: Arc<dyn Clock>,
    policy: OverbookingPolicy,
}

impl OverbookingCoordinator {
    pub fn new(
        store: Arc<dyn BookingStore>,
        trip_locks: Arc<LockTable<i64>>,
        clock: Arc<dyn Clock>,
        policy: OverbookingPolicy,
    ) -> Self {
        Self {
            store,
            trip_locks,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &OverbookingPolicy {
        &self.policy
    }

    async fn trip(&self, trip_id: i64) -> BookingResult<Trip> {
        self.store
            .trip(trip_id)
            .await?
            .ok_or_else(|| BookingError::not_found("trip", trip_id))
    }

    pub async fn capacity(&self, trip: &Trip) -> BookingResult<i32> {
        let bus = self
            .store
            .bus(trip.bus_id)
            .await?
            .ok_or_else(|| BookingError::not_found("bus", trip.bus_id))?;
        Ok(bus.capacity)
    }

    /// Доля проданных билетов от вместимости автобуса; считается при каждом вызове
    pub async fn get_current_occupancy_rate(&self, trip_id: i64) -> BookingResult<f64> {
        let trip = self.trip(trip_id).await?;
        self.occupancy_of(&trip).await
    }

    async fn occupancy_of(&self, trip: &Trip) -> BookingResult<f64> {
        let capacity = self.capacity(trip).await?;
        if capacity <= 0 {
            return Ok(0.0);
        }
        let sold = self.store.count_tickets(trip.id, TicketStatus::Sold).await?;
        Ok(sold as f64 / capacity as f64)
    }

    pub async fn can_overbook(&self, trip_id: i64) -> BookingResult<bool> {
        let trip = self.trip(trip_id).await?;
        if !trip.status.is_bookable() {
            return Ok(false);
        }
        Ok(self.occupancy_of(&trip).await? >= self.policy.threshold)
    }

    fn is_past_ttl(&self, request: &OverbookingRequest) -> bool {
        request.status == OverbookingStatus::Pending
            && request.created_at + Duration::minutes(self.policy.request_ttl_minutes) <= self.clock.now()
    }

    async fn expire_request(&self, request: &OverbookingRequest) -> BookingResult<bool> {
        let decision = OverbookingDecision {
            status: OverbookingStatus::Expired,
            decided_by: None,
            decided_at: self.clock.now(),
            approved_multiplier: None,
            reason: None,
        };
        let expired = self
            .store
            .decide_overbooking_request(request.id, &decision)
            .await?
            .is_some();
        if expired {
            info!("⌛ Overbooking request {} for trip {} expired", request.id, request.trip_id);
        }
        Ok(expired)
    }

    pub async fn request_overbooking(
        &self,
        trip_id: i64,
        requested_by: i64,
        reason: Option<String>,
    ) -> BookingResult<OverbookingRequest> {
        let _guard = self.trip_locks.lock(trip_id).await;

        let trip = self.trip(trip_id).await?;
        if !trip.status.is_bookable() {
            return Err(BookingError::TripNotBookable {
                trip_id,
                status: trip.status,
            });
        }

        let pending = self
            .store
            .overbooking_requests(Some(trip_id), Some(OverbookingStatus::Pending))
            .await?;
        for request in pending {
            if self.is_past_ttl(&request) {
                self.expire_request(&request).await?;
            } else {
                return Err(BookingError::OverbookingAlreadyPending {
                    trip_id,
                    request_id: request.id,
                });
            }
        }

        let occupancy = self.occupancy_of(&trip).await?;
        if occupancy < self.policy.threshold {
            return Err(BookingError::BelowOverbookingThreshold {
                trip_id,
                occupancy,
                threshold: self.policy.threshold,
            });
        }

        let request = self
            .store
            .insert_overbooking_request(NewOverbookingRequest {
                trip_id,
                requested_by,
                occupancy_at_request: occupancy,
                reason,
                created_at: self.clock.now(),
            })
            .await?;

        info!(
            "📈 Overbooking request {} for trip {} by user {} (occupancy {:.2})",
            request.id, trip_id, requested_by, occupancy
        );
        Ok(request)
    }

    /// PENDING → APPROVED. Множитель ограничивается `[1.0, max_multiplier]`.
    pub async fn approve_overbooking(
        &self,
        request_id: i64,
        dispatcher_id: i64,
        multiplier: Option<f64>,
        reason: Option<String>,
    ) -> BookingResult<OverbookingRequest> {
        let multiplier = multiplier
            .unwrap_or(self.policy.default_multiplier)
            .clamp(1.0, self.policy.max_multiplier.max(1.0));
        let decided = self
            .decide(request_id, OverbookingStatus::Approved, dispatcher_id, Some(multiplier), reason)
            .await?;
        info!(
            "✅ Overbooking request {} approved by {} (x{:.2})",
            request_id, dispatcher_id, multiplier
        );
        Ok(decided)
    }

    pub async fn reject_overbooking(
        &self,
        request_id: i64,
        dispatcher_id: i64,
        reason: Option<String>,
    ) -> BookingResult<OverbookingRequest> {
        let decided = self
            .decide(request_id, OverbookingStatus::Rejected, dispatcher_id, None, reason)
            .await?;
        info!("❌ Overbooking request {} rejected by {}", request_id, dispatcher_id);
        Ok(decided)
    }

    async fn decide(
        &self,
        request_id: i64,
        status: OverbookingStatus,
        dispatcher_id: i64,
        multiplier: Option<f64>,
        reason: Option<String>,
    ) -> BookingResult<OverbookingRequest> {
        let request = self.get_overbooking_request(request_id).await?;
        if request.status != OverbookingStatus::Pending {
            return Err(BookingError::transition("overbooking request", request.status, status));
        }
        if self.is_past_ttl(&request) {
            self.expire_request(&request).await?;
            return Err(BookingError::transition(
                "overbooking request",
                OverbookingStatus::Expired,
                status,
            ));
        }

        let decision = OverbookingDecision {
            status,
            decided_by: Some(dispatcher_id),
            decided_at: self.clock.now(),
            approved_multiplier: multiplier,
            reason,
        };
        match self.store.decide_overbooking_request(request_id, &decision).await? {
            Some(decided) => Ok(decided),
            None => {
                // Кто-то решил раньше нас
                let current = self.get_overbooking_request(request_id).await?;
                Err(BookingError::transition("overbooking request", current.status, status))
            }
        }
    }

    pub async fn get_overbooking_request(&self, request_id: i64) -> BookingResult<OverbookingRequest> {
        self.store
            .overbooking_request(request_id)
            .await?
            .ok_or_else(|| BookingError::not_found("overbooking request", request_id))
    }

    pub async fn get_overbooking_requests_by_status(
        &self,
        status: OverbookingStatus,
    ) -> BookingResult<Vec<OverbookingRequest>> {
        Ok(self.store.overbooking_requests(None, Some(status)).await?)
    }

    pub async fn get_overbooking_requests_by_trip(&self, trip_id: i64) -> BookingResult<Vec<OverbookingRequest>> {
        Ok(self.store.overbooking_requests(Some(trip_id), None).await?)
    }

    pub async fn get_pending_requests(&self) -> BookingResult<Vec<OverbookingRequest>> {
        self.get_overbooking_requests_by_status(OverbookingStatus::Pending)
            .await
    }

    /// Последний одобренный запрос рейса
    pub async fn active_approval(&self, trip_id: i64) -> BookingResult<Option<OverbookingRequest>> {
        let approved = self
            .store
            .overbooking_requests(Some(trip_id), Some(OverbookingStatus::Approved))
            .await?;
        Ok(approved.into_iter().max_by_key(|r| (r.decided_at, r.id)))
    }

    /// Предел продаж рейса: вместимость или поднятая одобренным запросом
    pub async fn sellable_limit(&self, trip: &Trip) -> BookingResult<(i64, Option<OverbookingRequest>)> {
        let capacity = self.capacity(trip).await?;
        let approval = self.active_approval(trip.id).await?;
        let limit = match approval.as_ref() {
            Some(request) => elevated_capacity(
                capacity,
                request
                    .approved_multiplier
                    .unwrap_or(self.policy.default_multiplier),
            ),
            None => capacity as i64,
        };
        Ok((limit, approval))
    }

    /// Проход sweeper'а: PENDING старше TTL → EXPIRED
    pub async fn expire_pending_requests(&self) -> usize {
        let cutoff = self.clock.now() - Duration::minutes(self.policy.request_ttl_minutes);
        let stale = match self.store.pending_requests_created_before(cutoff).await {
            Ok(requests) => requests,
            Err(e) => {
                error!("⌛ Failed to load stale overbooking requests: {:?}", e);
                return 0;
            }
        };

        let mut expired = 0;
        for request in stale {
            match self.expire_request(&request).await {
                Ok(true) => expired += 1,
                Ok(false) => warn!("⌛ Overbooking request {} already decided", request.id),
                Err(e) => error!("⌛ Failed to expire overbooking request {}: {:?}", request.id, e),
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elevated_capacity_rounds_up() {
        assert_eq!(elevated_capacity(1, 1.1), 2);
        assert_eq!(elevated_capacity(40, 1.1), 44);
        assert_eq!(elevated_capacity(45, 1.1), 50);
        assert_eq!(elevated_capacity(10, 1.0), 10);
    }

    #[test]
    fn multiplier_below_one_never_shrinks_capacity() {
        assert_eq!(elevated_capacity(10, 0.5), 10);
    }
}
