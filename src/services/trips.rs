use std::sync::Arc;
use tracing::info;

use crate::error::{BookingError, BookingResult};
use crate::models::{Trip, TripStatus};
use crate::services::holds::HoldManager;
use crate::store::BookingStore;

/// Итог смены статуса рейса
#[derive(Debug, Clone)]
pub struct TripTransition {
    pub trip: Trip,
    pub previous: TripStatus,
    pub released_holds: usize,
}

/// Жизненный цикл рейса: SCHEDULED → BOARDING → DEPARTED → ARRIVED, отмена и возврат в расписание.
#[derive(Clone)]
pub struct TripService {
    store: Arc<dyn BookingStore>,
    holds: HoldManager,
}

impl TripService {
    pub fn new(store: Arc<dyn BookingStore>, holds: HoldManager) -> Self {
        Self { store, holds }
    }

    pub async fn get_trip(&self, trip_id: i64) -> BookingResult<Trip> {
        self.store
            .trip(trip_id)
            .await?
            .ok_or_else(|| BookingError::not_found("trip", trip_id))
    }

    pub async fn change_status(&self, trip_id: i64, next: TripStatus) -> BookingResult<TripTransition> {
        let trip = self.get_trip(trip_id).await?;
        let previous = trip.status;
        if !previous.can_transition_to(next) {
            return Err(BookingError::transition("trip", previous, next));
        }

        if !self.store.update_trip_status(trip_id, previous, next).await? {
            let current = self.get_trip(trip_id).await?;
            return Err(BookingError::transition("trip", current.status, next));
        }
        info!("🚌 Trip {} status {} → {}", trip_id, previous, next);

        // Холды отменённого рейса больше никогда не выкупят
        let released_holds = if next == TripStatus::Cancelled {
            self.holds.expire_trip_holds(trip_id).await?
        } else {
            0
        };

        Ok(TripTransition {
            trip: self.get_trip(trip_id).await?,
            previous,
            released_holds,
        })
    }
}
