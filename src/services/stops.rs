use std::sync::Arc;

use crate::error::{BookingError, BookingResult};
use crate::models::{Segment, Stop};
use crate::store::BookingStore;

/// Пара остановок маршрута, приведённая к сегменту.
#[derive(Debug, Clone)]
pub struct ResolvedSegment {
    pub from: Stop,
    pub to: Stop,
    pub segment: Segment,
}

/// Перевод идентификаторов остановок в порядковые номера на маршруте.
#[derive(Clone)]
pub struct StopIndex {
    store: Arc<dyn BookingStore>,
}

impl StopIndex {
    pub fn new(store: Arc<dyn BookingStore>) -> Self {
        Self { store }
    }

    pub async fn stop_order(&self, route_id: i64, stop_id: i64) -> BookingResult<i32> {
        let stops = self.store.route_stops(route_id).await?;
        find_stop(&stops, stop_id).map(|s| s.order)
    }

    /// Разрешает обе остановки на маршруте; `from` должна идти строго раньше `to`.
    pub async fn resolve(&self, route_id: i64, from_stop_id: i64, to_stop_id: i64) -> BookingResult<ResolvedSegment> {
        let stops = self.store.route_stops(route_id).await?;
        let from = find_stop(&stops, from_stop_id)?.clone();
        let to = find_stop(&stops, to_stop_id)?.clone();
        let segment = Segment::new(from.order, to.order)?;
        Ok(ResolvedSegment { from, to, segment })
    }
}

fn find_stop(stops: &[Stop], stop_id: i64) -> BookingResult<&Stop> {
    stops
        .iter()
        .find(|s| s.id == stop_id)
        .ok_or_else(|| BookingError::not_found("stop", stop_id))
}
