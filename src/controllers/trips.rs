use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{ApiError, ApiResult};
use crate::middleware::{Actor, Role};
use crate::models::{Trip, TripStatus};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/trips/{id}", get(get_trip))
        .route("/trips/{id}/seats/{seat}/availability", get(seat_availability))
        .route("/trips/{id}/quick-sale", get(quick_sale))
        .route("/trips/{id}/occupancy", get(occupancy))
        .route("/trips/{id}/passengers", get(passengers_on_board))
        .route("/trips/{id}/fare", get(quote_fare))
        .route("/trips/{id}/status", patch(change_status))
        .route("/trips/{id}/no-show", post(process_no_show))
}

async fn get_trip(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.trips.get_trip(id).await?))
}

// GET /api/trips/{id}/seats/{seat}/availability?from_stop_id=..&to_stop_id=..
#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub from_stop_id: Option<i64>,
    pub to_stop_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct AvailabilityResponse {
    trip_id: i64,
    seat_number: String,
    from_stop_id: Option<i64>,
    to_stop_id: Option<i64>,
    available: bool,
}

async fn seat_availability(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Path((trip_id, seat_number)): Path<(i64, String)>,
    Query(query): Query<AvailabilityQuery>,
) -> ApiResult<impl IntoResponse> {
    // Без остановок проверяется место целиком, с остановками - конкретный сегмент
    let available = match (query.from_stop_id, query.to_stop_id) {
        (Some(from), Some(to)) => {
            state
                .bookings
                .is_segment_available(trip_id, &seat_number, from, to)
                .await?
        }
        (None, None) => state.bookings.is_seat_available(trip_id, &seat_number).await?,
        _ => {
            return Err(ApiError::BadRequest(
                "from_stop_id and to_stop_id go together".to_string(),
            ))
        }
    };

    Ok(Json(AvailabilityResponse {
        trip_id,
        seat_number,
        from_stop_id: query.from_stop_id,
        to_stop_id: query.to_stop_id,
        available,
    }))
}

async fn quick_sale(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.bookings.quick_sale_segments(id).await?))
}

#[derive(Debug, Serialize)]
struct OccupancyResponse {
    trip_id: i64,
    sold: i64,
    occupancy_rate: f64,
    threshold: f64,
    can_overbook: bool,
}

async fn occupancy(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let occupancy_rate = state.overbooking.get_current_occupancy_rate(id).await?;
    Ok(Json(OccupancyResponse {
        trip_id: id,
        sold: state.bookings.count_sold_tickets(id).await?,
        occupancy_rate,
        threshold: state.overbooking.policy().threshold,
        can_overbook: state.overbooking.can_overbook(id).await?,
    }))
}

#[derive(Debug, Deserialize)]
pub struct OnBoardQuery {
    pub stop_id: i64,
}

// GET /api/trips/{id}/passengers?stop_id=..
async fn passengers_on_board(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<i64>,
    Query(query): Query<OnBoardQuery>,
) -> ApiResult<impl IntoResponse> {
    actor.require(&[Role::Driver, Role::Dispatcher, Role::Clerk])?;
    Ok(Json(state.bookings.passengers_on_board(id, query.stop_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct FareQuery {
    pub from_stop_id: i64,
    pub to_stop_id: i64,
    pub passenger_id: i64,
}

// GET /api/trips/{id}/fare?from_stop_id=..&to_stop_id=..&passenger_id=..
async fn quote_fare(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Path(id): Path<i64>,
    Query(query): Query<FareQuery>,
) -> ApiResult<impl IntoResponse> {
    let quote = state
        .bookings
        .quote_fare(id, query.from_stop_id, query.to_stop_id, query.passenger_id)
        .await?;
    Ok(Json(quote))
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: TripStatus,
}

#[derive(Debug, Serialize)]
struct ChangeStatusResponse {
    trip: Trip,
    previous: TripStatus,
    released_holds: usize,
}

// PATCH /api/trips/{id}/status
async fn change_status(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(req): Json<ChangeStatusRequest>,
) -> ApiResult<impl IntoResponse> {
    actor.require(&[Role::Dispatcher, Role::Driver])?;
    let transition = state.trips.change_status(id, req.status).await?;
    Ok(Json(ChangeStatusResponse {
        trip: transition.trip,
        previous: transition.previous,
        released_holds: transition.released_holds,
    }))
}

// POST /api/trips/{id}/no-show
async fn process_no_show(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    actor.require(&[Role::Dispatcher])?;
    Ok(Json(state.no_show.process_no_show_tickets(id).await?))
}
