use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use super::{ApiError, ApiResult};
use crate::middleware::{Actor, Role};
use crate::models::TicketStatus;
use crate::services::CreateTicket;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tickets", post(create_ticket).get(list_tickets))
        .route("/tickets/confirm-hold", post(confirm_hold))
        .route("/tickets/{id}", get(get_ticket))
        .route("/tickets/qr/{code}", get(get_ticket_by_qr))
        .route("/tickets/{id}/cancel", patch(cancel_ticket))
        .route("/tickets/{id}/used", patch(mark_used))
        .route("/tickets/{id}/no-show", patch(mark_no_show))
}

// POST /api/tickets
#[derive(Debug, Deserialize, Validate)]
pub struct CreateTicketRequest {
    #[validate(range(min = 1))]
    pub trip_id: i64,
    #[validate(length(min = 1, max = 8))]
    pub seat_number: String,
    #[validate(range(min = 1))]
    pub from_stop_id: i64,
    #[validate(range(min = 1))]
    pub to_stop_id: i64,
    #[validate(range(min = 1))]
    pub passenger_id: i64,
}

async fn create_ticket(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<CreateTicketRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;
    tracing::debug!("create_ticket by user {} ({})", actor.user_id, actor.role);

    let ticket = state
        .bookings
        .create_ticket(CreateTicket {
            trip_id: req.trip_id,
            seat_number: req.seat_number,
            from_stop_id: req.from_stop_id,
            to_stop_id: req.to_stop_id,
            passenger_id: req.passenger_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

// POST /api/tickets/confirm-hold
#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmHoldRequest {
    #[validate(range(min = 1))]
    pub hold_id: i64,
    #[validate(range(min = 1))]
    pub passenger_id: i64,
}

async fn confirm_hold(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<ConfirmHoldRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    // Выкупить холд может только его владелец или кассир
    let hold = state.holds.get_hold(req.hold_id).await?;
    if hold.user_id != actor.user_id {
        actor.require(&[Role::Clerk, Role::Dispatcher])?;
    }

    let ticket = state.bookings.confirm_hold(req.hold_id, req.passenger_id).await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

// GET /api/tickets?trip_id=..&status=..&passenger_id=..
#[derive(Debug, Deserialize)]
pub struct TicketQuery {
    pub trip_id: Option<i64>,
    pub status: Option<TicketStatus>,
    pub passenger_id: Option<i64>,
}

async fn list_tickets(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Query(query): Query<TicketQuery>,
) -> ApiResult<impl IntoResponse> {
    let tickets = match (query.trip_id, query.passenger_id) {
        (Some(trip_id), passenger) => {
            let mut tickets = state.bookings.tickets_by_trip(trip_id, query.status).await?;
            if let Some(passenger_id) = passenger {
                tickets.retain(|t| t.passenger_id == passenger_id);
            }
            tickets
        }
        (None, Some(passenger_id)) => {
            let mut tickets = state.bookings.tickets_by_passenger(passenger_id).await?;
            if let Some(status) = query.status {
                tickets.retain(|t| t.status == status);
            }
            tickets
        }
        (None, None) => {
            return Err(ApiError::BadRequest(
                "trip_id or passenger_id is required".to_string(),
            ))
        }
    };
    Ok(Json(tickets))
}

// GET /api/tickets/{id}
async fn get_ticket(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.bookings.get_ticket(id).await?))
}

// GET /api/tickets/qr/{code}
async fn get_ticket_by_qr(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Path(code): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.bookings.get_ticket_by_qr(&code).await?))
}

// PATCH /api/tickets/{id}/cancel
async fn cancel_ticket(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let ticket = state.bookings.cancel_ticket(id).await?;
    tracing::info!(
        "🎫 Ticket {} cancelled by user {}: {:?} refund {}",
        ticket.id,
        actor.user_id,
        ticket.cancellation_policy,
        ticket.refund_amount.unwrap_or_default()
    );
    Ok(Json(ticket))
}

// PATCH /api/tickets/{id}/used
async fn mark_used(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    actor.require(&[Role::Driver, Role::Dispatcher, Role::Clerk])?;
    Ok(Json(state.bookings.mark_used(id).await?))
}

// PATCH /api/tickets/{id}/no-show
async fn mark_no_show(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    actor.require(&[Role::Driver, Role::Dispatcher])?;
    Ok(Json(state.bookings.mark_no_show(id).await?))
}
