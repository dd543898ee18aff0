use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use super::ApiResult;
use crate::middleware::{Actor, Role};
use crate::models::OverbookingStatus;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/overbooking", get(list_requests).post(request_overbooking))
        .route("/overbooking/{id}", get(get_request))
        .route("/overbooking/{id}/approve", patch(approve))
        .route("/overbooking/{id}/reject", patch(reject))
}

// POST /api/overbooking
#[derive(Debug, Deserialize, Validate)]
pub struct OverbookingRequestBody {
    #[validate(range(min = 1))]
    pub trip_id: i64,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

async fn request_overbooking(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<OverbookingRequestBody>,
) -> ApiResult<impl IntoResponse> {
    actor.require(&[Role::Clerk, Role::Dispatcher])?;
    req.validate()?;
    let request = state
        .overbooking
        .request_overbooking(req.trip_id, actor.user_id, req.reason)
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

// GET /api/overbooking?status=..&trip_id=..
#[derive(Debug, Deserialize)]
pub struct OverbookingQuery {
    pub status: Option<OverbookingStatus>,
    pub trip_id: Option<i64>,
}

async fn list_requests(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<OverbookingQuery>,
) -> ApiResult<impl IntoResponse> {
    actor.require(&[Role::Dispatcher])?;
    let requests = match (query.trip_id, query.status) {
        (Some(trip_id), status) => {
            let mut requests = state.overbooking.get_overbooking_requests_by_trip(trip_id).await?;
            if let Some(status) = status {
                requests.retain(|r| r.status == status);
            }
            requests
        }
        (None, Some(status)) => state.overbooking.get_overbooking_requests_by_status(status).await?,
        (None, None) => state.overbooking.get_pending_requests().await?,
    };
    Ok(Json(requests))
}

async fn get_request(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    actor.require(&[Role::Dispatcher])?;
    Ok(Json(state.overbooking.get_overbooking_request(id).await?))
}

// PATCH /api/overbooking/{id}/approve
#[derive(Debug, Default, Deserialize, Validate)]
pub struct DecisionBody {
    #[validate(range(min = 1.0, max = 2.0))]
    pub multiplier: Option<f64>,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

async fn approve(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<i64>,
    body: Option<Json<DecisionBody>>,
) -> ApiResult<impl IntoResponse> {
    actor.require(&[Role::Dispatcher])?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    body.validate()?;
    let request = state
        .overbooking
        .approve_overbooking(id, actor.user_id, body.multiplier, body.reason)
        .await?;
    Ok(Json(request))
}

// PATCH /api/overbooking/{id}/reject
async fn reject(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<i64>,
    body: Option<Json<DecisionBody>>,
) -> ApiResult<impl IntoResponse> {
    actor.require(&[Role::Dispatcher])?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    body.validate()?;
    let request = state
        .overbooking
        .reject_overbooking(id, actor.user_id, body.reason)
        .await?;
    Ok(Json(request))
}
