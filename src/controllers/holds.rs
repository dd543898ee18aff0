use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use super::ApiResult;
use crate::middleware::{Actor, Role};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/holds", post(acquire_hold).get(my_holds))
        .route("/holds/{id}", delete(release_hold))
}

// POST /api/holds
#[derive(Debug, Deserialize, Validate)]
pub struct AcquireHoldRequest {
    #[validate(range(min = 1))]
    pub trip_id: i64,
    #[validate(length(min = 1, max = 8))]
    pub seat_number: String,
    #[validate(range(min = 1))]
    pub from_stop_id: i64,
    #[validate(range(min = 1))]
    pub to_stop_id: i64,
}

async fn acquire_hold(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<AcquireHoldRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;
    let hold = state
        .holds
        .acquire_hold(
            req.trip_id,
            &req.seat_number,
            req.from_stop_id,
            req.to_stop_id,
            actor.user_id,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(hold)))
}

// GET /api/holds - холды текущего пользователя
async fn my_holds(State(state): State<Arc<AppState>>, actor: Actor) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.holds.user_holds(actor.user_id).await?))
}

// DELETE /api/holds/{id}
async fn release_hold(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let hold = state.holds.get_hold(id).await?;
    if hold.user_id != actor.user_id {
        actor.require(&[Role::Clerk, Role::Dispatcher])?;
    }
    Ok(Json(state.holds.release_hold(id).await?))
}
