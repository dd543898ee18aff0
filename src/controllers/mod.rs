pub mod holds;
pub mod overbooking;
pub mod tickets;
pub mod trips;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::error::BookingError;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(tickets::routes())
        .merge(holds::routes())
        .merge(trips::routes())
        .merge(overbooking::routes())
}

/// Ошибки HTTP-слоя: доменные ошибки движка плюс проверки запроса и роли
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Booking(#[from] BookingError),

    #[error("invalid request: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("missing or invalid X-User-Id / X-User-Role headers")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match self {
            ApiError::Booking(e) => return e.into_response(),
            ApiError::Validation(_) | ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "VALIDATION"),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
        };
        (status, Json(json!({ "error": self.to_string(), "code": code }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
