//! Типизированные ошибки движка бронирования.
//!
//! Все варианты `BookingError` - восстановимые результаты для вызывающей стороны:
//! ни один из них не означает нарушенный инвариант хранилища.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::TripStatus;

/// Ошибки слоя хранения (Postgres или in-memory).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Строка из БД содержит значение, которое не отображается на доменный тип
    #[error("corrupted row in {table}: {message}")]
    Decode { table: &'static str, message: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid segment [{from_order}, {to_order}): from must be before to")]
    InvalidSegment { from_order: i32, to_order: i32 },

    #[error("seat {seat_number} on trip {trip_id} is already taken for [{from_order}, {to_order})")]
    SegmentConflict {
        trip_id: i64,
        seat_number: String,
        from_order: i32,
        to_order: i32,
    },

    #[error("trip {trip_id} has no capacity left (sellable limit {limit})")]
    CapacityExceeded { trip_id: i64, limit: i64 },

    #[error("invalid {entity} transition from {from} to {to}")]
    InvalidStateTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("user {user_id} already holds {limit} segments")]
    HoldLimitExceeded { user_id: i64, limit: usize },

    #[error("ticket {ticket_id} is already cancelled")]
    AlreadyCancelled { ticket_id: i64 },

    #[error("trip {trip_id} is {status} and does not accept sales")]
    TripNotBookable { trip_id: i64, status: TripStatus },

    #[error("boarding for trip {trip_id} is still open")]
    BoardingStillOpen { trip_id: i64 },

    #[error("trip {trip_id} occupancy {occupancy:.2} is below the overbooking threshold {threshold:.2}")]
    BelowOverbookingThreshold {
        trip_id: i64,
        occupancy: f64,
        threshold: f64,
    },

    #[error("trip {trip_id} already has pending overbooking request {request_id}")]
    OverbookingAlreadyPending { trip_id: i64, request_id: i64 },

    #[error(transparent)]
    Storage(#[from] StoreError),
}

pub type BookingResult<T> = Result<T, BookingError>;

impl BookingError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        BookingError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn transition(entity: &'static str, from: impl ToString, to: impl ToString) -> Self {
        BookingError::InvalidStateTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Короткий машиночитаемый код для JSON-ответа
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::NotFound { .. } => "NOT_FOUND",
            BookingError::InvalidSegment { .. } => "INVALID_SEGMENT",
            BookingError::SegmentConflict { .. } => "SEGMENT_CONFLICT",
            BookingError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            BookingError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            BookingError::HoldLimitExceeded { .. } => "HOLD_LIMIT_EXCEEDED",
            BookingError::AlreadyCancelled { .. } => "ALREADY_CANCELLED",
            BookingError::TripNotBookable { .. } => "TRIP_NOT_BOOKABLE",
            BookingError::BoardingStillOpen { .. } => "BOARDING_STILL_OPEN",
            BookingError::BelowOverbookingThreshold { .. } => "BELOW_OVERBOOKING_THRESHOLD",
            BookingError::OverbookingAlreadyPending { .. } => "OVERBOOKING_ALREADY_PENDING",
            BookingError::Storage(_) => "STORAGE_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            BookingError::NotFound { .. } => StatusCode::NOT_FOUND,
            BookingError::InvalidSegment { .. } => StatusCode::BAD_REQUEST,
            BookingError::SegmentConflict { .. }
            | BookingError::CapacityExceeded { .. }
            | BookingError::AlreadyCancelled { .. }
            | BookingError::OverbookingAlreadyPending { .. } => StatusCode::CONFLICT,
            BookingError::InvalidStateTransition { .. }
            | BookingError::HoldLimitExceeded { .. }
            | BookingError::TripNotBookable { .. }
            | BookingError::BoardingStillOpen { .. }
            | BookingError::BelowOverbookingThreshold { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            BookingError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            BookingError::Storage(e) => {
                tracing::error!("Storage failure: {:?}", e);
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": message,
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_maps_to_409() {
        let err = BookingError::SegmentConflict {
            trip_id: 1,
            seat_number: "1A".into(),
            from_order: 0,
            to_order: 2,
        };
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "SEGMENT_CONFLICT");
        assert!(err.to_string().contains("1A"));
    }

    #[test]
    fn storage_errors_hide_details() {
        let err = BookingError::from(StoreError::Decode {
            table: "tickets",
            message: "bad status".into(),
        });
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
