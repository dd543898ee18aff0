use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverbookingRequest {
    pub id: i64,
    pub trip_id: i64,
    pub requested_by: i64,
    pub status: OverbookingStatus,
    pub occupancy_at_request: f64,
    pub approved_multiplier: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub decided_by: Option<i64>,
    pub decided_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewOverbookingRequest {
    pub trip_id: i64,
    pub requested_by: i64,
    pub occupancy_at_request: f64,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Решение по запросу. Применяется только к PENDING (compare-and-set).
#[derive(Debug, Clone)]
pub struct OverbookingDecision {
    pub status: OverbookingStatus,
    pub decided_by: Option<i64>,
    pub decided_at: DateTime<Utc>,
    pub approved_multiplier: Option<f64>,
    pub reason: Option<String>,
}

status_enum!(
    OverbookingStatus {
        Pending => "PENDING",
        Approved => "APPROVED",
        Rejected => "REJECTED",
        Expired => "EXPIRED",
    }
);
