use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Segment;

/// Временная блокировка сегмента места до покупки.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatHold {
    pub id: i64,
    pub trip_id: i64,
    pub seat_number: String,
    pub from_stop_id: i64,
    pub to_stop_id: i64,
    pub from_order: i32,
    pub to_order: i32,
    pub user_id: i64,
    pub status: HoldStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SeatHold {
    pub fn segment(&self) -> Segment {
        Segment::stored(self.from_order, self.to_order)
    }

    /// HOLD, у которого ещё не истёк срок
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == HoldStatus::Hold && self.expires_at > now
    }

    /// HOLD со стёкшим сроком, который sweeper ещё не успел перевести в EXPIRED
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.status == HoldStatus::Hold && self.expires_at <= now
    }
}

#[derive(Debug, Clone)]
pub struct NewSeatHold {
    pub trip_id: i64,
    pub seat_number: String,
    pub from_stop_id: i64,
    pub to_stop_id: i64,
    pub segment: Segment,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

status_enum!(
    HoldStatus {
        Hold => "HOLD",
        Expired => "EXPIRED",
        Converted => "CONVERTED",
    }
);
