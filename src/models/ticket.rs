use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{PassengerCategory, Segment};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    pub trip_id: i64,
    pub seat_number: String,
    pub from_stop_id: i64,
    pub to_stop_id: i64,
    pub from_order: i32,
    pub to_order: i32,
    pub passenger_id: i64,
    pub passenger_category: PassengerCategory,
    pub price: Decimal,
    pub discount: Decimal,
    pub status: TicketStatus,
    pub qr_code: String,
    /// Продан сверх вместимости по одобренному запросу диспетчера
    pub overbooked: bool,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refund_amount: Option<Decimal>,
    pub cancellation_policy: Option<CancellationPolicy>,
    pub no_show_fee: Option<Decimal>,
}

impl Ticket {
    pub fn segment(&self) -> Segment {
        Segment::stored(self.from_order, self.to_order)
    }
}

/// Данные для вставки нового билета; id и created_at назначает хранилище.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub trip_id: i64,
    pub seat_number: String,
    pub from_stop_id: i64,
    pub to_stop_id: i64,
    pub segment: Segment,
    pub passenger_id: i64,
    pub passenger_category: PassengerCategory,
    pub price: Decimal,
    pub discount: Decimal,
    pub qr_code: String,
    pub overbooked: bool,
    pub created_at: DateTime<Utc>,
}

status_enum!(
    TicketStatus {
        Sold => "SOLD",
        Cancelled => "CANCELLED",
        NoShow => "NO_SHOW",
        Used => "USED",
    }
);

status_enum!(
    CancellationPolicy {
        FullRefund => "FULL_REFUND",
        PartialRefund => "PARTIAL_REFUND",
        NoRefund => "NO_REFUND",
    }
);
