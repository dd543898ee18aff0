use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trip {
    pub id: i64,
    pub route_id: i64,
    pub bus_id: i64,
    pub date: NaiveDate,
    pub departure_at: DateTime<Utc>,
    pub arrival_at: Option<DateTime<Utc>>,
    pub status: TripStatus,
}

status_enum!(
    TripStatus {
        Scheduled => "SCHEDULED",
        Boarding => "BOARDING",
        Departed => "DEPARTED",
        Arrived => "ARRIVED",
        Cancelled => "CANCELLED",
    }
);

impl TripStatus {
    /// Продажи и холды разрешены только до отправления
    pub fn is_bookable(&self) -> bool {
        matches!(self, TripStatus::Scheduled | TripStatus::Boarding)
    }

    pub fn can_transition_to(&self, next: TripStatus) -> bool {
        use TripStatus::*;
        matches!(
            (self, next),
            (Scheduled, Boarding)
                | (Boarding, Departed)
                | (Departed, Arrived)
                | (Scheduled, Cancelled)
                | (Boarding, Cancelled)
                | (Departed, Cancelled)
                | (Cancelled, Scheduled)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TripStatus::*;

    #[test]
    fn forward_path_is_allowed() {
        assert!(Scheduled.can_transition_to(Boarding));
        assert!(Boarding.can_transition_to(Departed));
        assert!(Departed.can_transition_to(Arrived));
    }

    #[test]
    fn arrived_is_terminal() {
        for next in [Scheduled, Boarding, Departed, Cancelled] {
            assert!(!Arrived.can_transition_to(next));
        }
    }

    #[test]
    fn cancelled_trip_can_be_reactivated() {
        assert!(Cancelled.can_transition_to(Scheduled));
        assert!(!Cancelled.can_transition_to(Boarding));
    }

    #[test]
    fn status_round_trips_through_text() {
        assert_eq!("DEPARTED".parse::<TripStatus>(), Ok(Departed));
        assert!("departed".parse::<TripStatus>().is_err());
    }
}
