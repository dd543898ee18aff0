//! Доменные сущности: рейсы, места, билеты, холды, запросы на овербукинг.
//!
//! Статусы хранятся в БД как TEXT, поэтому каждый enum умеет `as_str()` / `FromStr`.

/// Строковый enum статуса: serde в SCREAMING_SNAKE_CASE, `as_str`, `Display`, `FromStr`.
macro_rules! status_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ::serde::Serialize, ::serde::Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} value: {}", stringify!($name), other)),
                }
            }
        }
    };
}

pub(crate) use status_enum;

pub mod bus;
pub mod fare_rule;
pub mod overbooking;
pub mod passenger;
pub mod seat_hold;
pub mod segment;
pub mod stop;
pub mod ticket;
pub mod trip;

pub use bus::{Bus, Seat};
pub use fare_rule::FareRule;
pub use overbooking::{NewOverbookingRequest, OverbookingDecision, OverbookingRequest, OverbookingStatus};
pub use passenger::{Passenger, PassengerCategory};
pub use seat_hold::{HoldStatus, NewSeatHold, SeatHold};
pub use segment::Segment;
pub use stop::Stop;
pub use ticket::{CancellationPolicy, NewTicket, Ticket, TicketStatus};
pub use trip::{Trip, TripStatus};
