use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::PassengerCategory;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareRule {
    pub id: i64,
    pub route_id: i64,
    pub from_stop_id: i64,
    pub to_stop_id: i64,
    pub base_price: Decimal,
    /// Скидка в процентах по категории пассажира
    #[serde(default)]
    pub discounts: HashMap<PassengerCategory, Decimal>,
    #[serde(default)]
    pub dynamic_pricing: bool,
}
