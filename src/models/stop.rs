use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stop {
    pub id: i64,
    pub route_id: i64,
    pub name: String,
    /// 0-based порядок на маршруте
    pub order: i32,
}
