use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passenger {
    pub id: i64,
    pub full_name: String,
    pub age: Option<i32>,
    #[serde(default)]
    pub is_student: bool,
}

status_enum!(
    /// Категория пассажира для скидок
    PassengerCategory {
        Adult => "ADULT",
        Child => "CHILD",
        Senior => "SENIOR",
        Student => "STUDENT",
    }
);
