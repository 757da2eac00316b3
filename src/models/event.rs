use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    /// Вместимость мероприятия: потолок суммы group_size активных броней.
    pub max_participants: i64,
    pub is_paid: bool,
    pub price: f64,
    pub created_at: DateTime<Utc>,
}
