use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    pub event_id: i64,
    pub user_id: i64,
    /// Количество мест в брони (>= 1), групповые брони занимают несколько мест.
    pub group_size: i64,
    /// Имена участников группы, если указаны при создании.
    pub group_names: Option<Vec<String>>,
    pub is_paid: bool,
    pub is_attended: bool,
    pub created_at: DateTime<Utc>,
}
