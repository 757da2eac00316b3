use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: i64,
    pub event_id: i64,
    pub user_id: i64,
    pub group_size: i64,
    /// Позиция в очереди: строго возрастает в пределах мероприятия и
    /// никогда не переиспользуется после удаления записи.
    pub position: i64,
    pub created_at: DateTime<Utc>,
}
