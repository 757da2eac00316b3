//! Аудит-журнал: приёмник записей обо всех изменяющих операциях.
//!
//! Запись работает по принципу fire-and-forget: сбой аудита логируется,
//! но никогда не валит и не откатывает породившую его операцию.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: i64,
    /// None для действий, инициированных системой (вебхуки, продвижение).
    pub user_id: Option<i64>,
    pub action: AuditAction,
    pub object_type: String,
    pub object_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub user_id: Option<i64>,
    pub object_type: Option<String>,
    pub action: Option<AuditAction>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub struct AuditLog {
    records: RwLock<Vec<AuditRecord>>,
    next_id: AtomicI64,
}

impl AuditLog {
    pub fn new() -> Self {
        AuditLog {
            records: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Пишет запись аудита. Любой сбой журнала - это warn в логе,
    /// не ошибка вызывающей операции.
    pub fn record(
        &self,
        user_id: Option<i64>,
        action: AuditAction,
        object_type: &str,
        object_id: Option<i64>,
        details: Option<serde_json::Value>,
    ) {
        let entry = AuditRecord {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            user_id,
            action,
            object_type: object_type.to_string(),
            object_id,
            timestamp: Utc::now(),
            details,
        };
        match self.records.write() {
            Ok(mut records) => records.push(entry),
            Err(e) => warn!("audit sink unavailable, record dropped: {}", e),
        }
    }

    /// Выборка записей с фильтрами, новые сверху.
    pub fn list(&self, filter: &AuditFilter) -> Vec<AuditRecord> {
        let records = match self.records.read() {
            Ok(records) => records,
            Err(e) => {
                warn!("audit sink unavailable for read: {}", e);
                return Vec::new();
            }
        };
        let mut out: Vec<AuditRecord> = records
            .iter()
            .filter(|r| filter.user_id.map_or(true, |u| r.user_id == Some(u)))
            .filter(|r| {
                filter
                    .object_type
                    .as_deref()
                    .map_or(true, |t| r.object_type == t)
            })
            .filter(|r| filter.action.map_or(true, |a| r.action == a))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        let offset = filter.offset.unwrap_or(0);
        let limit = filter.limit.unwrap_or(100);
        out.into_iter().skip(offset).take(limit).collect()
    }

    #[cfg(test)]
    pub fn count_for(&self, object_type: &str, action: AuditAction) -> usize {
        self.records
            .read()
            .map(|r| {
                r.iter()
                    .filter(|x| x.object_type == object_type && x.action == action)
                    .count()
            })
            .unwrap_or(0)
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_narrow_the_listing() {
        let log = AuditLog::new();
        log.record(Some(1), AuditAction::Create, "booking", Some(10), None);
        log.record(Some(2), AuditAction::Update, "booking", Some(10), None);
        log.record(None, AuditAction::Update, "payment", Some(5), None);

        assert_eq!(log.count_for("booking", AuditAction::Update), 1);
        let filter = AuditFilter {
            object_type: Some("booking".to_string()),
            ..Default::default()
        };
        assert_eq!(log.list(&filter).len(), 2);
        let filter = AuditFilter {
            user_id: Some(1),
            ..Default::default()
        };
        let only_first = log.list(&filter);
        assert_eq!(only_first.len(), 1);
        assert_eq!(only_first[0].object_id, Some(10));
    }

    #[test]
    fn listing_is_newest_first_with_limit() {
        let log = AuditLog::new();
        for i in 0..5 {
            log.record(None, AuditAction::Create, "event", Some(i), None);
        }
        let filter = AuditFilter {
            limit: Some(2),
            ..Default::default()
        };
        let page = log.list(&filter);
        assert_eq!(page.len(), 2);
        // Записи с одинаковым timestamp упорядочены по id по убыванию
        assert!(page[0].id > page[1].id);
    }
}
