//! Лист ожидания: строгий FIFO-порядок прибытия в пределах мероприятия.
//!
//! Позиции монотонно растут и не переиспользуются после удалений, поэтому
//! порядок устойчив к параллельным удалениям. Сортировка чтения —
//! (position, id).

use std::sync::Arc;

use chrono::Utc;

use crate::error::EngineError;
use crate::models::WaitlistEntry;
use crate::store::Store;

pub struct WaitlistQueue {
    store: Arc<Store>,
}

impl WaitlistQueue {
    pub fn new(store: Arc<Store>) -> Self {
        WaitlistQueue { store }
    }

    /// Добавляет запись в хвост очереди мероприятия.
    pub fn enqueue(&self, event_id: i64, user_id: i64, group_size: i64) -> WaitlistEntry {
        let entry = WaitlistEntry {
            id: self.store.next_waitlist_id(),
            event_id,
            user_id,
            group_size,
            position: self.store.next_waitlist_position(event_id),
            created_at: Utc::now(),
        };
        self.store
            .waitlist
            .write()
            .unwrap()
            .insert(entry.id, entry.clone());
        entry
    }

    /// Самая старая запись очереди (наименьшая позиция), без удаления.
    pub fn peek_oldest(&self, event_id: i64) -> Option<WaitlistEntry> {
        self.store
            .waitlist
            .read()
            .unwrap()
            .values()
            .filter(|e| e.event_id == event_id)
            .min_by_key(|e| (e.position, e.id))
            .cloned()
    }

    pub fn get(&self, entry_id: i64) -> Result<WaitlistEntry, EngineError> {
        self.store
            .waitlist
            .read()
            .unwrap()
            .get(&entry_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("waitlist entry", entry_id))
    }

    /// Удаляет конкретную запись (продвижение или явный отказ от места).
    pub fn remove(&self, entry_id: i64) -> Result<WaitlistEntry, EngineError> {
        self.store
            .waitlist
            .write()
            .unwrap()
            .remove(&entry_id)
            .ok_or_else(|| EngineError::not_found("waitlist entry", entry_id))
    }

    pub fn list(&self, event_id: i64) -> Vec<WaitlistEntry> {
        let mut entries: Vec<WaitlistEntry> = self
            .store
            .waitlist
            .read()
            .unwrap()
            .values()
            .filter(|e| e.event_id == event_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.position, e.id));
        entries
    }

    /// Каскадная зачистка очереди мероприятия, возвращает снятые записи.
    pub fn drain_event(&self, event_id: i64) -> Vec<WaitlistEntry> {
        let mut waitlist = self.store.waitlist.write().unwrap();
        let ids: Vec<i64> = waitlist
            .values()
            .filter(|e| e.event_id == event_id)
            .map(|e| e.id)
            .collect();
        let mut drained: Vec<WaitlistEntry> = ids
            .into_iter()
            .filter_map(|id| waitlist.remove(&id))
            .collect();
        drop(waitlist);
        self.store.clear_waitlist_positions(event_id);
        drained.sort_by_key(|e| (e.position, e.id));
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> WaitlistQueue {
        WaitlistQueue::new(Arc::new(Store::new()))
    }

    #[test]
    fn fifo_order_survives_removals() {
        let q = queue();
        let a = q.enqueue(1, 10, 2);
        let b = q.enqueue(1, 11, 1);
        let c = q.enqueue(1, 12, 3);
        assert_eq!(q.peek_oldest(1).unwrap().id, a.id);
        q.remove(a.id).unwrap();
        assert_eq!(q.peek_oldest(1).unwrap().id, b.id);
        // Новая запись встаёт за c, позиция не переиспользует снятую
        let d = q.enqueue(1, 13, 1);
        assert!(d.position > c.position);
        let order: Vec<i64> = q.list(1).iter().map(|e| e.id).collect();
        assert_eq!(order, vec![b.id, c.id, d.id]);
    }

    #[test]
    fn queues_are_independent_per_event() {
        let q = queue();
        q.enqueue(1, 10, 1);
        let other = q.enqueue(2, 20, 1);
        assert_eq!(other.position, 1);
        assert_eq!(q.list(2).len(), 1);
        q.drain_event(1);
        assert!(q.peek_oldest(1).is_none());
        assert_eq!(q.list(2).len(), 1);
    }
}
