//! In-memory хранилище сущностей движка.
//!
//! Все записи лежат в арене `RwLock<HashMap>` и мутируются только через
//! операции движков (Allocation / Payment Reconciliation). Идентификаторы
//! выдаются атомарными счётчиками и никогда не переиспользуются.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::models::{Booking, Event, Payment, WaitlistEntry};

pub struct Store {
    pub events: RwLock<HashMap<i64, Event>>,
    pub bookings: RwLock<HashMap<i64, Booking>>,
    pub waitlist: RwLock<HashMap<i64, WaitlistEntry>>,
    pub payments: RwLock<HashMap<i64, Payment>>,
    next_event_id: AtomicI64,
    next_booking_id: AtomicI64,
    next_waitlist_id: AtomicI64,
    next_payment_id: AtomicI64,
    // High-water mark позиций листа ожидания по мероприятиям. Позиции
    // строго растут и не переиспользуются после удалений.
    waitlist_positions: Mutex<HashMap<i64, i64>>,
}

impl Store {
    pub fn new() -> Self {
        Store {
            events: RwLock::new(HashMap::new()),
            bookings: RwLock::new(HashMap::new()),
            waitlist: RwLock::new(HashMap::new()),
            payments: RwLock::new(HashMap::new()),
            next_event_id: AtomicI64::new(1),
            next_booking_id: AtomicI64::new(1),
            next_waitlist_id: AtomicI64::new(1),
            next_payment_id: AtomicI64::new(1),
            waitlist_positions: Mutex::new(HashMap::new()),
        }
    }

    pub fn next_event_id(&self) -> i64 {
        self.next_event_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_booking_id(&self) -> i64 {
        self.next_booking_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_waitlist_id(&self) -> i64 {
        self.next_waitlist_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_payment_id(&self) -> i64 {
        self.next_payment_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Следующая позиция в листе ожидания мероприятия.
    pub fn next_waitlist_position(&self, event_id: i64) -> i64 {
        let mut positions = self.waitlist_positions.lock().unwrap();
        let pos = positions.entry(event_id).or_insert(0);
        *pos += 1;
        *pos
    }

    /// Сброс счётчика позиций при каскадном удалении мероприятия.
    pub fn clear_waitlist_positions(&self, event_id: i64) {
        self.waitlist_positions.lock().unwrap().remove(&event_id);
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

/// Реестр мьютексов по ключу: один `tokio::sync::Mutex` на мероприятие (или платёж),
/// создаётся по требованию. Разные ключи не блокируют друг друга —
/// глобальной блокировки нет.
pub struct KeyedLocks {
    slots: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        KeyedLocks {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Возвращает мьютекс для ключа; вызывающий держит guard на время
    /// критической секции.
    pub fn slot(&self, key: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.slots
            .lock()
            .unwrap()
            .entry(key)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub fn remove(&self, key: i64) {
        self.slots.lock().unwrap().remove(&key);
    }
}

impl Default for KeyedLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waitlist_positions_are_monotonic_and_never_reused() {
        let store = Store::new();
        assert_eq!(store.next_waitlist_position(1), 1);
        assert_eq!(store.next_waitlist_position(1), 2);
        // Независимый счётчик для другого мероприятия
        assert_eq!(store.next_waitlist_position(2), 1);
        // Удаление записей не возвращает позиции
        assert_eq!(store.next_waitlist_position(1), 3);
        store.clear_waitlist_positions(1);
        assert_eq!(store.next_waitlist_position(1), 1);
    }

    #[tokio::test]
    async fn keyed_locks_do_not_block_other_keys() {
        let locks = KeyedLocks::new();
        let a = locks.slot(1);
        let _held = a.lock().await;
        // Другой ключ доступен сразу, несмотря на занятый первый
        let b = locks.slot(2);
        assert!(b.try_lock().is_ok());
        // Тот же ключ занят
        let a2 = locks.slot(1);
        assert!(a2.try_lock().is_err());
    }
}
