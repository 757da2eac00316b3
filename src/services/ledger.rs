//! ledger.rs
//!
//! Capacity Ledger — единственный источник истины для вопроса "есть ли
//! место". Хранит по каждому мероприятию вместимость и количество занятых
//! мест (сумма group_size активных броней) и применяет дельты атомарно.
//!
//! Карта мероприятий защищена коротким мьютексом только на время поиска
//! слота; сама арифметика идёт под мьютексом конкретного слота, поэтому
//! разные мероприятия не блокируют друг друга.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::error;

use crate::error::EngineError;

/// Результат попытки занять места.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveStatus {
    Reserved,
    Full,
}

#[derive(Debug)]
struct LedgerSlot {
    capacity: i64,
    committed: i64,
}

pub struct CapacityLedger {
    slots: Mutex<HashMap<i64, Arc<Mutex<LedgerSlot>>>>,
}

impl CapacityLedger {
    pub fn new() -> Self {
        CapacityLedger {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, event_id: i64) -> Option<Arc<Mutex<LedgerSlot>>> {
        self.slots.lock().unwrap().get(&event_id).cloned()
    }

    /// Регистрирует мероприятие в реестре. Повторная регистрация
    /// обновляет вместимость, не трогая занятые места.
    pub fn register_event(&self, event_id: i64, capacity: i64) {
        let mut slots = self.slots.lock().unwrap();
        match slots.get(&event_id) {
            Some(slot) => slot.lock().unwrap().capacity = capacity,
            None => {
                slots.insert(
                    event_id,
                    Arc::new(Mutex::new(LedgerSlot {
                        capacity,
                        committed: 0,
                    })),
                );
            }
        }
    }

    /// Смена вместимости. Понижение ниже уже занятых мест отклоняется:
    /// иначе инвариант committed <= capacity был бы нарушен задним числом.
    pub fn resize(&self, event_id: i64, capacity: i64) -> Result<(), EngineError> {
        let slot = self
            .slot(event_id)
            .ok_or_else(|| EngineError::not_found("event", event_id))?;
        let mut slot = slot.lock().unwrap();
        if capacity < slot.committed {
            return Err(EngineError::Conflict(format!(
                "capacity {} is below {} committed seats of event {}",
                capacity, slot.committed, event_id
            )));
        }
        slot.capacity = capacity;
        Ok(())
    }

    /// Атомарно сравнивает committed + group_size с вместимостью и при
    /// успехе занимает места. При нехватке возвращает `Full` без побочных
    /// эффектов.
    pub fn try_reserve(&self, event_id: i64, group_size: i64) -> Result<ReserveStatus, EngineError> {
        let slot = self
            .slot(event_id)
            .ok_or_else(|| EngineError::not_found("event", event_id))?;
        let mut slot = slot.lock().unwrap();
        if slot.committed + group_size <= slot.capacity {
            slot.committed += group_size;
            Ok(ReserveStatus::Reserved)
        } else {
            Ok(ReserveStatus::Full)
        }
    }

    /// Освобождает места. Попытка освободить больше, чем занято, —
    /// внутренняя ошибка последовательности, падаем громко, не ужимая в ноль.
    pub fn release(&self, event_id: i64, group_size: i64) -> Result<(), EngineError> {
        let slot = self
            .slot(event_id)
            .ok_or_else(|| EngineError::not_found("event", event_id))?;
        let mut slot = slot.lock().unwrap();
        if group_size > slot.committed {
            error!(
                event_id,
                group_size,
                committed = slot.committed,
                "release exceeds committed seats"
            );
            return Err(EngineError::InvariantViolation(format!(
                "release of {} seats exceeds {} committed for event {}",
                group_size, slot.committed, event_id
            )));
        }
        slot.committed -= group_size;
        Ok(())
    }

    /// (вместимость, занято) для админского слоя.
    pub fn availability(&self, event_id: i64) -> Result<(i64, i64), EngineError> {
        let slot = self
            .slot(event_id)
            .ok_or_else(|| EngineError::not_found("event", event_id))?;
        let slot = slot.lock().unwrap();
        Ok((slot.capacity, slot.committed))
    }

    pub fn remove_event(&self, event_id: i64) {
        self.slots.lock().unwrap().remove(&event_id);
    }
}

impl Default for CapacityLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_until_full_then_release() {
        let ledger = CapacityLedger::new();
        ledger.register_event(1, 5);
        assert_eq!(ledger.try_reserve(1, 3).unwrap(), ReserveStatus::Reserved);
        assert_eq!(ledger.try_reserve(1, 2).unwrap(), ReserveStatus::Reserved);
        // Мест нет — и без побочных эффектов
        assert_eq!(ledger.try_reserve(1, 1).unwrap(), ReserveStatus::Full);
        assert_eq!(ledger.availability(1).unwrap(), (5, 5));
        ledger.release(1, 3).unwrap();
        assert_eq!(ledger.availability(1).unwrap(), (5, 2));
        assert_eq!(ledger.try_reserve(1, 3).unwrap(), ReserveStatus::Reserved);
    }

    #[test]
    fn release_below_zero_is_invariant_violation() {
        let ledger = CapacityLedger::new();
        ledger.register_event(1, 2);
        ledger.try_reserve(1, 1).unwrap();
        let err = ledger.release(1, 2).unwrap_err();
        assert!(matches!(err, EngineError::InvariantViolation(_)));
        // Состояние не ужато в ноль
        assert_eq!(ledger.availability(1).unwrap(), (2, 1));
    }

    #[test]
    fn resize_below_committed_is_conflict() {
        let ledger = CapacityLedger::new();
        ledger.register_event(1, 5);
        ledger.try_reserve(1, 4).unwrap();
        assert!(matches!(
            ledger.resize(1, 3),
            Err(EngineError::Conflict(_))
        ));
        ledger.resize(1, 4).unwrap();
        assert_eq!(ledger.availability(1).unwrap(), (4, 4));
    }

    #[test]
    fn unknown_event_is_not_found() {
        let ledger = CapacityLedger::new();
        assert!(matches!(
            ledger.try_reserve(42, 1),
            Err(EngineError::NotFound(_))
        ));
    }
}
