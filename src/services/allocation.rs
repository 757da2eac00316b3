//! allocation.rs
//!
//! Allocation Engine — единственная точка входа, создающая и удаляющая
//! брони и записи листа ожидания. Сквозной инвариант: сумма group_size
//! активных броней мероприятия никогда не превышает его вместимость,
//! и это видно любому читателю в любой момент.
//!
//! Критические секции сериализуются по мероприятию через реестр мьютексов:
//! резерв-или-очередь и вся последовательность отмена+освобождение+
//! продвижение идут под одним guard'ом. Разные мероприятия друг друга
//! не блокируют.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::config::Config;
use crate::error::EngineError;
use crate::models::{Booking, Event, Payment, PaymentProvider, PaymentStatus, WaitlistEntry};
use crate::services::audit::{AuditAction, AuditLog};
use crate::services::ledger::{CapacityLedger, ReserveStatus};
use crate::services::waitlist::WaitlistQueue;
use crate::store::{KeyedLocks, Store};

/// Результат резервирования. Попадание в лист ожидания — не ошибка,
/// а полноценный исход, на который вызывающий обязан ветвиться.
#[derive(Debug, Clone)]
pub enum ReserveOutcome {
    Booked(Booking),
    Waitlisted(WaitlistEntry),
}

/// Параметры сортировки и пагинации списка броней.
#[derive(Debug, Clone, Default)]
pub struct BookingListQuery {
    pub sort_by: Option<String>,
    pub order: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub struct AllocationEngine {
    store: Arc<Store>,
    ledger: Arc<CapacityLedger>,
    audit: Arc<AuditLog>,
    queue: WaitlistQueue,
    guards: KeyedLocks,
    config: Config,
}

impl AllocationEngine {
    pub fn new(
        store: Arc<Store>,
        ledger: Arc<CapacityLedger>,
        audit: Arc<AuditLog>,
        config: Config,
    ) -> Self {
        let queue = WaitlistQueue::new(store.clone());
        AllocationEngine {
            store,
            ledger,
            audit,
            queue,
            guards: KeyedLocks::new(),
            config,
        }
    }

    fn event(&self, event_id: i64) -> Result<Event, EngineError> {
        self.store
            .events
            .read()
            .unwrap()
            .get(&event_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("event", event_id))
    }

    /// Резервирует места либо ставит пользователя в лист ожидания.
    pub async fn reserve(
        &self,
        event_id: i64,
        user_id: i64,
        group_size: i64,
        group_names: Option<Vec<String>>,
    ) -> Result<ReserveOutcome, EngineError> {
        if group_size < 1 {
            return Err(EngineError::InvalidInput(format!(
                "group_size must be >= 1, got {}",
                group_size
            )));
        }
        let event = self.event(event_id)?;

        let slot = self.guards.slot(event_id);
        let _guard = slot.lock().await;

        match self.ledger.try_reserve(event_id, group_size)? {
            ReserveStatus::Reserved => {
                let booking = self.insert_booking(&event, user_id, group_size, group_names, None);
                info!(
                    booking_id = booking.id,
                    event_id, user_id, group_size, "booking created"
                );
                Ok(ReserveOutcome::Booked(booking))
            }
            ReserveStatus::Full => {
                let entry = self.queue.enqueue(event_id, user_id, group_size);
                info!(
                    entry_id = entry.id,
                    event_id,
                    user_id,
                    position = entry.position,
                    "event full, user waitlisted"
                );
                self.audit.record(
                    Some(user_id),
                    AuditAction::Create,
                    "waitlist",
                    Some(entry.id),
                    Some(json!({ "event_id": event_id, "position": entry.position })),
                );
                Ok(ReserveOutcome::Waitlisted(entry))
            }
        }
    }

    /// Отменяет бронь, освобождает места и продвигает лист ожидания.
    /// Вся последовательность — одна атомарная единица под guard'ом
    /// мероприятия. Возвращает продвинутые брони.
    pub async fn cancel(&self, booking_id: i64) -> Result<Vec<Booking>, EngineError> {
        let found = self
            .store
            .bookings
            .read()
            .unwrap()
            .get(&booking_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("booking", booking_id))?;

        let slot = self.guards.slot(found.event_id);
        let _guard = slot.lock().await;

        // Перечитываем под guard'ом: параллельная отмена могла успеть раньше
        let booking = self
            .store
            .bookings
            .write()
            .unwrap()
            .remove(&booking_id)
            .ok_or_else(|| EngineError::not_found("booking", booking_id))?;

        self.ledger.release(booking.event_id, booking.group_size)?;
        info!(
            booking_id,
            event_id = booking.event_id,
            freed = booking.group_size,
            "booking cancelled"
        );
        self.audit.record(
            None,
            AuditAction::Delete,
            "booking",
            Some(booking_id),
            Some(json!({ "event_id": booking.event_id, "group_size": booking.group_size })),
        );

        if self.config.engine.waitlist_promotion_enabled {
            Ok(self.promote_locked(booking.event_id))
        } else {
            Ok(Vec::new())
        }
    }

    /// Продвижение листа ожидания. Вызывается только под guard'ом
    /// мероприятия. Строгий FIFO: останавливаемся на первой записи,
    /// которая не помещается, даже если более поздняя и меньшая влезла бы.
    /// Записи не дробятся.
    fn promote_locked(&self, event_id: i64) -> Vec<Booking> {
        let event = match self.event(event_id) {
            Ok(event) => event,
            Err(_) => return Vec::new(),
        };
        let mut promoted = Vec::new();
        while let Some(entry) = self.queue.peek_oldest(event_id) {
            match self.ledger.try_reserve(event_id, entry.group_size) {
                Ok(ReserveStatus::Reserved) => {
                    // peek + pop под guard'ом, запись исчезнуть не могла
                    let entry = match self.queue.remove(entry.id) {
                        Ok(entry) => entry,
                        Err(_) => break,
                    };
                    let booking = self.insert_booking(
                        &event,
                        entry.user_id,
                        entry.group_size,
                        None,
                        Some(entry.id),
                    );
                    info!(
                        booking_id = booking.id,
                        event_id,
                        user_id = entry.user_id,
                        from_entry = entry.id,
                        "waitlist entry promoted"
                    );
                    promoted.push(booking);
                }
                _ => break,
            }
        }
        promoted
    }

    /// Явное подтверждение места пользователем из листа ожидания —
    /// режим работы при выключенном автопродвижении.
    pub async fn confirm_waitlist(&self, entry_id: i64) -> Result<Booking, EngineError> {
        let found = self.queue.get(entry_id)?;

        let slot = self.guards.slot(found.event_id);
        let _guard = slot.lock().await;

        let entry = self.queue.get(entry_id)?;
        let event = self.event(entry.event_id)?;
        match self.ledger.try_reserve(entry.event_id, entry.group_size)? {
            ReserveStatus::Full => Err(EngineError::Conflict(format!(
                "no free seats for event {}",
                entry.event_id
            ))),
            ReserveStatus::Reserved => {
                self.queue.remove(entry.id)?;
                let booking = self.insert_booking(
                    &event,
                    entry.user_id,
                    entry.group_size,
                    None,
                    Some(entry.id),
                );
                info!(
                    booking_id = booking.id,
                    entry_id,
                    event_id = entry.event_id,
                    "waitlist entry confirmed"
                );
                Ok(booking)
            }
        }
    }

    /// Изменение брони: group_size и/или имена участников. Рост группы
    /// сам проходит через леджер; ужатие освобождает разницу и запускает
    /// продвижение.
    pub async fn update_booking(
        &self,
        booking_id: i64,
        group_size: Option<i64>,
        group_names: Option<Vec<String>>,
    ) -> Result<Booking, EngineError> {
        if let Some(size) = group_size {
            if size < 1 {
                return Err(EngineError::InvalidInput(format!(
                    "group_size must be >= 1, got {}",
                    size
                )));
            }
        }
        let found = self
            .store
            .bookings
            .read()
            .unwrap()
            .get(&booking_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("booking", booking_id))?;

        let slot = self.guards.slot(found.event_id);
        let _guard = slot.lock().await;

        let mut booking = self
            .store
            .bookings
            .read()
            .unwrap()
            .get(&booking_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("booking", booking_id))?;

        let mut freed_seats = false;
        if let Some(new_size) = group_size {
            let delta = new_size - booking.group_size;
            if delta > 0 {
                match self.ledger.try_reserve(booking.event_id, delta)? {
                    ReserveStatus::Full => {
                        return Err(EngineError::Conflict(format!(
                            "not enough free seats to grow booking {} by {}",
                            booking_id, delta
                        )))
                    }
                    ReserveStatus::Reserved => {}
                }
            } else if delta < 0 {
                self.ledger.release(booking.event_id, -delta)?;
                freed_seats = true;
            }
            booking.group_size = new_size;
        }
        if let Some(names) = group_names {
            booking.group_names = if names.is_empty() { None } else { Some(names) };
        }
        self.store
            .bookings
            .write()
            .unwrap()
            .insert(booking.id, booking.clone());
        self.audit.record(
            None,
            AuditAction::Update,
            "booking",
            Some(booking.id),
            Some(json!({ "group_size": booking.group_size })),
        );

        if freed_seats && self.config.engine.waitlist_promotion_enabled {
            self.promote_locked(booking.event_id);
        }
        Ok(booking)
    }

    /// Переключает флаг оплаты брони (ручная отметка администратора).
    pub fn toggle_payment(&self, booking_id: i64) -> Result<Booking, EngineError> {
        self.toggle_flag(booking_id, |b| {
            b.is_paid = !b.is_paid;
            ("is_paid", b.is_paid)
        })
    }

    /// Переключает флаг посещения.
    pub fn toggle_attendance(&self, booking_id: i64) -> Result<Booking, EngineError> {
        self.toggle_flag(booking_id, |b| {
            b.is_attended = !b.is_attended;
            ("is_attended", b.is_attended)
        })
    }

    fn toggle_flag(
        &self,
        booking_id: i64,
        flip: impl FnOnce(&mut Booking) -> (&'static str, bool),
    ) -> Result<Booking, EngineError> {
        let mut bookings = self.store.bookings.write().unwrap();
        let booking = bookings
            .get_mut(&booking_id)
            .ok_or_else(|| EngineError::not_found("booking", booking_id))?;
        let (field, value) = flip(booking);
        let snapshot = booking.clone();
        drop(bookings);
        self.audit.record(
            None,
            AuditAction::Update,
            "booking",
            Some(booking_id),
            Some(json!({ field: value })),
        );
        Ok(snapshot)
    }

    pub fn get_booking(&self, booking_id: i64) -> Result<Booking, EngineError> {
        self.store
            .bookings
            .read()
            .unwrap()
            .get(&booking_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("booking", booking_id))
    }

    /// Список броней мероприятия; сортировка по created_at (по умолчанию,
    /// desc), user_id, is_paid или is_attended.
    pub fn list_bookings(&self, event_id: i64, query: &BookingListQuery) -> Vec<Booking> {
        let mut bookings: Vec<Booking> = self
            .store
            .bookings
            .read()
            .unwrap()
            .values()
            .filter(|b| b.event_id == event_id)
            .cloned()
            .collect();

        let sort_field = match query.sort_by.as_deref() {
            Some(f @ ("created_at" | "user_id" | "is_paid" | "is_attended")) => f,
            _ => "created_at",
        };
        bookings.sort_by(|a, b| {
            let ord = match sort_field {
                "user_id" => a.user_id.cmp(&b.user_id),
                "is_paid" => a.is_paid.cmp(&b.is_paid),
                "is_attended" => a.is_attended.cmp(&b.is_attended),
                _ => a.created_at.cmp(&b.created_at),
            };
            ord.then(a.id.cmp(&b.id))
        });
        if !matches!(query.order.as_deref(), Some("asc")) {
            bookings.reverse();
        }

        let offset = query.offset.unwrap_or(0);
        match query.limit {
            Some(limit) => bookings.into_iter().skip(offset).take(limit).collect(),
            None => bookings.into_iter().skip(offset).collect(),
        }
    }

    pub fn list_waitlist(&self, event_id: i64) -> Vec<WaitlistEntry> {
        self.queue.list(event_id)
    }

    /// Явное снятие записи листа ожидания (пользователь передумал).
    pub async fn remove_waitlist_entry(&self, entry_id: i64) -> Result<(), EngineError> {
        let found = self.queue.get(entry_id)?;
        let slot = self.guards.slot(found.event_id);
        let _guard = slot.lock().await;
        let entry = self.queue.remove(entry_id)?;
        self.audit.record(
            None,
            AuditAction::Delete,
            "waitlist",
            Some(entry.id),
            Some(json!({ "event_id": entry.event_id })),
        );
        Ok(())
    }

    /// Каскадная зачистка при удалении мероприятия: брони, лист ожидания,
    /// слот леджера. Вызывается слоем управления мероприятиями явно,
    /// никакой неявной каскадности в хранилище нет.
    pub async fn purge_event(&self, event_id: i64) {
        let slot = self.guards.slot(event_id);
        let _guard = slot.lock().await;

        let removed: Vec<i64> = {
            let mut bookings = self.store.bookings.write().unwrap();
            let ids: Vec<i64> = bookings
                .values()
                .filter(|b| b.event_id == event_id)
                .map(|b| b.id)
                .collect();
            for id in &ids {
                bookings.remove(id);
            }
            ids
        };
        let drained = self.queue.drain_event(event_id);
        self.ledger.remove_event(event_id);
        info!(
            event_id,
            bookings = removed.len(),
            waitlist = drained.len(),
            "event allocation state purged"
        );
        self.audit.record(
            None,
            AuditAction::Delete,
            "event",
            Some(event_id),
            Some(json!({ "bookings_removed": removed.len(), "waitlist_removed": drained.len() })),
        );
        drop(_guard);
        self.guards.remove(event_id);
    }

    /// Создание брони под guard'ом мероприятия. Для бесплатного
    /// мероприятия при включённом автоплатеже сразу заводит нулевой
    /// платёж success и помечает бронь оплаченной — подтверждения и
    /// вебхуки не нужны.
    fn insert_booking(
        &self,
        event: &Event,
        user_id: i64,
        group_size: i64,
        group_names: Option<Vec<String>>,
        from_entry: Option<i64>,
    ) -> Booking {
        let auto_paid = !event.is_paid && self.config.engine.free_event_auto_payment;
        let booking = Booking {
            id: self.store.next_booking_id(),
            event_id: event.id,
            user_id,
            group_size,
            group_names,
            is_paid: auto_paid,
            is_attended: false,
            created_at: Utc::now(),
        };
        self.store
            .bookings
            .write()
            .unwrap()
            .insert(booking.id, booking.clone());

        let mut details = json!({ "event_id": event.id, "group_size": group_size });
        if let Some(entry_id) = from_entry {
            details["from_waitlist"] = json!(entry_id);
        }
        self.audit.record(
            Some(user_id),
            AuditAction::Create,
            "booking",
            Some(booking.id),
            Some(details),
        );

        if auto_paid {
            let payment = Payment {
                id: self.store.next_payment_id(),
                event_id: Some(event.id),
                user_id,
                amount: 0.0,
                currency: self.config.payment.default_currency.clone(),
                provider: PaymentProvider::Free,
                status: PaymentStatus::Success,
                external_id: None,
                description: Some(format!("Free event {}", event.id)),
                confirmed_by: None,
                confirmed_at: Some(Utc::now()),
                created_at: Utc::now(),
            };
            self.store
                .payments
                .write()
                .unwrap()
                .insert(payment.id, payment.clone());
            self.audit.record(
                Some(user_id),
                AuditAction::Create,
                "payment",
                Some(payment.id),
                Some(json!({ "provider": "free", "status": "success", "amount": 0.0 })),
            );
        }
        booking
    }
}
