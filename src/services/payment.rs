//! payment.rs
//!
//! Payment Reconciliation Engine — владеет записями платежей и сводит
//! их статусы с флагами оплаты зависимых броней, несмотря на дубли,
//! задержки и перестановку внешних сигналов.
//!
//! Машина состояний платежа:
//! pending --confirm/webhook(success)--> success --refund--> refunded;
//! pending --webhook(failed)--> failed (терминальное).
//! Никакие другие переходы недопустимы; противоречащий вебхук — Conflict,
//! повтор уже применённого — no-op. Сверка по одному платежу
//! сериализована через реестр мьютексов, разные платежи независимы.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::EngineError;
use crate::models::{Payment, PaymentProvider, PaymentStatus};
use crate::services::audit::{AuditAction, AuditLog};
use crate::store::{KeyedLocks, Store};

/// Параметры создания платежа.
#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub user_id: i64,
    pub event_id: Option<i64>,
    pub amount: f64,
    pub currency: Option<String>,
    pub provider: Option<PaymentProvider>,
    pub description: Option<String>,
}

/// Фильтры списка платежей.
#[derive(Debug, Clone, Default)]
pub struct PaymentListQuery {
    pub event_id: Option<i64>,
    pub provider: Option<PaymentProvider>,
    pub status: Option<PaymentStatus>,
    pub sort_by: Option<String>,
    pub order: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub struct PaymentService {
    store: Arc<Store>,
    audit: Arc<AuditLog>,
    guards: KeyedLocks,
    config: Config,
}

impl PaymentService {
    pub fn new(store: Arc<Store>, audit: Arc<AuditLog>, config: Config) -> Self {
        PaymentService {
            store,
            audit,
            guards: KeyedLocks::new(),
            config,
        }
    }

    /// Создаёт платёж. Провайдер, если не указан, выводится из
    /// мероприятия: платное — yookassa, бесплатное — free (сразу success).
    /// Платежи без мероприятия по умолчанию идут через support.
    pub fn create(&self, req: CreatePayment) -> Result<Payment, EngineError> {
        let provider = match req.provider {
            Some(p) => p,
            None => match req.event_id {
                Some(event_id) => {
                    let events = self.store.events.read().unwrap();
                    let event = events
                        .get(&event_id)
                        .ok_or_else(|| EngineError::not_found("event", event_id))?;
                    if event.is_paid {
                        PaymentProvider::Yookassa
                    } else {
                        PaymentProvider::Free
                    }
                }
                None => PaymentProvider::Support,
            },
        };
        if let Some(event_id) = req.event_id {
            if !self.store.events.read().unwrap().contains_key(&event_id) {
                return Err(EngineError::not_found("event", event_id));
            }
        }
        if provider != PaymentProvider::Free && req.amount <= 0.0 {
            return Err(EngineError::InvalidInput(
                "payment amount must be positive".to_string(),
            ));
        }

        let status = if provider == PaymentProvider::Free {
            PaymentStatus::Success
        } else {
            PaymentStatus::Pending
        };
        // Корреляционный ключ для внешнего провайдера; подпись запросов
        // к шлюзу — вне рамок движка.
        let external_id = if provider == PaymentProvider::Yookassa {
            Some(Uuid::new_v4().to_string())
        } else {
            None
        };

        let payment = Payment {
            id: self.store.next_payment_id(),
            event_id: req.event_id,
            user_id: req.user_id,
            amount: if provider == PaymentProvider::Free {
                0.0
            } else {
                req.amount
            },
            currency: req
                .currency
                .unwrap_or_else(|| self.config.payment.default_currency.clone()),
            provider,
            status,
            external_id,
            description: req.description,
            confirmed_by: None,
            confirmed_at: None,
            created_at: Utc::now(),
        };
        self.store
            .payments
            .write()
            .unwrap()
            .insert(payment.id, payment.clone());
        info!(
            payment_id = payment.id,
            provider = %payment.provider,
            status = %payment.status,
            "payment created"
        );
        self.audit.record(
            Some(payment.user_id),
            AuditAction::Create,
            "payment",
            Some(payment.id),
            Some(json!({
                "amount": payment.amount,
                "provider": payment.provider.to_string(),
                "status": payment.status.to_string(),
            })),
        );

        // free-платёж успешен с момента создания — брони оплачены сразу
        if payment.status == PaymentStatus::Success {
            if let Some(event_id) = payment.event_id {
                self.set_bookings_paid(payment.user_id, event_id, true);
            }
        }
        Ok(payment)
    }

    /// Ручное подтверждение оператором: только pending -> success.
    /// Подтверждение уже успешного платежа — no-op, не ошибка.
    pub async fn confirm_manual(
        &self,
        payment_id: i64,
        operator_id: i64,
    ) -> Result<Payment, EngineError> {
        let slot = self.guards.slot(payment_id);
        let _guard = slot.lock().await;

        let payment = self.get(payment_id)?;
        match payment.status {
            PaymentStatus::Success => Ok(payment),
            PaymentStatus::Pending => {
                let updated = self.transition(payment_id, PaymentStatus::Success, |p| {
                    p.confirmed_by = Some(operator_id);
                    p.confirmed_at = Some(Utc::now());
                })?;
                if let Some(event_id) = updated.event_id {
                    self.set_bookings_paid(updated.user_id, event_id, true);
                }
                info!(payment_id, operator_id, "payment confirmed manually");
                self.audit.record(
                    Some(operator_id),
                    AuditAction::Update,
                    "payment",
                    Some(payment_id),
                    Some(json!({ "status": "success" })),
                );
                Ok(updated)
            }
            other => Err(EngineError::Conflict(format!(
                "cannot confirm payment {} in status {}",
                payment_id, other
            ))),
        }
    }

    /// Применяет вебхук провайдера. Доставка at-least-once и может
    /// приходить не по порядку: повтор согласованного статуса — no-op,
    /// противоречащий терминальному состоянию переход — Conflict,
    /// состояние сохраняется.
    pub async fn apply_webhook(
        &self,
        external_id: &str,
        new_status: PaymentStatus,
    ) -> Result<Payment, EngineError> {
        if !matches!(new_status, PaymentStatus::Success | PaymentStatus::Failed) {
            return Err(EngineError::InvalidInput(format!(
                "webhook status must be success or failed, got {}",
                new_status
            )));
        }
        let payment_id = {
            let payments = self.store.payments.read().unwrap();
            payments
                .values()
                .find(|p| p.external_id.as_deref() == Some(external_id))
                .map(|p| p.id)
                .ok_or_else(|| EngineError::not_found("payment with external_id", external_id))?
        };

        let slot = self.guards.slot(payment_id);
        let _guard = slot.lock().await;

        let payment = self.get(payment_id)?;
        match (payment.status, new_status) {
            // Повторная доставка уже применённого статуса
            (current, incoming) if current == incoming => Ok(payment),
            // Поздний дубль success после возврата согласован с историей
            (PaymentStatus::Refunded, PaymentStatus::Success) => Ok(payment),
            (PaymentStatus::Pending, PaymentStatus::Success) => {
                let updated = self.transition(payment_id, PaymentStatus::Success, |p| {
                    p.confirmed_at = Some(Utc::now());
                })?;
                if let Some(event_id) = updated.event_id {
                    self.set_bookings_paid(updated.user_id, event_id, true);
                }
                info!(payment_id, external_id, "payment succeeded via webhook");
                self.audit.record(
                    None,
                    AuditAction::Update,
                    "payment",
                    Some(payment_id),
                    Some(json!({ "status": "success", "via": "webhook" })),
                );
                Ok(updated)
            }
            (PaymentStatus::Pending, PaymentStatus::Failed) => {
                let updated = self.transition(payment_id, PaymentStatus::Failed, |_| {})?;
                info!(payment_id, external_id, "payment failed via webhook");
                self.audit.record(
                    None,
                    AuditAction::Update,
                    "payment",
                    Some(payment_id),
                    Some(json!({ "status": "failed", "via": "webhook" })),
                );
                Ok(updated)
            }
            (current, incoming) => {
                warn!(
                    payment_id,
                    external_id,
                    %current,
                    %incoming,
                    "conflicting webhook transition rejected"
                );
                Err(EngineError::Conflict(format!(
                    "webhook {} for payment {} in terminal status {}",
                    incoming, payment_id, current
                )))
            }
        }
    }

    /// Возврат: только success -> refunded. Снимает флаг оплаты с броней,
    /// зависевших от этого платежа. Повторный возврат — no-op.
    pub async fn refund(&self, payment_id: i64, operator_id: i64) -> Result<Payment, EngineError> {
        let slot = self.guards.slot(payment_id);
        let _guard = slot.lock().await;

        let payment = self.get(payment_id)?;
        match payment.status {
            PaymentStatus::Refunded => Ok(payment),
            PaymentStatus::Success => {
                let updated = self.transition(payment_id, PaymentStatus::Refunded, |_| {})?;
                if let Some(event_id) = updated.event_id {
                    if !self.other_success_exists(&updated) {
                        self.set_bookings_paid(updated.user_id, event_id, false);
                    }
                }
                info!(payment_id, operator_id, "payment refunded");
                self.audit.record(
                    Some(operator_id),
                    AuditAction::Update,
                    "payment",
                    Some(payment_id),
                    Some(json!({ "status": "refunded" })),
                );
                Ok(updated)
            }
            other => Err(EngineError::Conflict(format!(
                "cannot refund payment {} in status {}",
                payment_id, other
            ))),
        }
    }

    /// Удаляет платёж. Если он был единственным успешным платежом
    /// пользователя за мероприятие, брони размечаются как неоплаченные.
    pub async fn delete(&self, payment_id: i64) -> Result<(), EngineError> {
        let slot = self.guards.slot(payment_id);
        let _guard = slot.lock().await;

        let payment = self
            .store
            .payments
            .write()
            .unwrap()
            .remove(&payment_id)
            .ok_or_else(|| EngineError::not_found("payment", payment_id))?;

        if payment.status == PaymentStatus::Success {
            if let Some(event_id) = payment.event_id {
                if !self.other_success_exists(&payment) {
                    self.set_bookings_paid(payment.user_id, event_id, false);
                }
            }
        }
        info!(payment_id, "payment deleted");
        self.audit.record(
            None,
            AuditAction::Delete,
            "payment",
            Some(payment_id),
            None,
        );
        drop(_guard);
        self.guards.remove(payment_id);
        Ok(())
    }

    pub fn get(&self, payment_id: i64) -> Result<Payment, EngineError> {
        self.store
            .payments
            .read()
            .unwrap()
            .get(&payment_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("payment", payment_id))
    }

    /// Список платежей с фильтрами; сортировка по created_at (по
    /// умолчанию, desc) или amount.
    pub fn list(&self, query: &PaymentListQuery) -> Vec<Payment> {
        let mut payments: Vec<Payment> = self
            .store
            .payments
            .read()
            .unwrap()
            .values()
            .filter(|p| query.event_id.map_or(true, |e| p.event_id == Some(e)))
            .filter(|p| query.provider.map_or(true, |pr| p.provider == pr))
            .filter(|p| query.status.map_or(true, |s| p.status == s))
            .cloned()
            .collect();

        payments.sort_by(|a, b| {
            let ord = match query.sort_by.as_deref() {
                Some("amount") => a
                    .amount
                    .partial_cmp(&b.amount)
                    .unwrap_or(std::cmp::Ordering::Equal),
                _ => a.created_at.cmp(&b.created_at),
            };
            ord.then(a.id.cmp(&b.id))
        });
        if !matches!(query.order.as_deref(), Some("asc")) {
            payments.reverse();
        }

        let offset = query.offset.unwrap_or(0);
        match query.limit {
            Some(limit) => payments.into_iter().skip(offset).take(limit).collect(),
            None => payments.into_iter().skip(offset).collect(),
        }
    }

    /// Каскадная зачистка платежей удалённого мероприятия.
    pub fn purge_event(&self, event_id: i64) {
        let mut payments = self.store.payments.write().unwrap();
        let ids: Vec<i64> = payments
            .values()
            .filter(|p| p.event_id == Some(event_id))
            .map(|p| p.id)
            .collect();
        for id in &ids {
            payments.remove(id);
        }
        drop(payments);
        if !ids.is_empty() {
            info!(event_id, removed = ids.len(), "event payments purged");
        }
    }

    fn transition(
        &self,
        payment_id: i64,
        status: PaymentStatus,
        apply: impl FnOnce(&mut Payment),
    ) -> Result<Payment, EngineError> {
        let mut payments = self.store.payments.write().unwrap();
        let payment = payments
            .get_mut(&payment_id)
            .ok_or_else(|| EngineError::not_found("payment", payment_id))?;
        payment.status = status;
        apply(payment);
        Ok(payment.clone())
    }

    /// Есть ли другой успешный платёж того же пользователя за то же
    /// мероприятие, от которого флаг оплаты мог бы зависеть.
    fn other_success_exists(&self, payment: &Payment) -> bool {
        self.store.payments.read().unwrap().values().any(|p| {
            p.id != payment.id
                && p.user_id == payment.user_id
                && p.event_id == payment.event_id
                && p.status == PaymentStatus::Success
        })
    }

    /// Проставляет is_paid на бронях пользователя за мероприятие.
    fn set_bookings_paid(&self, user_id: i64, event_id: i64, paid: bool) {
        let mut bookings = self.store.bookings.write().unwrap();
        for booking in bookings
            .values_mut()
            .filter(|b| b.user_id == user_id && b.event_id == event_id)
        {
            booking.is_paid = paid;
        }
    }
}
