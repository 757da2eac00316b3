pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod services;
pub mod controllers;

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::config::Config;
use crate::error::EngineError;
use crate::models::Event;
use crate::services::allocation::AllocationEngine;
use crate::services::audit::{AuditAction, AuditLog};
use crate::services::ledger::CapacityLedger;
use crate::services::payment::PaymentService;
use crate::store::Store;

// Shared state для всего приложения
pub struct AppState {
    pub store: Arc<Store>,
    pub ledger: Arc<CapacityLedger>,
    pub audit: Arc<AuditLog>,
    pub allocation: AllocationEngine,
    pub payments: PaymentService,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Arc<Self> {
        let store = Arc::new(Store::new());
        let ledger = Arc::new(CapacityLedger::new());
        let audit = Arc::new(AuditLog::new());
        let allocation = AllocationEngine::new(
            store.clone(),
            ledger.clone(),
            audit.clone(),
            config.clone(),
        );
        let payments = PaymentService::new(store.clone(), audit.clone(), config.clone());
        Arc::new(Self {
            store,
            ledger,
            audit,
            allocation,
            payments,
            config,
        })
    }

    // --- Граница управления мероприятиями ---
    //
    // Сам учёт мероприятий лежит вне ядра, но каскадные зачистки у движков
    // явные, поэтому CRUD живёт здесь и дергает их напрямую.

    pub fn create_event(
        &self,
        title: String,
        description: Option<String>,
        max_participants: i64,
        is_paid: bool,
        price: f64,
    ) -> Result<Event, EngineError> {
        if max_participants < 0 {
            return Err(EngineError::InvalidInput(
                "max_participants must not be negative".to_string(),
            ));
        }
        let event = Event {
            id: self.store.next_event_id(),
            title,
            description,
            max_participants,
            is_paid,
            price,
            created_at: Utc::now(),
        };
        self.store
            .events
            .write()
            .unwrap()
            .insert(event.id, event.clone());
        self.ledger.register_event(event.id, event.max_participants);
        self.audit.record(
            None,
            AuditAction::Create,
            "event",
            Some(event.id),
            Some(json!({ "max_participants": event.max_participants, "is_paid": event.is_paid })),
        );
        Ok(event)
    }

    pub fn update_event(
        &self,
        event_id: i64,
        title: Option<String>,
        description: Option<String>,
        max_participants: Option<i64>,
        is_paid: Option<bool>,
        price: Option<f64>,
    ) -> Result<Event, EngineError> {
        // Смена вместимости проходит через леджер до записи, чтобы не
        // опустить потолок ниже уже занятых мест
        if let Some(capacity) = max_participants {
            if capacity < 0 {
                return Err(EngineError::InvalidInput(
                    "max_participants must not be negative".to_string(),
                ));
            }
            self.ledger.resize(event_id, capacity)?;
        }
        let mut events = self.store.events.write().unwrap();
        let event = events
            .get_mut(&event_id)
            .ok_or_else(|| EngineError::not_found("event", event_id))?;
        if let Some(title) = title {
            event.title = title;
        }
        if let Some(description) = description {
            event.description = Some(description);
        }
        if let Some(capacity) = max_participants {
            event.max_participants = capacity;
        }
        if let Some(is_paid) = is_paid {
            event.is_paid = is_paid;
        }
        if let Some(price) = price {
            event.price = price;
        }
        let snapshot = event.clone();
        drop(events);
        self.audit.record(
            None,
            AuditAction::Update,
            "event",
            Some(event_id),
            Some(json!({ "max_participants": snapshot.max_participants })),
        );
        Ok(snapshot)
    }

    pub fn get_event(&self, event_id: i64) -> Result<Event, EngineError> {
        self.store
            .events
            .read()
            .unwrap()
            .get(&event_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("event", event_id))
    }

    /// Удаление мероприятия с явной каскадной зачисткой броней,
    /// листа ожидания и платежей.
    pub async fn delete_event(&self, event_id: i64) -> Result<(), EngineError> {
        self.store
            .events
            .write()
            .unwrap()
            .remove(&event_id)
            .ok_or_else(|| EngineError::not_found("event", event_id))?;
        self.allocation.purge_event(event_id).await;
        self.payments.purge_event(event_id);
        Ok(())
    }
}
