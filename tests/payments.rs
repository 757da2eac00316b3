//! Интеграционные тесты сверки платежей: идемпотентность вебхуков,
//! отказ противоречивых переходов, снятие флага оплаты.

use std::sync::Arc;

use event_booking::config::Config;
use event_booking::error::EngineError;
use event_booking::models::{PaymentProvider, PaymentStatus};
use event_booking::services::allocation::ReserveOutcome;
use event_booking::services::audit::{AuditAction, AuditFilter};
use event_booking::services::payment::{CreatePayment, PaymentListQuery};
use event_booking::AppState;

fn app() -> Arc<AppState> {
    AppState::new(Config::default())
}

fn paid_event(state: &AppState, capacity: i64) -> i64 {
    state
        .create_event("Концерт".to_string(), None, capacity, true, 2000.0)
        .unwrap()
        .id
}

/// Бронь на платном мероприятии + ожидающий платёж через Юкассу.
async fn booking_with_payment(state: &AppState, user_id: i64) -> (i64, i64, i64, String) {
    let event = paid_event(state, 10);
    let booking = match state
        .allocation
        .reserve(event, user_id, 1, None)
        .await
        .unwrap()
    {
        ReserveOutcome::Booked(b) => b,
        other => panic!("expected booking, got {:?}", other),
    };
    let payment = state
        .payments
        .create(CreatePayment {
            user_id,
            event_id: Some(event),
            amount: 2000.0,
            currency: None,
            provider: None,
            description: None,
        })
        .unwrap();
    let external_id = payment.external_id.clone().unwrap();
    (event, booking.id, payment.id, external_id)
}

fn payment_update_count(state: &AppState, payment_id: i64) -> usize {
    state
        .audit
        .list(&AuditFilter {
            object_type: Some("payment".to_string()),
            action: Some(AuditAction::Update),
            ..Default::default()
        })
        .iter()
        .filter(|r| r.object_id == Some(payment_id))
        .count()
}

#[tokio::test]
async fn provider_is_inferred_from_event() {
    let state = app();
    let paid = paid_event(&state, 5);
    let free = state
        .create_event("Митап".to_string(), None, 5, false, 0.0)
        .unwrap()
        .id;

    let p = state
        .payments
        .create(CreatePayment {
            user_id: 1,
            event_id: Some(paid),
            amount: 2000.0,
            currency: None,
            provider: None,
            description: None,
        })
        .unwrap();
    assert_eq!(p.provider, PaymentProvider::Yookassa);
    assert_eq!(p.status, PaymentStatus::Pending);
    assert!(p.external_id.is_some());

    let p = state
        .payments
        .create(CreatePayment {
            user_id: 1,
            event_id: Some(free),
            amount: 500.0,
            currency: None,
            provider: None,
            description: None,
        })
        .unwrap();
    assert_eq!(p.provider, PaymentProvider::Free);
    assert_eq!(p.status, PaymentStatus::Success);
    assert_eq!(p.amount, 0.0);

    let p = state
        .payments
        .create(CreatePayment {
            user_id: 1,
            event_id: None,
            amount: 300.0,
            currency: None,
            provider: None,
            description: None,
        })
        .unwrap();
    assert_eq!(p.provider, PaymentProvider::Support);
}

#[tokio::test]
async fn non_free_payment_rejects_non_positive_amount() {
    let state = app();
    let event = paid_event(&state, 5);

    let err = state
        .payments
        .create(CreatePayment {
            user_id: 1,
            event_id: Some(event),
            amount: 0.0,
            currency: None,
            provider: None,
            description: None,
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
}

#[tokio::test]
async fn manual_confirmation_marks_bookings_and_is_idempotent() {
    let state = app();
    let (_, booking_id, payment_id, _) =
        booking_with_payment(&state, 1).await;
    assert!(!state.allocation.get_booking(booking_id).unwrap().is_paid);

    let confirmed = state.payments.confirm_manual(payment_id, 99).await.unwrap();
    assert_eq!(confirmed.status, PaymentStatus::Success);
    assert_eq!(confirmed.confirmed_by, Some(99));
    assert!(confirmed.confirmed_at.is_some());
    assert!(state.allocation.get_booking(booking_id).unwrap().is_paid);

    // Повторное подтверждение ничего не меняет
    let again = state.payments.confirm_manual(payment_id, 42).await.unwrap();
    assert_eq!(again.confirmed_by, Some(99));
    assert_eq!(payment_update_count(&state, payment_id), 1);
}

#[tokio::test]
async fn webhook_success_is_idempotent() {
    let state = app();
    let (_, booking_id, payment_id, external_id) =
        booking_with_payment(&state, 1).await;

    let first = state
        .payments
        .apply_webhook(&external_id, PaymentStatus::Success)
        .await
        .unwrap();
    assert_eq!(first.status, PaymentStatus::Success);
    assert!(state.allocation.get_booking(booking_id).unwrap().is_paid);

    // Повторная доставка того же вебхука: состояние и история не меняются
    let second = state
        .payments
        .apply_webhook(&external_id, PaymentStatus::Success)
        .await
        .unwrap();
    assert_eq!(second.status, PaymentStatus::Success);
    assert_eq!(payment_update_count(&state, payment_id), 1);
}

#[tokio::test]
async fn conflicting_webhook_is_rejected_and_state_preserved() {
    let state = app();
    let (_, booking_id, payment_id, external_id) =
        booking_with_payment(&state, 1).await;

    state
        .payments
        .apply_webhook(&external_id, PaymentStatus::Failed)
        .await
        .unwrap();

    let err = state
        .payments
        .apply_webhook(&external_id, PaymentStatus::Success)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
    assert_eq!(
        state.payments.get(payment_id).unwrap().status,
        PaymentStatus::Failed
    );
    assert!(!state.allocation.get_booking(booking_id).unwrap().is_paid);
}

#[tokio::test]
async fn webhook_rejects_unknown_external_id_and_bad_status() {
    let state = app();

    let err = state
        .payments
        .apply_webhook("no-such-id", PaymentStatus::Success)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    let err = state
        .payments
        .apply_webhook("whatever", PaymentStatus::Refunded)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
}

#[tokio::test]
async fn success_webhook_after_refund_is_noop() {
    let state = app();
    let (_, _, payment_id, external_id) =
        booking_with_payment(&state, 1).await;

    state
        .payments
        .apply_webhook(&external_id, PaymentStatus::Success)
        .await
        .unwrap();
    state.payments.refund(payment_id, 99).await.unwrap();

    // Поздний дубль success после возврата согласован с историей
    let p = state
        .payments
        .apply_webhook(&external_id, PaymentStatus::Success)
        .await
        .unwrap();
    assert_eq!(p.status, PaymentStatus::Refunded);
}

#[tokio::test]
async fn refund_unmarks_bookings_unless_another_success_exists() {
    let state = app();
    let (event, booking_id, payment_id, _) =
        booking_with_payment(&state, 1).await;

    state.payments.confirm_manual(payment_id, 99).await.unwrap();
    assert!(state.allocation.get_booking(booking_id).unwrap().is_paid);

    // Второй успешный платёж того же пользователя за то же мероприятие
    let second = state
        .payments
        .create(CreatePayment {
            user_id: 1,
            event_id: Some(event),
            amount: 2000.0,
            currency: None,
            provider: None,
            description: None,
        })
        .unwrap();
    state.payments.confirm_manual(second.id, 99).await.unwrap();

    // Возврат первого не снимает оплату: второй успешный ещё жив
    state.payments.refund(payment_id, 99).await.unwrap();
    assert!(state.allocation.get_booking(booking_id).unwrap().is_paid);

    // Возврат последнего успешного снимает
    state.payments.refund(second.id, 99).await.unwrap();
    assert!(!state.allocation.get_booking(booking_id).unwrap().is_paid);

    // Повторный возврат идемпотентен
    let again = state.payments.refund(second.id, 99).await.unwrap();
    assert_eq!(again.status, PaymentStatus::Refunded);
}

#[tokio::test]
async fn refund_of_pending_or_failed_payment_conflicts() {
    let state = app();
    let (_, _, payment_id, external_id) =
        booking_with_payment(&state, 1).await;

    let err = state.payments.refund(payment_id, 99).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    state
        .payments
        .apply_webhook(&external_id, PaymentStatus::Failed)
        .await
        .unwrap();
    let err = state.payments.refund(payment_id, 99).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    let err = state.payments.confirm_manual(payment_id, 99).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}

#[tokio::test]
async fn deleting_sole_success_payment_unmarks_bookings() {
    let state = app();
    let (_, booking_id, payment_id, _) =
        booking_with_payment(&state, 1).await;

    state.payments.confirm_manual(payment_id, 99).await.unwrap();
    state.payments.delete(payment_id).await.unwrap();

    assert!(!state.allocation.get_booking(booking_id).unwrap().is_paid);
    assert!(matches!(
        state.payments.get(payment_id),
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn payment_list_filters_by_status_and_provider() {
    let state = app();
    let (event, _, payment_id, external_id) =
        booking_with_payment(&state, 1).await;
    state
        .payments
        .apply_webhook(&external_id, PaymentStatus::Success)
        .await
        .unwrap();
    booking_with_payment(&state, 2).await;

    let succeeded = state.payments.list(&PaymentListQuery {
        status: Some(PaymentStatus::Success),
        ..Default::default()
    });
    assert_eq!(succeeded.len(), 1);
    assert_eq!(succeeded[0].id, payment_id);

    let for_event = state.payments.list(&PaymentListQuery {
        event_id: Some(event),
        provider: Some(PaymentProvider::Yookassa),
        ..Default::default()
    });
    assert_eq!(for_event.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_webhook_deliveries_apply_once() {
    let state = app();
    let (_, booking_id, payment_id, external_id) =
        booking_with_payment(&state, 1).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let state = state.clone();
        let external_id = external_id.clone();
        handles.push(tokio::spawn(async move {
            state
                .payments
                .apply_webhook(&external_id, PaymentStatus::Success)
                .await
        }));
    }
    for result in futures::future::join_all(handles).await {
        result.unwrap().unwrap();
    }

    assert_eq!(
        state.payments.get(payment_id).unwrap().status,
        PaymentStatus::Success
    );
    assert!(state.allocation.get_booking(booking_id).unwrap().is_paid);
    assert_eq!(payment_update_count(&state, payment_id), 1);
}
