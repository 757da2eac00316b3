use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::controllers::{engine_error, to_api_error, ApiResult};
use crate::error::EngineError;
use crate::models::{PaymentProvider, PaymentStatus};
use crate::services::payment::{CreatePayment, PaymentListQuery};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/payments", post(create_payment))
        .route("/payments", get(list_payments))
        .route("/payments/{id}", get(get_payment))
        .route("/payments/{id}", delete(delete_payment))
        .route("/payments/{id}/confirm", post(confirm_payment))
        .route("/payments/{id}/refund", post(refund_payment))
        .route("/webhook/payment", post(payment_webhook))
}

// POST /api/payments
#[derive(Debug, Deserialize, Validate)]
struct CreatePaymentRequest {
    pub user_id: i64,
    pub event_id: Option<i64>,
    // Сумма 0 допустима только для free-платежей, движок проверяет сам
    #[validate(range(min = 0.0, message = "amount не может быть отрицательной"))]
    pub amount: f64,
    pub currency: Option<String>,
    pub provider: Option<PaymentProvider>,
    pub description: Option<String>,
}

async fn create_payment(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreatePaymentRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()
        .map_err(|e| to_api_error(StatusCode::BAD_REQUEST, &e.to_string()))?;
    let payment = state
        .payments
        .create(CreatePayment {
            user_id: req.user_id,
            event_id: req.event_id,
            amount: req.amount,
            currency: req.currency,
            provider: req.provider,
            description: req.description,
        })
        .map_err(engine_error)?;
    Ok((StatusCode::CREATED, Json(payment)))
}

// GET /api/payments
#[derive(Debug, Deserialize)]
struct PaymentsQuery {
    event_id: Option<i64>,
    provider: Option<PaymentProvider>,
    status: Option<PaymentStatus>,
    sort_by: Option<String>,
    order: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_payments(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaymentsQuery>,
) -> ApiResult<impl IntoResponse> {
    let query = PaymentListQuery {
        event_id: params.event_id,
        provider: params.provider,
        status: params.status,
        sort_by: params.sort_by,
        order: params.order,
        limit: params.limit,
        offset: params.offset,
    };
    Ok(Json(state.payments.list(&query)))
}

async fn get_payment(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let payment = state.payments.get(payment_id).map_err(engine_error)?;
    Ok(Json(payment))
}

// POST /api/payments/{id}/confirm
#[derive(Debug, Deserialize)]
struct ConfirmPaymentRequest {
    pub operator_id: i64,
}

async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<i64>,
    Json(req): Json<ConfirmPaymentRequest>,
) -> ApiResult<impl IntoResponse> {
    let payment = state
        .payments
        .confirm_manual(payment_id, req.operator_id)
        .await
        .map_err(engine_error)?;
    Ok(Json(payment))
}

async fn refund_payment(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<i64>,
    Json(req): Json<ConfirmPaymentRequest>,
) -> ApiResult<impl IntoResponse> {
    let payment = state
        .payments
        .refund(payment_id, req.operator_id)
        .await
        .map_err(engine_error)?;
    Ok(Json(payment))
}

async fn delete_payment(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state
        .payments
        .delete(payment_id)
        .await
        .map_err(engine_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/webhook/payment
///
/// Доставка от провайдера at-least-once и возможно не по порядку.
/// Дубликаты уже применённого статуса подтверждаем как received,
/// неизвестный external_id отдаём 404 (провайдер повторит доставку),
/// противоречащий переход — 409 без изменения состояния.
async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    // Поддерживаем плоский формат {"external_id", "status"} и формат
    // колбэка Юкассы {"object": {"id", "status"}}
    let external_id = payload["external_id"]
        .as_str()
        .or_else(|| payload["object"]["id"].as_str())
        .unwrap_or_default()
        .to_string();
    let raw_status = payload["status"]
        .as_str()
        .or_else(|| payload["object"]["status"].as_str())
        .unwrap_or_default()
        .to_string();

    tracing::info!(%external_id, status = %raw_status, "payment webhook received");

    let status = match raw_status.as_str() {
        "success" | "succeeded" => PaymentStatus::Success,
        "failed" | "canceled" | "cancelled" => PaymentStatus::Failed,
        other => {
            tracing::debug!(%external_id, status = other, "webhook status ignored");
            return (StatusCode::OK, Json(json!({ "received": true })));
        }
    };
    if external_id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "received": false, "message": "external_id отсутствует" })),
        );
    }

    match state.payments.apply_webhook(&external_id, status).await {
        Ok(_) => (StatusCode::OK, Json(json!({ "received": true }))),
        Err(e @ EngineError::NotFound(_)) => {
            tracing::warn!(%external_id, "webhook for unknown payment: {}", e);
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "received": false, "message": e.to_string() })),
            )
        }
        Err(e) => {
            let status_code = e.status_code();
            (
                status_code,
                Json(json!({ "received": false, "message": e.to_string() })),
            )
        }
    }
}
