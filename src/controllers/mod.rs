pub mod events;
pub mod bookings;
pub mod payments;
pub mod audit;

use axum::{http::StatusCode, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::error::EngineError;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(events::routes())
        .merge(bookings::routes())
        .merge(payments::routes())
        .merge(audit::routes())
}

/* ---------- helpers ---------- */

#[derive(Serialize)]
pub struct ApiError {
    pub success: bool,
    pub message: String,
}

pub type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

pub fn to_api_error(status: StatusCode, message: &str) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            success: false,
            message: message.to_string(),
        }),
    )
}

pub fn engine_error(e: EngineError) -> (StatusCode, Json<ApiError>) {
    if matches!(e, EngineError::InvariantViolation(_)) {
        tracing::error!("internal consistency fault: {}", e);
    }
    to_api_error(e.status_code(), &e.to_string())
}
