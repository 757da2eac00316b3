use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::controllers::{engine_error, to_api_error, ApiResult};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events", post(create_event))
        .route("/events/{id}", get(get_event))
        .route("/events/{id}", patch(update_event))
        .route("/events/{id}", delete(delete_event))
        .route("/events/{id}/availability", get(get_availability))
}

// POST /api/events
#[derive(Debug, Deserialize, Validate)]
struct CreateEventRequest {
    #[validate(length(min = 1, message = "title не может быть пустым"))]
    pub title: String,
    pub description: Option<String>,
    #[validate(range(min = 0, message = "max_participants не может быть отрицательным"))]
    pub max_participants: i64,
    #[serde(default)]
    pub is_paid: bool,
    #[serde(default)]
    pub price: f64,
}

async fn create_event(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateEventRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()
        .map_err(|e| to_api_error(StatusCode::BAD_REQUEST, &e.to_string()))?;
    let event = state
        .create_event(
            req.title,
            req.description,
            req.max_participants,
            req.is_paid,
            req.price,
        )
        .map_err(engine_error)?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn get_event(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let event = state.get_event(event_id).map_err(engine_error)?;
    Ok(Json(event))
}

// PATCH /api/events/{id}
#[derive(Debug, Deserialize)]
struct UpdateEventRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub max_participants: Option<i64>,
    pub is_paid: Option<bool>,
    pub price: Option<f64>,
}

async fn update_event(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<i64>,
    Json(req): Json<UpdateEventRequest>,
) -> ApiResult<impl IntoResponse> {
    let event = state
        .update_event(
            event_id,
            req.title,
            req.description,
            req.max_participants,
            req.is_paid,
            req.price,
        )
        .map_err(engine_error)?;
    Ok(Json(event))
}

// DELETE /api/events/{id} - с явной каскадной зачисткой броней,
// листа ожидания и платежей мероприятия
async fn delete_event(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state.delete_event(event_id).await.map_err(engine_error)?;
    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Мероприятие и связанные данные удалены" })),
    ))
}

// GET /api/events/{id}/availability
async fn get_availability(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let (capacity, committed) = state.ledger.availability(event_id).map_err(engine_error)?;
    Ok(Json(json!({
        "event_id": event_id,
        "capacity": capacity,
        "committed": committed,
        "free": capacity - committed,
    })))
}
