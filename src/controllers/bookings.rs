use axum::{
    extract::{Path, Query, State},
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
use crate::services::allocation::{BookingListQuery, ReserveOutcome};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking))
        .route("/bookings", get(list_bookings))
        .route("/bookings/{id}", get(get_booking))
        .route("/bookings/{id}", patch(update_booking))
        .route("/bookings/{id}", delete(cancel_booking))
        .route("/bookings/{id}/payment", patch(toggle_payment))
        .route("/bookings/{id}/attendance", patch(toggle_attendance))
        .route("/waitlist", get(list_waitlist))
        .route("/waitlist/{id}", delete(remove_waitlist_entry))
        .route("/waitlist/{id}/confirm", post(confirm_waitlist))
}

/* ---------- BOOKINGS ---------- */

// POST /api/bookings
#[derive(Debug, Deserialize, Validate)]
struct CreateBookingRequest {
    pub event_id: i64,
    pub user_id: i64,
    #[validate(range(min = 1, message = "group_size должен быть >= 1"))]
    pub group_size: i64,
    pub group_names: Option<Vec<String>>,
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateBookingRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()
        .map_err(|e| to_api_error(StatusCode::BAD_REQUEST, &e.to_string()))?;

    let outcome = state
        .allocation
        .reserve(req.event_id, req.user_id, req.group_size, req.group_names)
        .await
        .map_err(engine_error)?;

    // Лист ожидания - не ошибка: вызывающий ветвится по полю status
    match outcome {
        ReserveOutcome::Booked(booking) => Ok((
            StatusCode::CREATED,
            Json(json!({ "status": "booked", "booking": booking })),
        )),
        ReserveOutcome::Waitlisted(entry) => Ok((
            StatusCode::OK,
            Json(json!({ "status": "waitlisted", "entry": entry })),
        )),
    }
}

// GET /api/bookings?event_id=...
#[derive(Debug, Deserialize)]
struct BookingsQuery {
    event_id: i64,
    sort_by: Option<String>,
    order: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_bookings(
    State(state): State<Arc<AppState>>,
    Query(params): Query<BookingsQuery>,
) -> ApiResult<impl IntoResponse> {
    if params.event_id <= 0 {
        return Err(to_api_error(
            StatusCode::BAD_REQUEST,
            "event_id должен быть > 0",
        ));
    }
    let query = BookingListQuery {
        sort_by: params.sort_by,
        order: params.order,
        limit: params.limit,
        offset: params.offset,
    };
    Ok(Json(state.allocation.list_bookings(params.event_id, &query)))
}

async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let booking = state
        .allocation
        .get_booking(booking_id)
        .map_err(engine_error)?;
    Ok(Json(booking))
}

// PATCH /api/bookings/{id}
#[derive(Debug, Deserialize, Validate)]
struct UpdateBookingRequest {
    #[validate(range(min = 1, message = "group_size должен быть >= 1"))]
    pub group_size: Option<i64>,
    pub group_names: Option<Vec<String>>,
}

async fn update_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<i64>,
    Json(req): Json<UpdateBookingRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()
        .map_err(|e| to_api_error(StatusCode::BAD_REQUEST, &e.to_string()))?;
    let booking = state
        .allocation
        .update_booking(booking_id, req.group_size, req.group_names)
        .await
        .map_err(engine_error)?;
    Ok(Json(booking))
}

// DELETE /api/bookings/{id}
async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let promoted = state
        .allocation
        .cancel(booking_id)
        .await
        .map_err(engine_error)?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "message": "Бронь успешно отменена",
            "promoted": promoted,
        })),
    ))
}

async fn toggle_payment(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let booking = state
        .allocation
        .toggle_payment(booking_id)
        .map_err(engine_error)?;
    Ok(Json(booking))
}

async fn toggle_attendance(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let booking = state
        .allocation
        .toggle_attendance(booking_id)
        .map_err(engine_error)?;
    Ok(Json(booking))
}

/* ---------- WAITLIST ---------- */

#[derive(Debug, Deserialize)]
struct WaitlistQueryParams {
    event_id: i64,
}

async fn list_waitlist(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WaitlistQueryParams>,
) -> ApiResult<impl IntoResponse> {
    if params.event_id <= 0 {
        return Err(to_api_error(
            StatusCode::BAD_REQUEST,
            "event_id должен быть > 0",
        ));
    }
    Ok(Json(state.allocation.list_waitlist(params.event_id)))
}

async fn remove_waitlist_entry(
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state
        .allocation
        .remove_waitlist_entry(entry_id)
        .await
        .map_err(engine_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// POST /api/waitlist/{id}/confirm - пользователь подтверждает место,
// когда автопродвижение выключено
async fn confirm_waitlist(
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let booking = state
        .allocation
        .confirm_waitlist(entry_id)
        .await
        .map_err(engine_error)?;
    Ok((StatusCode::CREATED, Json(booking)))
}
