use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use crate::services::audit::AuditFilter;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/audit", get(list_audit))
}

// GET /api/audit - только для административного слоя
async fn list_audit(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<AuditFilter>,
) -> impl IntoResponse {
    Json(state.audit.list(&filter))
}
