//! Queue status endpoint

use crate::AppState;
use axum::{extract::State, Json};
use livedb_common::StatusRecord;

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusRecord> {
    Json(state.livedb.status())
}
