//! Model set read/write endpoints

use crate::error::{ApiError, ApiResult};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use livedb_common::db::{DisplayValueUpdate, ImportItem, LiveDbValue, RawValueUpdate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct RawValuesRequest {
    pub updates: Vec<RawValueUpdate>,
}

#[derive(Debug, Deserialize)]
pub struct DisplayValuesRequest {
    pub updates: Vec<DisplayValueUpdate>,
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub items: Vec<ImportItem>,
}

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub new_keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct PrioritizeRequest {
    pub keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ValuesQuery {
    #[serde(default)]
    pub offset: usize,
    pub limit: Option<usize>,
    /// Comma-separated key filter
    pub keys: Option<String>,
}

/// One chunk; an empty `items` list marks the end of the sequence
#[derive(Debug, Serialize)]
pub struct ValuesChunk {
    pub model_set: String,
    pub offset: usize,
    pub items: Vec<LiveDbValue>,
}

/// POST /api/model-sets/:model_set/raw-values
pub async fn queue_raw_values(
    State(state): State<AppState>,
    Path(model_set): Path<String>,
    Json(request): Json<RawValuesRequest>,
) -> ApiResult<Json<Value>> {
    let queued = state
        .livedb
        .queue_raw_updates(&model_set, request.updates)
        .await?;
    Ok(Json(json!({ "queued": queued })))
}

/// POST /api/model-sets/:model_set/display-values
pub async fn update_display_values(
    State(state): State<AppState>,
    Path(model_set): Path<String>,
    Json(request): Json<DisplayValuesRequest>,
) -> ApiResult<Json<Value>> {
    let updated = state
        .livedb
        .update_display_values(&model_set, request.updates)
        .await?;
    Ok(Json(json!({ "updated": updated })))
}

/// POST /api/model-sets/:model_set/import
pub async fn import_items(
    State(state): State<AppState>,
    Path(model_set): Path<String>,
    Json(request): Json<ImportRequest>,
) -> ApiResult<Json<ImportResponse>> {
    let new_keys = state.livedb.import_items(&model_set, request.items).await?;
    Ok(Json(ImportResponse { new_keys }))
}

/// GET /api/model-sets/:model_set/values?offset=&limit=&keys=a,b
pub async fn read_values(
    State(state): State<AppState>,
    Path(model_set): Path<String>,
    Query(query): Query<ValuesQuery>,
) -> ApiResult<Json<ValuesChunk>> {
    if query.limit == Some(0) {
        return Err(ApiError::BadRequest("limit must be > 0".to_string()));
    }

    let keys = query.keys.as_deref().map(parse_key_list);
    let items = state
        .livedb
        .read_chunk(&model_set, keys.as_deref(), query.offset, query.limit)
        .await?;

    Ok(Json(ValuesChunk {
        model_set,
        offset: query.offset,
        items,
    }))
}

/// POST /api/model-sets/:model_set/prioritize
pub async fn prioritize(
    State(state): State<AppState>,
    Path(model_set): Path<String>,
    Json(request): Json<PrioritizeRequest>,
) -> ApiResult<Json<Value>> {
    state.livedb.prioritize(&model_set, request.keys)?;
    Ok(Json(json!({ "ok": true })))
}

/// Split `a,b,,c` into keys, dropping empty segments
fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_list() {
        assert_eq!(parse_key_list("a, b,,c"), vec!["a", "b", "c"]);
        assert!(parse_key_list("").is_empty());
    }
}
