//! livedb-server library
//!
//! Live key/value store service: durable raw value queue, batched apply
//! through a task executor, bulk import and chunked reads, exposed over HTTP
//! and SSE.

use axum::Router;

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod services;

use services::LiveDb;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub livedb: LiveDb,
}

impl AppState {
    pub fn new(livedb: LiveDb) -> Self {
        Self { livedb }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    let model_sets = Router::new()
        .route(
            "/api/model-sets/:model_set/raw-values",
            post(api::queue_raw_values),
        )
        .route(
            "/api/model-sets/:model_set/display-values",
            post(api::update_display_values),
        )
        .route("/api/model-sets/:model_set/import", post(api::import_items))
        .route("/api/model-sets/:model_set/values", get(api::read_values))
        .route(
            "/api/model-sets/:model_set/prioritize",
            post(api::prioritize),
        );

    Router::new()
        .merge(model_sets)
        .route("/api/status", get(api::get_status))
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
