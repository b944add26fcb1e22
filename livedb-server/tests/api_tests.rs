//! Integration tests for livedb-server HTTP endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use livedb_common::db::init_memory_database;
use livedb_server::config::LiveDbConfig;
use livedb_server::db::queue;
use livedb_server::services::{LiveDb, WorkerPoolExecutor};
use livedb_server::{build_router, AppState};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower::util::ServiceExt; // for `oneshot` method

/// Test helper: app over an in-memory database, queue controller not started
async fn setup_app() -> (SqlitePool, axum::Router) {
    let pool = init_memory_database().await.unwrap();
    let executor = Arc::new(WorkerPoolExecutor::new(pool.clone(), 2));
    let livedb = LiveDb::new(pool.clone(), LiveDbConfig::default(), executor);
    (pool, build_router(AppState::new(livedb)))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_pool, app) = setup_app().await;

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "livedb-server");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_import_then_read_values() {
    let (_pool, app) = setup_app().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/model-sets/siteA/import",
            json!({ "items": [
                { "key": "K1", "data_type": 0, "raw_value": "5" },
                { "key": "K2", "data_type": 1, "display_value": "hello" },
                { "key": "K1", "data_type": 0, "raw_value": "6" }
            ]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["new_keys"], json!(["K2", "K1"]));

    let response = app
        .clone()
        .oneshot(get("/api/model-sets/siteA/values?offset=0&limit=10"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["model_set"], "siteA");
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["key"], "K2");
    assert_eq!(items[0]["data_type"], 1);
    assert_eq!(items[1]["raw_value"], "6");

    let response = app
        .oneshot(get("/api/model-sets/siteA/values?keys=K1,missing"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["items"][0]["key"], "K1");
}

#[tokio::test]
async fn test_raw_values_are_queued() {
    let (pool, app) = setup_app().await;

    let response = app
        .oneshot(post_json(
            "/api/model-sets/siteA/raw-values",
            json!({ "updates": [
                { "key": "K1", "raw_value": "1" },
                { "key": "K2", "raw_value": null }
            ]}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["queued"], 2);
    assert_eq!(queue::pending_count(&pool).await.unwrap(), 2);
}

#[tokio::test]
async fn test_display_values_update() {
    let (_pool, app) = setup_app().await;

    app.clone()
        .oneshot(post_json(
            "/api/model-sets/siteA/import",
            json!({ "items": [{ "key": "K1", "data_type": 0 }] }),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(post_json(
            "/api/model-sets/siteA/display-values",
            json!({ "updates": [{ "key": "K1", "display_value": "ON" }] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["updated"], 1);
}

#[tokio::test]
async fn test_prioritize_acknowledges() {
    let (_pool, app) = setup_app().await;

    let response = app
        .oneshot(post_json(
            "/api/model-sets/siteA/prioritize",
            json!({ "keys": ["K1", "K2"] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn test_status_endpoint() {
    let (_pool, app) = setup_app().await;

    let response = app.oneshot(get("/api/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["raw_value_queue_running"], false);
    assert_eq!(body["raw_value_queue_size"], 0);
    assert_eq!(body["raw_value_processed_total"], 0);
    assert!(body["raw_value_last_error"].is_null());
}

#[tokio::test]
async fn test_zero_limit_is_bad_request() {
    let (_pool, app) = setup_app().await;

    let response = app
        .oneshot(get("/api/model-sets/siteA/values?limit=0"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_oversized_limit_is_bad_request() {
    let (_pool, app) = setup_app().await;

    app.clone()
        .oneshot(post_json(
            "/api/model-sets/siteA/import",
            json!({ "items": [{ "key": "K1", "data_type": 0 }] }),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(get("/api/model-sets/siteA/values?limit=18446744073709551615"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_data_type_rejected() {
    let (_pool, app) = setup_app().await;

    let response = app
        .oneshot(post_json(
            "/api/model-sets/siteA/import",
            json!({ "items": [{ "key": "K1", "data_type": 42 }] }),
        ))
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}
