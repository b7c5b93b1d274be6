//! Task and webhook endpoints

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use canvas_collab::shared::task::{ExecutorResult, TaskType};
use pretty_assertions::assert_eq;
use serde_json::json;
use uuid::Uuid;

use crate::assert_contains;
use crate::common::{ScriptedExecutor, TestApp};

fn submit_body(task_type: &str) -> serde_json::Value {
    json!({
        "document_id": "board",
        "node_id": "n1",
        "task_type": task_type,
        "params": { "prompt": "cat" }
    })
}

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::start(vec![]).await;

    let (status, body) = app.request(Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let app = TestApp::start(vec![]).await;

    let (status, body) = app.request(Method::GET, "/nope", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 404);
}

#[tokio::test]
async fn test_submit_sync_task_then_fetch_it() {
    let executor = ScriptedExecutor::sync("instant", &[TaskType::Image], |_| {
        ExecutorResult::success_url("https://cdn/cat.png")
    });
    let app = TestApp::start(vec![executor]).await;

    let (status, created) = app
        .request(Method::POST, "/api/tasks", Some(submit_body("image")))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "completed");
    assert_eq!(created["provider"], "instant");
    assert_eq!(created["result_url"], "https://cdn/cat.png");

    let uri = format!("/api/tasks/{}", created["id"].as_str().unwrap());
    let (status, fetched) = app.request(Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], created["id"]);
    assert_eq!(fetched["status"], "completed");
    assert_eq!(fetched["result_url"], "https://cdn/cat.png");
    assert!(fetched["completed_at"].is_string());
}

#[tokio::test]
async fn test_submit_polled_task_is_generating() {
    let executor = ScriptedExecutor::polling("acme", &[TaskType::Video], vec![]);
    let app = TestApp::start(vec![executor]).await;

    let (status, created) = app
        .request(Method::POST, "/api/tasks", Some(submit_body("video")))
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "generating");
    assert_eq!(created["external_ref"], "job-1");
    assert_eq!(created["retry_count"], 0);
    assert!(created["next_poll_at"].is_string());
}

#[tokio::test]
async fn test_submit_without_executor_is_unprocessable() {
    let app = TestApp::start(vec![]).await;

    let (status, body) = app
        .request(Method::POST, "/api/tasks", Some(submit_body("image")))
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_contains!(body["error"].as_str().unwrap(), "no executor");
    assert!(app.tasks("board").await.is_empty());
}

#[tokio::test]
async fn test_submit_rejected_by_provider_is_bad_gateway() {
    let executor = ScriptedExecutor::rejecting("acme", &[TaskType::Image], "prompt refused");
    let app = TestApp::start(vec![executor]).await;

    let (status, body) = app
        .request(Method::POST, "/api/tasks", Some(submit_body("image")))
        .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_contains!(body["error"].as_str().unwrap(), "prompt refused");
}

#[tokio::test]
async fn test_submit_validates_body() {
    let executor = ScriptedExecutor::polling("acme", &[TaskType::Image], vec![]);
    let app = TestApp::start(vec![executor]).await;

    let mut blank_document = submit_body("image");
    blank_document["document_id"] = json!("  ");
    let (status, _) = app.request(Method::POST, "/api/tasks", Some(blank_document)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request(Method::POST, "/api/tasks", Some(submit_body("hologram")))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let malformed = Request::builder()
        .method(Method::POST)
        .uri("/api/tasks")
        .header("content-type", "application/json")
        .body(Body::from("{ not json"))
        .unwrap();
    let (status, body) = app.send(malformed).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn test_get_unknown_task_is_404() {
    let app = TestApp::start(vec![]).await;

    let (status, body) = app
        .request(Method::GET, &format!("/api/tasks/{}", Uuid::new_v4()), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_contains!(body["error"].as_str().unwrap(), "not found");

    let (status, _) = app.request(Method::GET, "/api/tasks/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cancel_is_final() {
    let executor = ScriptedExecutor::polling("acme", &[TaskType::Image], vec![]);
    let app = TestApp::start(vec![executor]).await;
    let (_, created) = app
        .request(Method::POST, "/api/tasks", Some(submit_body("image")))
        .await;
    let uri = format!("/api/tasks/{}/cancel", created["id"].as_str().unwrap());

    let (status, cancelled) = app.request(Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "failed");
    assert_eq!(cancelled["error"], "cancelled");

    let (status, body) = app.request(Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_contains!(body["error"].as_str().unwrap(), "already failed");
}

#[tokio::test]
async fn test_webhook_resolves_task_once() {
    let executor = ScriptedExecutor::webhook("hooky", &[TaskType::Video]);
    let app = TestApp::start(vec![executor]).await;
    let (_, created) = app
        .request(Method::POST, "/api/tasks", Some(submit_body("video")))
        .await;
    assert_eq!(created["status"], "generating");

    let callback = json!({ "id": "job-1", "status": "done", "url": "https://cdn/cat.mp4" });
    let (status, done) = app
        .request(Method::POST, "/api/webhooks/hooky", Some(callback))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["id"], created["id"]);
    assert_eq!(done["status"], "completed");
    assert_eq!(done["result_url"], "https://cdn/cat.mp4");

    // A late failure report does not reopen the task
    let late = json!({ "id": "job-1", "status": "error", "error": "boom" });
    let (status, unchanged) = app.request(Method::POST, "/api/webhooks/hooky", Some(late)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(unchanged["status"], "completed");
}

#[tokio::test]
async fn test_webhook_errors() {
    let executor = ScriptedExecutor::webhook("hooky", &[TaskType::Video]);
    let app = TestApp::start(vec![executor]).await;

    let (status, _) = app
        .request(Method::POST, "/api/webhooks/unknown", Some(json!({ "id": "job-1" })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/webhooks/hooky",
            Some(json!({ "id": "job-404", "status": "done" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .request(Method::POST, "/api/webhooks/hooky", Some(json!({ "status": "done" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
