//! Generation pipeline end to end
//!
//! A client adds a node that asks for content; the actor claims it, the
//! orchestrator drives the executor and the outcome comes back to every
//! client as a document change.

use axum::http::{Method, StatusCode};
use canvas_collab::backend::persistence::AlarmKind;
use canvas_collab::shared::task::{ExecutorResult, TaskStatus, TaskType};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::assert_contains;
use crate::common::{eventually, node_field, test_config_builder, ScriptedExecutor, TestApp};

fn pending(node_type: &str, prompt: &str) -> serde_json::Value {
    json!({
        "type": node_type,
        "position": { "x": 0, "y": 0 },
        "data": { "status": "pending", "prompt": prompt }
    })
}

fn is_terminal(node: &serde_json::Value) -> bool {
    matches!(node_field(node, "status"), Some("completed") | Some("failed"))
}

#[tokio::test]
async fn test_polled_generation_completes_after_pending_polls() {
    let executor = ScriptedExecutor::polling(
        "acme",
        &[TaskType::Image],
        vec![
            ExecutorResult::still_pending(),
            ExecutorResult::still_pending(),
            ExecutorResult::still_pending(),
            ExecutorResult::success_url("https://cdn/cat.png"),
        ],
    );
    let app = TestApp::start(vec![executor.clone()]).await;
    let mut alice = app.client("board").await;
    let mut bob = app.client("board").await;

    alice.put_node("n1", pending("image", "cat"));

    let node = alice.wait_for_node("n1", is_terminal).await;
    assert_eq!(node_field(&node, "status"), Some("completed"));
    assert_eq!(node_field(&node, "src"), Some("https://cdn/cat.png"));
    assert!(node["data"]["taskId"].is_null());

    let seen_by_bob = bob.wait_for_node("n1", is_terminal).await;
    assert_eq!(seen_by_bob, node);

    let tasks = app.tasks("board").await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Completed);
    assert_eq!(tasks[0].retry_count, 0);
    assert_eq!(tasks[0].result_url.as_deref(), Some("https://cdn/cat.png"));
    assert_eq!(executor.poll_calls(), 4);

    // Nothing left to poll: the actor falls back to periodic snapshots
    let actor = alice.actor.clone();
    eventually("snapshot alarm", move || {
        let actor = actor.clone();
        async move {
            let status = actor.status().await.unwrap();
            matches!(status.alarm, Some((AlarmKind::Snapshot, _))).then_some(())
        }
    })
    .await;
}

#[tokio::test]
async fn test_move_during_generation_survives_completion() {
    let executor = ScriptedExecutor::polling(
        "acme",
        &[TaskType::Image],
        vec![
            ExecutorResult::still_pending(),
            ExecutorResult::still_pending(),
            ExecutorResult::success_url("https://cdn/cat.png"),
        ],
    );
    let app = TestApp::start(vec![executor]).await;
    let mut alice = app.client("board").await;
    let mut bob = app.client("board").await;

    alice.put_node("n1", pending("image", "cat"));
    let mut claimed = alice
        .wait_for_node("n1", |node| node_field(node, "status") == Some("generating"))
        .await;

    // Drag from alice's current view; only position.x differs from it
    claimed["position"]["x"] = json!(500);
    alice.put_node("n1", claimed);

    let node = alice.wait_for_node("n1", is_terminal).await;
    assert_eq!(node_field(&node, "status"), Some("completed"));
    assert_eq!(node["position"], json!({ "x": 500, "y": 0 }));

    let seen_by_bob = bob
        .wait_for_node("n1", |node| is_terminal(node) && node["position"]["x"] == json!(500))
        .await;
    assert_eq!(seen_by_bob, node);
}

#[tokio::test]
async fn test_repeated_errors_fail_task_and_node() {
    let executor = ScriptedExecutor::polling(
        "acme",
        &[TaskType::Image],
        vec![
            ExecutorResult::transient("upstream 503"),
            ExecutorResult::transient("upstream 503"),
            ExecutorResult::transient("upstream 503"),
        ],
    );
    let app = TestApp::start(vec![executor.clone()]).await;
    let mut alice = app.client("board").await;

    alice.put_node("n1", pending("image", "cat"));

    let node = alice.wait_for_node("n1", is_terminal).await;
    assert_eq!(node_field(&node, "status"), Some("failed"));
    assert_contains!(node_field(&node, "error").unwrap(), "max retries");

    let tasks = app.tasks("board").await;
    assert_eq!(tasks[0].status, TaskStatus::Failed);
    assert_contains!(tasks[0].error.as_deref().unwrap(), "upstream 503");
    assert_eq!(executor.poll_calls(), 3);
}

#[tokio::test]
async fn test_missing_executor_fails_node_without_task() {
    let image_only = ScriptedExecutor::polling("acme", &[TaskType::Image], vec![]);
    let app = TestApp::start(vec![image_only]).await;
    let mut alice = app.client("board").await;

    alice.put_node("v1", pending("video", "a running cat"));

    let node = alice.wait_for_node("v1", is_terminal).await;
    assert_eq!(node_field(&node, "status"), Some("failed"));
    assert_contains!(node_field(&node, "error").unwrap(), "no executor");
    assert!(node["data"]["taskId"].is_null());
    assert!(app.tasks("board").await.is_empty());
}

#[tokio::test]
async fn test_rejected_submission_fails_node() {
    let executor = ScriptedExecutor::rejecting("acme", &[TaskType::Image], "prompt refused");
    let app = TestApp::start(vec![executor]).await;
    let mut alice = app.client("board").await;

    alice.put_node("n1", pending("image", "cat"));

    let node = alice.wait_for_node("n1", is_terminal).await;
    assert_eq!(node_field(&node, "status"), Some("failed"));
    assert_contains!(node_field(&node, "error").unwrap(), "prompt refused");
}

#[tokio::test]
async fn test_completed_image_gets_description() {
    let executor = ScriptedExecutor::sync(
        "instant",
        &[TaskType::Image, TaskType::Description],
        |params| {
            if params.get("src").is_some() {
                ExecutorResult::success_data(json!({ "description": "A black cat" }))
            } else {
                ExecutorResult::success_url("https://cdn/cat.png")
            }
        },
    );
    let config = test_config_builder()
        .description_retry_limit(3)
        .build()
        .unwrap();
    let app = TestApp::start_with(config, vec![executor.clone()]).await;
    let mut alice = app.client("board").await;

    alice.put_node("n1", pending("image", "cat"));

    let node = alice
        .wait_for_node("n1", |n| node_field(n, "description").is_some())
        .await;
    assert_eq!(node_field(&node, "description"), Some("A black cat"));
    assert_eq!(node_field(&node, "status"), Some("completed"));
    assert_eq!(node_field(&node, "src"), Some("https://cdn/cat.png"));

    let tasks = app.tasks("board").await;
    let mut types: Vec<_> = tasks.iter().map(|t| t.task_type).collect();
    types.sort_by_key(|t| t.as_str());
    assert_eq!(types, vec![TaskType::Description, TaskType::Image]);
    assert_eq!(executor.submit_calls(), 2);
}

#[tokio::test]
async fn test_description_failures_stop_at_retry_limit() {
    let executor = ScriptedExecutor::sync(
        "instant",
        &[TaskType::Image, TaskType::Description],
        |params| {
            if params.get("src").is_some() {
                ExecutorResult::failed("vision model offline")
            } else {
                ExecutorResult::success_url("https://cdn/cat.png")
            }
        },
    );
    let config = test_config_builder()
        .description_retry_limit(2)
        .build()
        .unwrap();
    let app = TestApp::start_with(config, vec![executor.clone()]).await;
    let mut alice = app.client("board").await;

    alice.put_node("n1", pending("image", "cat"));

    let node = alice
        .wait_for_node("n1", |n| n["data"]["descriptionRetries"] == json!(2))
        .await;
    // The generated image stands; only the description gave up
    assert_eq!(node_field(&node, "status"), Some("completed"));
    assert_eq!(node_field(&node, "src"), Some("https://cdn/cat.png"));
    assert_contains!(node_field(&node, "descriptionError").unwrap(), "vision model offline");

    alice.actor.flush().await.unwrap();
    assert_eq!(executor.submit_calls(), 3);
}

#[tokio::test]
async fn test_webhook_completion_reaches_clients() {
    let executor = ScriptedExecutor::webhook("hooky", &[TaskType::Video]);
    let app = TestApp::start(vec![executor]).await;
    let mut alice = app.client("board").await;

    alice.put_node("v1", pending("video", "a running cat"));
    let claimed = alice
        .wait_for_node("v1", |n| node_field(n, "taskId").is_some())
        .await;
    assert_eq!(node_field(&claimed, "status"), Some("generating"));

    let (status, body) = app
        .request(
            Method::POST,
            "/api/webhooks/hooky",
            Some(json!({ "id": "job-1", "status": "done", "url": "https://cdn/cat.mp4" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");

    let node = alice.wait_for_node("v1", is_terminal).await;
    assert_eq!(node_field(&node, "src"), Some("https://cdn/cat.mp4"));
}

#[tokio::test]
async fn test_cancel_marks_node_failed() {
    let executor = ScriptedExecutor::polling("acme", &[TaskType::Image], vec![]);
    let app = TestApp::start(vec![executor]).await;
    let mut alice = app.client("board").await;

    alice.put_node("n1", pending("image", "cat"));
    let claimed = alice
        .wait_for_node("n1", |n| node_field(n, "taskId").is_some())
        .await;
    let task_id = node_field(&claimed, "taskId").unwrap().to_string();

    let (status, body) = app
        .request(Method::POST, &format!("/api/tasks/{}/cancel", task_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"], "cancelled");

    let node = alice.wait_for_node("n1", is_terminal).await;
    assert_eq!(node_field(&node, "status"), Some("failed"));
    assert_eq!(node_field(&node, "error"), Some("cancelled"));
}
