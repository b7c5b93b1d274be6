//! Internal control endpoints

use axum::http::{Method, StatusCode};
use canvas_collab::backend::crdt::CanvasDocument;
use canvas_collab::backend::persistence::AlarmKind;
use canvas_collab::shared::task::{ExecutorResult, TaskType};
use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::json;
use uuid::Uuid;

use crate::common::{eventually, node_field, ScriptedExecutor, TestApp};

#[tokio::test]
async fn test_trigger_polling_arms_document_alarm() {
    let app = TestApp::start(vec![]).await;

    let (status, body) = app
        .request(Method::POST, "/internal/documents/board/poll", None)
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, json!({ "documentId": "board", "pollInMs": 2000 }));

    let actor = app.state.registry.get("board").await.expect("actor spawned");
    let status = actor.status().await.unwrap();
    let (kind, at) = status.alarm.expect("alarm armed");
    assert_eq!(kind, AlarmKind::TaskPolling);
    assert!(at > Utc::now());
}

#[tokio::test]
async fn test_broadcast_requires_finished_task() {
    let executor = ScriptedExecutor::polling("acme", &[TaskType::Image], vec![]);
    let app = TestApp::start(vec![executor]).await;
    let (_, created) = app
        .request(
            Method::POST,
            "/api/tasks",
            Some(json!({ "document_id": "board", "node_id": "n1", "task_type": "image", "params": { "prompt": "cat" } })),
        )
        .await;
    let uri = format!("/internal/tasks/{}/broadcast", created["id"].as_str().unwrap());

    let (status, _) = app.request(Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .request(
            Method::POST,
            &format!("/internal/tasks/{}/broadcast", Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_broadcast_leaves_settled_node_alone() {
    let executor = ScriptedExecutor::sync("instant", &[TaskType::Image], |_| {
        ExecutorResult::success_url("https://cdn/cat.png")
    });
    let app = TestApp::start(vec![executor]).await;
    let mut alice = app.client("board").await;

    let (_, created) = app
        .request(
            Method::POST,
            "/api/tasks",
            Some(json!({ "document_id": "board", "node_id": "n1", "task_type": "image", "params": { "prompt": "cat" } })),
        )
        .await;
    let task_id = created["id"].as_str().unwrap().to_string();

    // Wait for the outcome to reach the ledger
    let actor = alice.actor.clone();
    let id = task_id.clone();
    eventually("ledger entry", move || {
        let actor = actor.clone();
        let id = id.clone();
        async move {
            let snapshot = actor.snapshot().await.unwrap();
            CanvasDocument::from_snapshot(&snapshot).unwrap().task_entry(&id)
        }
    })
    .await;

    // A node added after the task finished, with no marker of its own
    alice.put_node(
        "n1",
        json!({ "type": "image", "position": { "x": 0, "y": 0 }, "data": { "status": "fin" } }),
    );
    alice.actor.flush().await.unwrap();

    let (status, body) = app
        .request(Method::POST, &format!("/internal/tasks/{}/broadcast", task_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");

    // Ledger already holds "completed" for this task, so the node is left alone
    alice.actor.flush().await.unwrap();
    alice.drain();
    let node = alice.node("n1").unwrap();
    assert_eq!(node_field(&node, "status"), Some("fin"));
    let ledger = alice.replica().task_entry(&task_id).expect("ledger entry");
    assert_eq!(ledger["status"], "completed");
}

#[tokio::test]
async fn test_invalid_document_id_is_rejected() {
    let app = TestApp::start(vec![]).await;
    let long_id = "d".repeat(300);

    let (status, body) = app
        .request(Method::POST, &format!("/internal/documents/{}/poll", long_id), None)
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);
}
