//! Document sync between collaborators
//!
//! Clients talk to the document actor directly through their outbound
//! channels, which is exactly what the WebSocket handler does per socket.

use canvas_collab::shared::task::{ExecutorResult, TaskStatus, TaskType};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::common::{eventually, node_field, ScriptedExecutor, TestApp};

fn pending_image(prompt: &str) -> serde_json::Value {
    json!({
        "type": "image",
        "position": { "x": 10, "y": 20 },
        "data": { "status": "pending", "prompt": prompt }
    })
}

#[tokio::test]
async fn test_unseen_document_starts_empty() {
    let app = TestApp::start(vec![]).await;

    let client = app.client("fresh-doc").await;

    assert!(client.replica().nodes().is_empty());
    assert!(app.tasks("fresh-doc").await.is_empty());
    let status = client.actor.status().await.unwrap();
    assert!(status.ready);
    assert_eq!(status.connections, 1);
}

#[tokio::test]
async fn test_edit_reaches_other_clients_and_creates_one_task() {
    // Never finishes, so the node stays claimed for the whole test
    let executor = ScriptedExecutor::polling("acme", &[TaskType::Image], vec![]);
    let app = TestApp::start(vec![executor.clone()]).await;

    let mut alice = app.client("board").await;
    let mut bob = app.client("board").await;

    alice.put_node("n1", pending_image("cat"));

    let app_ref = &app;
    let tasks = eventually("one task", move || async move {
        let tasks = app_ref.tasks("board").await;
        (!tasks.is_empty()).then_some(tasks)
    })
    .await;
    alice.actor.flush().await.unwrap();

    // Bob gets the relayed edit plus the claim; Alice only the claim
    assert_eq!(bob.drain(), 2);
    assert_eq!(alice.drain(), 1);

    assert_eq!(tasks.len(), 1);
    let task = &tasks[0];
    assert_eq!(task.task_type, TaskType::Image);
    assert_eq!(task.status, TaskStatus::Generating);
    assert_eq!(task.params["prompt"], "cat");

    let marker = task.id.to_string();
    for client in [&alice, &bob] {
        let node = client.node("n1").unwrap();
        assert_eq!(node_field(&node, "taskId"), Some(marker.as_str()));
        assert_eq!(node_field(&node, "status"), Some("generating"));
        assert_eq!(node["position"], json!({ "x": 10, "y": 20 }));
    }

    // Later edits do not produce a second task for the claimed node
    bob.put_node(
        "n2",
        json!({ "type": "text", "position": { "x": 0, "y": 0 }, "data": { "status": "fin" } }),
    );
    bob.actor.flush().await.unwrap();
    assert_eq!(app.tasks("board").await.len(), 1);
    assert_eq!(executor.submit_calls(), 1);
}

#[tokio::test]
async fn test_late_joiner_receives_merged_state() {
    let executor = ScriptedExecutor::polling("acme", &[TaskType::Image], vec![]);
    let app = TestApp::start(vec![executor]).await;

    let alice = app.client("board").await;
    alice.put_node("n1", pending_image("cat"));
    alice.actor.flush().await.unwrap();

    let carol = app.client("board").await;
    let node = carol.node("n1").expect("late joiner sees the node");
    assert_eq!(node_field(&node, "prompt"), Some("cat"));
}

#[tokio::test]
async fn test_garbage_update_is_dropped_without_disconnecting() {
    let app = TestApp::start(vec![]).await;
    let mut alice = app.client("board").await;
    let mut bob = app.client("board").await;

    alice.send_raw(bytes::Bytes::from_static(b"definitely not a crdt update"));
    alice.put_node(
        "n1",
        json!({ "type": "text", "position": { "x": 0, "y": 0 }, "data": { "status": "fin" } }),
    );

    let node = bob.wait_for_node("n1", |_| true).await;
    assert_eq!(node["type"], "text");
    assert_eq!(alice.drain(), 0);
    assert_eq!(alice.actor.status().await.unwrap().connections, 2);
}

#[tokio::test]
async fn test_disconnect_stops_delivery() {
    let app = TestApp::start(vec![]).await;
    let alice = app.client("board").await;
    let mut bob = app.client("board").await;

    bob.disconnect();
    alice.put_node(
        "n1",
        json!({ "type": "text", "position": { "x": 0, "y": 0 }, "data": { "status": "fin" } }),
    );
    alice.actor.flush().await.unwrap();

    assert_eq!(bob.drain(), 0);
    assert_eq!(alice.actor.status().await.unwrap().connections, 1);
}

#[tokio::test]
async fn test_sync_executor_result_lands_on_node() {
    let executor = ScriptedExecutor::sync("instant", &[TaskType::Image], |_| {
        ExecutorResult::success_url("https://cdn/cat.png")
    });
    let app = TestApp::start(vec![executor]).await;
    let mut alice = app.client("board").await;

    alice.put_node("n1", pending_image("cat"));

    let node = alice
        .wait_for_node("n1", |n| node_field(n, "status") == Some("completed"))
        .await;
    assert_eq!(node_field(&node, "src"), Some("https://cdn/cat.png"));
    assert!(node["data"]["taskId"].is_null());

    let tasks = app.tasks("board").await;
    assert_eq!(tasks.len(), 1);
    // Node patch and ledger entry travel in the same frame
    let ledger = alice
        .replica()
        .task_entry(&tasks[0].id.to_string())
        .expect("ledger entry");
    assert_eq!(ledger["status"], "completed");
    assert_eq!(ledger["nodeId"], "n1");
}
