//! Restart recovery
//!
//! Each test seeds the durable state a previous server process would have
//! left behind (snapshot, task rows, alarm rows) in a database file, then
//! starts a fresh application on top of it.

use canvas_collab::backend::crdt::CanvasDocument;
use canvas_collab::backend::persistence::{AlarmKind, ScheduleStore, SnapshotStore, StorageRetry};
use canvas_collab::backend::tasks::TaskStore;
use canvas_collab::shared::task::{CompletionMode, ExecutorResult, Task, TaskStatus, TaskType};
use canvas_collab::shared::AppConfig;
use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::json;
use uuid::Uuid;

use crate::common::{node_field, test_config_builder, ScriptedExecutor, TestApp, TestDatabase};

fn config_for(db: &TestDatabase) -> AppConfig {
    test_config_builder().database_url(db.url()).build().unwrap()
}

fn polled_task(id: Uuid, status: TaskStatus) -> Task {
    let now = Utc::now();
    let terminal = status.is_terminal();
    Task {
        id,
        document_id: "board".into(),
        node_id: "n1".into(),
        task_type: TaskType::Image,
        provider: "acme".into(),
        completion_mode: CompletionMode::Poll,
        status,
        external_ref: Some("job-7".into()),
        params: json!({ "prompt": "cat" }),
        result_url: terminal.then(|| "https://cdn/cat.png".to_string()),
        result_data: None,
        error: None,
        retry_count: 0,
        max_retries: 3,
        next_poll_at: (!terminal).then_some(now),
        created_at: now,
        updated_at: now,
        completed_at: terminal.then_some(now),
    }
}

/// Snapshot with node `n1` claimed by `marker`
async fn seed_claimed_node(db: &TestDatabase, marker: Uuid) {
    let document = CanvasDocument::new();
    document
        .put_node(
            "n1",
            &json!({
                "type": "image",
                "position": { "x": 0, "y": 0 },
                "data": { "status": "generating", "prompt": "cat", "taskId": marker.to_string() }
            }),
        )
        .unwrap();
    let snapshots = SnapshotStore::new(db.pool().await, 512 * 1024, StorageRetry::default());
    snapshots
        .save("board", &document.export_snapshot().unwrap(), &document.version_tag())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_recover_resumes_polling_documents() {
    let db = TestDatabase::new();
    let task_id = Uuid::new_v4();
    seed_claimed_node(&db, task_id).await;
    let pool = db.pool().await;
    TaskStore::new(pool.clone())
        .insert(&polled_task(task_id, TaskStatus::Generating))
        .await
        .unwrap();
    ScheduleStore::new(pool)
        .set("board", AlarmKind::TaskPolling, Utc::now())
        .await
        .unwrap();

    let executor = ScriptedExecutor::polling(
        "acme",
        &[TaskType::Image],
        vec![ExecutorResult::success_url("https://cdn/cat.png")],
    );
    let app = TestApp::start_with(config_for(&db), vec![executor.clone()]).await;

    let resumed = app.state.registry.recover().await.unwrap();
    assert_eq!(resumed, vec!["board".to_string()]);

    let mut client = app.client("board").await;
    let node = client
        .wait_for_node("n1", |n| node_field(n, "status") == Some("completed"))
        .await;
    assert_eq!(node_field(&node, "src"), Some("https://cdn/cat.png"));
    assert_eq!(executor.poll_calls(), 1);

    let task = app.state.orchestrator.get(task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_load_applies_resolution_missed_while_down() {
    let db = TestDatabase::new();
    let task_id = Uuid::new_v4();
    seed_claimed_node(&db, task_id).await;
    TaskStore::new(db.pool().await)
        .insert(&polled_task(task_id, TaskStatus::Completed))
        .await
        .unwrap();

    let app = TestApp::start_with(config_for(&db), vec![]).await;
    let client = app.client("board").await;

    // Already applied in the very first snapshot the client receives
    let node = client.node("n1").unwrap();
    assert_eq!(node_field(&node, "status"), Some("completed"));
    assert_eq!(node_field(&node, "src"), Some("https://cdn/cat.png"));
    assert!(node["data"]["taskId"].is_null());

    let ledger = client.replica().task_entry(&task_id.to_string()).unwrap();
    assert_eq!(ledger["status"], "completed");
}

#[tokio::test]
async fn test_load_ignores_outcome_of_superseded_task() {
    let db = TestDatabase::new();
    let current = Uuid::new_v4();
    seed_claimed_node(&db, current).await;
    let store = TaskStore::new(db.pool().await);
    store
        .insert(&polled_task(current, TaskStatus::Generating))
        .await
        .unwrap();
    store
        .insert(&polled_task(Uuid::new_v4(), TaskStatus::Completed))
        .await
        .unwrap();

    let app = TestApp::start_with(config_for(&db), vec![]).await;
    let client = app.client("board").await;

    let node = client.node("n1").unwrap();
    assert_eq!(node_field(&node, "status"), Some("generating"));
    assert_eq!(node_field(&node, "taskId"), Some(current.to_string().as_str()));
}

#[tokio::test]
async fn test_load_reclaims_node_whose_task_was_never_recorded() {
    let db = TestDatabase::new();
    let lost = Uuid::new_v4();
    seed_claimed_node(&db, lost).await;

    let executor = ScriptedExecutor::polling(
        "acme",
        &[TaskType::Image],
        vec![ExecutorResult::success_url("https://cdn/cat.png")],
    );
    let app = TestApp::start_with(config_for(&db), vec![executor.clone()]).await;
    let mut client = app.client("board").await;

    let node = client
        .wait_for_node("n1", |n| node_field(n, "status") == Some("completed"))
        .await;
    assert_eq!(node_field(&node, "src"), Some("https://cdn/cat.png"));
    assert!(node["data"]["taskId"].is_null());
    assert_eq!(node["position"], json!({ "x": 0, "y": 0 }));

    let tasks = app.tasks("board").await;
    assert_eq!(tasks.len(), 1);
    assert_ne!(tasks[0].id, lost);
    assert_eq!(tasks[0].status, TaskStatus::Completed);
    assert_eq!(executor.submit_calls(), 1);
}

#[tokio::test]
async fn test_document_survives_restart() {
    let db = TestDatabase::new();

    let first = TestApp::start_with(config_for(&db), vec![]).await;
    let alice = first.client("board").await;
    alice.put_node(
        "note",
        json!({ "type": "text", "position": { "x": 3, "y": 4 }, "data": { "status": "fin", "text": "hi" } }),
    );
    alice.actor.flush().await.unwrap();

    let second = TestApp::start_with(config_for(&db), vec![]).await;
    let bob = second.client("board").await;
    let node = bob.node("note").expect("node restored from snapshot");
    assert_eq!(node_field(&node, "text"), Some("hi"));
    assert_eq!(node["position"], json!({ "x": 3, "y": 4 }));
}
