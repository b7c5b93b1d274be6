/**
 * Task Handlers
 *
 * - `POST /api/tasks` - submit a task
 * - `GET  /api/tasks/{task_id}` - task status
 * - `POST /api/tasks/{task_id}/cancel` - force a task to `failed`
 * - `POST /api/webhooks/{provider}` - provider completion callback
 *
 * Handlers are thin: they extract, delegate to the orchestrator and return
 * the resulting task as JSON. Errors map to statuses in `BackendError`.
 */

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::backend::error::{json_rejection, BackendError};
use crate::backend::tasks::orchestrator::TaskOrchestrator;
use crate::shared::task::{SubmitTaskRequest, Task};

/// Submit a task (POST /api/tasks)
pub async fn submit_task(
    State(orchestrator): State<Arc<TaskOrchestrator>>,
    body: Result<Json<SubmitTaskRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Task>), BackendError> {
    let Json(request) = body.map_err(json_rejection)?;
    let task = orchestrator.submit(request).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// Task status (GET /api/tasks/{task_id})
pub async fn get_task(
    State(orchestrator): State<Arc<TaskOrchestrator>>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Task>, BackendError> {
    Ok(Json(orchestrator.get(task_id).await?))
}

/// Cancel a task (POST /api/tasks/{task_id}/cancel)
pub async fn cancel_task(
    State(orchestrator): State<Arc<TaskOrchestrator>>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Task>, BackendError> {
    Ok(Json(orchestrator.cancel(task_id).await?))
}

/// Provider callback (POST /api/webhooks/{provider})
pub async fn handle_webhook(
    State(orchestrator): State<Arc<TaskOrchestrator>>,
    Path(provider): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Task>, BackendError> {
    let Json(payload) = body.map_err(json_rejection)?;
    tracing::info!("[Webhook] Callback from {}", provider);
    let task = orchestrator.handle_webhook(&provider, &payload).await?;
    Ok(Json(task))
}
