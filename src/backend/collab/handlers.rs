/**
 * Collaboration Handlers
 *
 * - `GET  /ws/{doc_id}` - real-time channel for one document
 * - `POST /internal/tasks/{task_id}/broadcast` - re-announce a finished task
 * - `POST /internal/documents/{doc_id}/poll` - poll a document's tasks soon
 *
 * # Real-time channel
 *
 * One WebSocket per (document, client). The first server frame is a full
 * binary snapshot; after that both directions carry binary CRDT deltas.
 * Text frames are logged and ignored without closing the connection.
 *
 * ```text
 *  socket ──read──► SyncActorHandle::client_update ──► actor
 *  socket ◄─write── writer task ◄── outbound channel ◄── actor broadcast
 * ```
 */

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::backend::collab::broadcast::outbound_channel;
use crate::backend::collab::registry::ActorRegistry;
use crate::backend::error::BackendError;
use crate::backend::tasks::orchestrator::TaskOrchestrator;
use crate::shared::{SharedError, Task};

/// Delay used by the manual trigger-polling endpoint
pub const MANUAL_POLL_DELAY: Duration = Duration::from_secs(2);

/// Upgrade to the document's real-time channel (GET /ws/{doc_id})
pub async fn handle_document_socket(
    ws: WebSocketUpgrade,
    Path(doc_id): Path<String>,
    State(registry): State<ActorRegistry>,
) -> Result<Response, BackendError> {
    validate_doc_id(&doc_id)?;
    tracing::info!("[Collab] WebSocket upgrade for {}", doc_id);
    Ok(ws.on_upgrade(move |socket| serve_socket(socket, registry, doc_id)))
}

async fn serve_socket(socket: WebSocket, registry: ActorRegistry, doc_id: String) {
    let actor = registry.get_or_spawn(&doc_id).await;
    let (mut sink, mut stream) = socket.split();
    let (outbound, mut frames) = outbound_channel();

    let conn = match actor.connect(outbound).await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!("[Collab] Could not open {}: {}", doc_id, e);
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if sink.send(Message::Binary(frame)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            message = stream.next() => match message {
                Some(Ok(Message::Binary(update))) => {
                    if actor.client_update(conn, update).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    tracing::warn!(
                        "[Collab] Ignoring {}-byte text frame on {} (connection {})",
                        text.len(),
                        doc_id,
                        conn
                    );
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("[Collab] Read error on {} (connection {}): {}", doc_id, conn, e);
                    break;
                }
            },
            _ = &mut writer => break,
        }
    }

    actor.disconnect(conn);
    writer.abort();
}

/// Re-announce a finished task to its document (POST /internal/tasks/{task_id}/broadcast)
pub async fn broadcast_task_completion(
    State(orchestrator): State<Arc<TaskOrchestrator>>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Task>, BackendError> {
    let task = orchestrator.renotify(task_id).await?;
    tracing::info!(
        "[Collab] Re-broadcast task {} ({}) to {}",
        task.id,
        task.status,
        task.document_id
    );
    Ok(Json(task))
}

/// Ask a document to poll its outstanding tasks (POST /internal/documents/{doc_id}/poll)
pub async fn trigger_task_polling(
    State(registry): State<ActorRegistry>,
    Path(doc_id): Path<String>,
) -> Result<impl IntoResponse, BackendError> {
    validate_doc_id(&doc_id)?;
    let actor = registry.get_or_spawn(&doc_id).await;
    actor.trigger_polling(MANUAL_POLL_DELAY)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "documentId": doc_id,
            "pollInMs": MANUAL_POLL_DELAY.as_millis() as u64,
        })),
    ))
}

fn validate_doc_id(doc_id: &str) -> Result<(), SharedError> {
    if doc_id.trim().is_empty() {
        return Err(SharedError::validation("doc_id", "document id cannot be empty"));
    }
    if doc_id.len() > 256 {
        return Err(SharedError::validation("doc_id", "document id is too long"));
    }
    Ok(())
}
