/**
 * API Route Configuration
 *
 * # Routes
 *
 * ## Tasks
 * - `POST /api/tasks` - Submit a task
 * - `GET  /api/tasks/{task_id}` - Task status
 * - `POST /api/tasks/{task_id}/cancel` - Cancel a task
 *
 * ## Webhooks
 * - `POST /api/webhooks/{provider}` - Provider callback
 *
 * ## Internal
 * - `POST /internal/tasks/{task_id}/broadcast` - Re-announce a finished task
 * - `POST /internal/documents/{doc_id}/poll` - Poll a document's tasks soon
 *
 * Internal routes are meant for operators and sidecars; they are not
 * authenticated and should not be exposed publicly.
 */

use axum::{
    routing::{get, post},
    Router,
};

use crate::backend::collab::handlers::{broadcast_task_completion, trigger_task_polling};
use crate::backend::server::state::AppState;
use crate::backend::tasks::handlers::{cancel_task, get_task, handle_webhook, submit_task};

/// Configure API routes
pub fn configure_api_routes(router: Router<AppState>) -> Router<AppState> {
    router
        // Task routes
        .route("/api/tasks", post(submit_task))
        .route("/api/tasks/{task_id}", get(get_task))
        .route("/api/tasks/{task_id}/cancel", post(cancel_task))
        // Provider callbacks
        .route("/api/webhooks/{provider}", post(handle_webhook))
        // Internal control routes
        .route(
            "/internal/tasks/{task_id}/broadcast",
            post(broadcast_task_completion),
        )
        .route(
            "/internal/documents/{doc_id}/poll",
            post(trigger_task_polling),
        )
}
