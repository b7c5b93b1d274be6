/**
 * Router Configuration
 *
 * This module provides the main router creation function that combines
 * all route configurations into a single Axum router.
 *
 * # Route Order
 *
 * 1. Real-time routes (`/ws/{doc_id}`)
 * 2. API and internal routes
 * 3. Health check
 * 4. Fallback handler (404)
 *
 * Every request passes through `TraceLayer`, so request/response spans show
 * up in the same log stream as the component logs.
 */

use axum::{http::StatusCode, routing::get, Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::backend::collab::handlers::handle_document_socket;
use crate::backend::routes::api_routes::configure_api_routes;
use crate::backend::server::state::AppState;

/// Create the Axum router with all routes configured
///
/// ## Real-time
///
/// - `GET /ws/{doc_id}` - WebSocket channel for one document
///
/// ## API
///
/// - `POST /api/tasks` - Submit a task
/// - `GET  /api/tasks/{task_id}` - Task status
/// - `POST /api/tasks/{task_id}/cancel` - Cancel a task
/// - `POST /api/webhooks/{provider}` - Provider callback
///
/// ## Internal
///
/// - `POST /internal/tasks/{task_id}/broadcast` - Re-announce a finished task
/// - `POST /internal/documents/{doc_id}/poll` - Poll a document's tasks soon
///
/// ## Health
///
/// - `GET /health` - Liveness check
pub fn create_router(app_state: AppState) -> Router<()> {
    let router = Router::new().route("/ws/{doc_id}", get(handle_document_socket));

    // Add API and internal routes
    let router = configure_api_routes(router);

    let router = router
        .route("/health", get(health))
        .fallback(|| async {
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "Not Found", "status": 404 })),
            )
        })
        .layer(TraceLayer::new_for_http());

    // Use AppState as router state
    router.with_state(app_state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
