/**
 * Application State Management
 *
 * `AppState` is the central state container of the Axum application. It
 * implements `FromRef` for each part, so handlers extract only what they
 * need:
 *
 * - `State<ActorRegistry>` - document actors (WebSocket, trigger-polling)
 * - `State<Arc<TaskOrchestrator>>` - task endpoints and webhooks
 * - `State<Arc<AppConfig>>` - effective configuration
 *
 * # Example
 *
 * ```rust,ignore
 * use axum::extract::State;
 * use canvas_collab::backend::collab::ActorRegistry;
 *
 * async fn handler(State(registry): State<ActorRegistry>) {
 *     let actor = registry.get_or_spawn("canvas-1").await;
 * }
 * ```
 */

use axum::extract::FromRef;
use std::sync::Arc;

use crate::backend::collab::ActorRegistry;
use crate::backend::tasks::orchestrator::TaskOrchestrator;
use crate::shared::config::AppConfig;

#[derive(Debug, Clone)]
pub struct AppState {
    /// Effective configuration
    pub config: Arc<AppConfig>,

    /// Document id → sync actor
    pub registry: ActorRegistry,

    /// Task state machine shared by handlers and actors
    pub orchestrator: Arc<TaskOrchestrator>,
}

impl FromRef<AppState> for ActorRegistry {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.registry.clone()
    }
}

impl FromRef<AppState> for Arc<TaskOrchestrator> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.orchestrator.clone()
    }
}

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.config.clone()
    }
}
