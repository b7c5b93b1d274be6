/**
 * Server Initialization
 *
 * This module wires the backend together and produces the Axum router.
 *
 * # Initialization Process
 *
 * 1. Open the database and run migrations
 * 2. Build the executor registry from the configured providers
 * 3. Create the task orchestrator and its event channel
 * 4. Create the actor registry and start routing orchestrator events
 * 5. Recover documents with persisted alarms or outstanding tasks
 * 6. Create the router
 */

use axum::Router;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::backend::collab::{ActorContext, ActorRegistry, ActorSettings};
use crate::backend::persistence::{ScheduleStore, SnapshotStore, StorageError, StorageRetry};
use crate::backend::routes::router::create_router;
use crate::backend::server::config::load_database;
use crate::backend::server::state::AppState;
use crate::backend::tasks::executor::{ExecutorError, ExecutorRegistry};
use crate::backend::tasks::orchestrator::{OrchestratorConfig, TaskOrchestrator};
use crate::backend::tasks::store::TaskStore;
use crate::shared::config::AppConfig;

/// Reasons the server cannot start
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("database unavailable: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid provider configuration: {0}")]
    Providers(#[from] ExecutorError),

    #[error("recovery failed: {0}")]
    Recovery(#[from] StorageError),
}

/// Wire stores, orchestrator and actor registry around `executors`.
///
/// The orchestrator's events are already being routed to document actors
/// when this returns.
pub async fn build_state(config: AppConfig, executors: ExecutorRegistry) -> Result<AppState, StartupError> {
    let config = Arc::new(config);

    // Step 1: Database
    let pool = load_database(&config.database_url).await?;

    // Step 2: Orchestrator and its event channel
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let orchestrator = TaskOrchestrator::new(
        TaskStore::new(pool.clone()),
        executors,
        OrchestratorConfig::from(config.as_ref()),
        events_tx,
    );

    // Step 3: Actor registry
    let retry = StorageRetry {
        attempts: config.storage_retry_attempts,
        backoff: config.storage_retry_backoff(),
    };
    let registry = ActorRegistry::new(ActorContext {
        snapshots: SnapshotStore::new(pool.clone(), config.chunk_size_bytes, retry),
        schedules: ScheduleStore::new(pool),
        orchestrator: orchestrator.clone(),
        settings: ActorSettings::from(config.as_ref()),
    });
    registry.route_events(events_rx);

    tracing::info!("Task orchestrator and actor registry initialized");

    Ok(AppState {
        config,
        registry,
        orchestrator,
    })
}

/// Create and configure the Axum application
///
/// Providers come from `config.providers`; documents that were mid-flight
/// when the previous process stopped are resumed before the router is
/// returned.
pub async fn create_app(config: AppConfig) -> Result<Router<()>, StartupError> {
    tracing::info!("Initializing canvas collaboration server");

    let executors = ExecutorRegistry::from_config(&config.providers)?;
    if executors.is_empty() {
        tracing::warn!("No providers configured; generation tasks will fail on submission");
    }

    let app_state = build_state(config, executors).await?;

    let recovered = app_state.registry.recover().await?;
    tracing::info!("Resumed {} document(s) from the previous run", recovered.len());

    Ok(create_router(app_state))
}
