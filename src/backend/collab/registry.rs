/**
 * Document Actor Registry
 *
 * Maps document ids to their running sync actor. `get_or_spawn` checks
 * and inserts under the write lock, so concurrent first connections to the
 * same document always end up talking to the same actor.
 *
 * The registry is also where orchestrator events enter the collaboration
 * layer: `route_events` drains the orchestrator's event channel and
 * forwards every event to the owning document's actor, spawning it when the
 * document is not loaded.
 */

use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::backend::collab::actor::{ActorContext, SyncActorHandle};
use crate::backend::persistence::StorageError;
use crate::backend::tasks::orchestrator::TaskEvent;

#[derive(Debug, Clone)]
pub struct ActorRegistry {
    actors: Arc<RwLock<HashMap<String, SyncActorHandle>>>,
    context: ActorContext,
}

impl ActorRegistry {
    pub fn new(context: ActorContext) -> Self {
        Self {
            actors: Arc::new(RwLock::new(HashMap::new())),
            context,
        }
    }

    pub fn context(&self) -> &ActorContext {
        &self.context
    }

    /// The actor owning `doc_id`, spawned on first use
    pub async fn get_or_spawn(&self, doc_id: &str) -> SyncActorHandle {
        {
            let actors = self.actors.read().await;
            if let Some(handle) = actors.get(doc_id).filter(|h| !h.is_closed()) {
                return handle.clone();
            }
        }

        let mut actors = self.actors.write().await;
        if let Some(handle) = actors.get(doc_id).filter(|h| !h.is_closed()) {
            return handle.clone();
        }

        tracing::debug!("[Registry] Spawning actor for {}", doc_id);
        let handle = SyncActorHandle::spawn(doc_id, self.context.clone());
        actors.insert(doc_id.to_string(), handle.clone());
        handle
    }

    /// The actor owning `doc_id`, if one is running
    pub async fn get(&self, doc_id: &str) -> Option<SyncActorHandle> {
        let actors = self.actors.read().await;
        actors.get(doc_id).filter(|h| !h.is_closed()).cloned()
    }

    /// Ids of every document with a running actor
    pub async fn list_documents(&self) -> Vec<String> {
        let actors = self.actors.read().await;
        let mut ids: Vec<String> = actors.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Forward orchestrator events to document actors until the channel closes
    pub fn route_events(&self, mut events: mpsc::UnboundedReceiver<TaskEvent>) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let actor = registry.get_or_spawn(event.document_id()).await;
                let delivered = match event {
                    TaskEvent::Resolved(resolution) => actor.apply_resolution(resolution),
                    TaskEvent::PollingRequested { delay, .. } => actor.trigger_polling(delay),
                };
                if let Err(e) = delivered {
                    tracing::warn!(
                        "[Registry] Event for {} dropped: {}",
                        actor.document_id(),
                        e
                    );
                }
            }
            tracing::debug!("[Registry] Event channel closed");
        })
    }

    /// Spawn actors for documents with persisted alarms or outstanding tasks.
    ///
    /// Returns the recovered document ids.
    pub async fn recover(&self) -> Result<Vec<String>, StorageError> {
        let horizon_start = Utc::now()
            - chrono::Duration::from_std(self.context.settings.task_horizon)
                .unwrap_or_else(|_| chrono::Duration::days(36_500));

        let mut documents: BTreeSet<String> = self
            .context
            .schedules
            .all()
            .await?
            .into_iter()
            .map(|schedule| schedule.doc_id)
            .collect();
        documents.extend(
            self.context
                .orchestrator
                .store()
                .documents_with_outstanding_polling(horizon_start)
                .await?,
        );

        for doc_id in &documents {
            let actor = self.get_or_spawn(doc_id).await;
            if let Err(e) = actor.resume() {
                tracing::warn!("[Registry] Could not resume {}: {}", doc_id, e);
            }
        }

        if !documents.is_empty() {
            tracing::info!("[Registry] Recovered {} document(s)", documents.len());
        }
        Ok(documents.into_iter().collect())
    }
}
