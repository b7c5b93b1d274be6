/**
 * Task Orchestrator
 *
 * Owns the task state machine:
 *
 * ```text
 * submit ──► generating ──► completed
 *    │            │
 *    │            └───────► failed   (definitive error, max retries, cancel)
 *    └──► completed | failed         (synchronous executors)
 * ```
 *
 * Every transition is written to the task store first. Terminal transitions
 * are then announced as [`TaskEvent::Resolved`] on the event channel; the
 * collaboration layer routes those to the owning document. Delivery is
 * fire-and-forget: the task row stays the source of truth and documents
 * reconcile against it when they load.
 *
 * # Polling
 *
 * `poll_document` runs one pass over a document's due poll-mode tasks:
 *
 * 1. completed result - resolve and notify
 * 2. still running - touch `updated_at`, re-poll after `poll_interval`
 * 3. error - spend a retry; at `max_retries` the task fails, otherwise it
 *    is re-polled after `retry_base_delay * 2^retry_count`
 */

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::backend::persistence::StorageError;
use crate::backend::tasks::executor::ExecutorRegistry;
use crate::backend::tasks::store::{Resolution, TaskStore};
use crate::shared::config::AppConfig;
use crate::shared::task::{
    CompletionMode, ExecutorResult, SubmitTaskRequest, Task, TaskResolution, TaskStatus, TaskType,
};

/// Notifications from the orchestrator to the collaboration layer
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// A task reached a terminal state
    Resolved(TaskResolution),
    /// A document has poll-mode work outstanding and should poll after `delay`
    PollingRequested { document_id: String, delay: Duration },
}

impl TaskEvent {
    pub fn document_id(&self) -> &str {
        match self {
            TaskEvent::Resolved(resolution) => &resolution.document_id,
            TaskEvent::PollingRequested { document_id, .. } => document_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("no executor available for {task_type} tasks{}", provider_suffix(.provider))]
    ExecutorUnavailable {
        task_type: TaskType,
        provider: Option<String>,
    },

    #[error("submission failed: {0}")]
    Submission(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("task {0} not found")]
    NotFound(Uuid),

    #[error("task {id} is already {status}")]
    AlreadyTerminal { id: Uuid, status: TaskStatus },

    #[error("task {0} has not finished yet")]
    NotTerminal(Uuid),

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("no task for {provider} reference '{external_ref}'")]
    UnknownReference {
        provider: String,
        external_ref: String,
    },

    #[error("invalid webhook: {0}")]
    InvalidWebhook(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn provider_suffix(provider: &Option<String>) -> String {
    provider
        .as_ref()
        .map(|p| format!(" from provider '{}'", p))
        .unwrap_or_default()
}

/// Timing and retry policy
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_retries: u32,
    pub poll_interval: Duration,
    pub initial_poll_delay: Duration,
    pub retry_base_delay: Duration,
    pub task_horizon: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for OrchestratorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            poll_interval: config.poll_interval(),
            initial_poll_delay: config.initial_poll_delay(),
            retry_base_delay: config.retry_base_delay(),
            task_horizon: config.task_horizon(),
        }
    }
}

/// Outcome of one polling pass over a document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub polled: usize,
    pub resolved: usize,
    /// Poll-mode tasks still waiting after the pass
    pub outstanding: usize,
}

/// Delay before the next poll after `retry_count` failed attempts
pub fn retry_backoff(base: Duration, retry_count: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(retry_count))
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

pub struct TaskOrchestrator {
    store: TaskStore,
    executors: ExecutorRegistry,
    config: OrchestratorConfig,
    events: mpsc::UnboundedSender<TaskEvent>,
}

impl std::fmt::Debug for TaskOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskOrchestrator")
            .field("executors", &self.executors)
            .field("config", &self.config)
            .finish()
    }
}

impl TaskOrchestrator {
    pub fn new(
        store: TaskStore,
        executors: ExecutorRegistry,
        config: OrchestratorConfig,
        events: mpsc::UnboundedSender<TaskEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            executors,
            config,
            events,
        })
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Submit a new task with a freshly generated id
    pub async fn submit(&self, request: SubmitTaskRequest) -> Result<Task, OrchestratorError> {
        self.submit_with_id(Uuid::new_v4(), request).await
    }

    /// Submit a new task under a caller-chosen id.
    ///
    /// Nothing is persisted when no executor matches or the executor rejects
    /// the submission.
    pub async fn submit_with_id(
        &self,
        id: Uuid,
        request: SubmitTaskRequest,
    ) -> Result<Task, OrchestratorError> {
        if request.document_id.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest("document_id is required".into()));
        }
        if request.node_id.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest("node_id is required".into()));
        }

        let executor = self
            .executors
            .resolve(request.task_type, request.provider.as_deref())
            .ok_or_else(|| OrchestratorError::ExecutorUnavailable {
                task_type: request.task_type,
                provider: request.provider.clone(),
            })?;

        let result = executor
            .submit(&request.params)
            .await
            .map_err(|e| OrchestratorError::Submission(e.to_string()))?;

        if !result.completed {
            if let Some(error) = &result.error {
                return Err(OrchestratorError::Submission(error.clone()));
            }
            if result.external_ref.is_none() {
                return Err(OrchestratorError::Submission(format!(
                    "{} accepted the task without an external reference",
                    executor.provider()
                )));
            }
        }

        let now = Utc::now();
        let mode = executor.completion_mode();
        let status = match (result.completed, result.error.is_some()) {
            (true, false) => TaskStatus::Completed,
            (true, true) => TaskStatus::Failed,
            (false, _) => TaskStatus::Generating,
        };
        let awaiting_poll = status == TaskStatus::Generating && mode == CompletionMode::Poll;

        let task = Task {
            id,
            document_id: request.document_id,
            node_id: request.node_id,
            task_type: request.task_type,
            provider: result
                .provider
                .clone()
                .unwrap_or_else(|| executor.provider().to_string()),
            completion_mode: mode,
            status,
            external_ref: result.external_ref.clone(),
            params: request.params,
            result_url: result.result_url.clone(),
            result_data: result.result_data.clone(),
            error: result.error.clone(),
            retry_count: 0,
            max_retries: self.config.max_retries,
            next_poll_at: awaiting_poll.then(|| now + chrono_duration(self.config.initial_poll_delay)),
            created_at: now,
            updated_at: now,
            completed_at: status.is_terminal().then_some(now),
        };

        self.store.insert(&task).await?;

        tracing::info!(
            "[Orchestrator] Task {} ({}) for {}/{} submitted to {} -> {}",
            task.id,
            task.task_type,
            task.document_id,
            task.node_id,
            task.provider,
            task.status
        );

        if task.status.is_terminal() {
            self.emit(TaskEvent::Resolved(task.resolution()));
        } else if awaiting_poll {
            self.emit(TaskEvent::PollingRequested {
                document_id: task.document_id.clone(),
                delay: self.config.initial_poll_delay,
            });
        }

        Ok(task)
    }

    /// Run one polling pass over the document's due tasks
    pub async fn poll_document(&self, document_id: &str) -> Result<PollSummary, OrchestratorError> {
        let now = Utc::now();
        let horizon_start = now - chrono_duration(self.config.task_horizon);
        let due = self
            .store
            .list_due_for_polling(document_id, now, horizon_start)
            .await?;

        let mut summary = PollSummary {
            polled: due.len(),
            ..Default::default()
        };

        for task in &due {
            match self.poll_task(task, now).await {
                Ok(true) => summary.resolved += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!("[Orchestrator] Failed to poll task {}: {}", task.id, e);
                }
            }
        }

        summary.outstanding = self
            .store
            .count_outstanding_polling(document_id, horizon_start)
            .await?;

        if summary.polled > 0 {
            tracing::debug!(
                "[Orchestrator] Poll pass for {}: {} polled, {} resolved, {} outstanding",
                document_id,
                summary.polled,
                summary.resolved,
                summary.outstanding
            );
        }

        Ok(summary)
    }

    /// Poll one task; returns whether it reached a terminal state
    async fn poll_task(&self, task: &Task, now: DateTime<Utc>) -> Result<bool, OrchestratorError> {
        let Some(external_ref) = task.external_ref.as_deref() else {
            return Ok(false);
        };

        let outcome = match self.executors.for_provider(&task.provider) {
            Some(executor) => executor
                .poll(external_ref)
                .await
                .unwrap_or_else(|e| ExecutorResult::transient(e.to_string())),
            None => ExecutorResult::transient(format!("provider '{}' is not registered", task.provider)),
        };

        if outcome.completed {
            return self.finish(task, resolution_of(&outcome), None, now).await;
        }

        let Some(error) = outcome.error else {
            let next_poll_at = now + chrono_duration(self.config.poll_interval);
            self.store.touch(task.id, now, Some(next_poll_at)).await?;
            return Ok(false);
        };

        let retry_count = task.retry_count + 1;
        if retry_count >= task.max_retries {
            tracing::warn!(
                "[Orchestrator] Task {} exhausted {} retries: {}",
                task.id,
                task.max_retries,
                error
            );
            let failed = Resolution {
                status: TaskStatus::Failed,
                result_url: None,
                result_data: None,
                error: Some(format!("max retries exceeded: {}", error)),
            };
            return self.finish(task, failed, Some(retry_count), now).await;
        }

        let delay = retry_backoff(self.config.retry_base_delay, retry_count);
        tracing::info!(
            "[Orchestrator] Task {} poll error (retry {}/{}), next poll in {:?}: {}",
            task.id,
            retry_count,
            task.max_retries,
            delay,
            error
        );
        self.store
            .record_retry(task.id, retry_count, &error, now, now + chrono_duration(delay))
            .await?;
        Ok(false)
    }

    /// Apply a provider callback
    pub async fn handle_webhook(
        &self,
        provider: &str,
        payload: &serde_json::Value,
    ) -> Result<Task, OrchestratorError> {
        let executor = self
            .executors
            .for_provider(provider)
            .ok_or_else(|| OrchestratorError::UnknownProvider(provider.to_string()))?;

        let outcome = executor
            .process_webhook(payload)
            .await
            .map_err(|e| OrchestratorError::InvalidWebhook(e.to_string()))?;

        let external_ref = outcome
            .external_ref
            .clone()
            .ok_or_else(|| OrchestratorError::InvalidWebhook("payload carries no job reference".into()))?;

        let task = self
            .store
            .find_by_external_ref(provider, &external_ref)
            .await?
            .ok_or_else(|| OrchestratorError::UnknownReference {
                provider: provider.to_string(),
                external_ref: external_ref.clone(),
            })?;

        if task.status.is_terminal() {
            tracing::info!(
                "[Webhook] Task {} is already {}, ignoring duplicate callback",
                task.id,
                task.status
            );
            return Ok(task);
        }

        let now = Utc::now();
        if outcome.completed {
            self.finish(&task, resolution_of(&outcome), None, now).await?;
        } else if let Some(error) = &outcome.error {
            let failed = Resolution {
                status: TaskStatus::Failed,
                result_url: None,
                result_data: None,
                error: Some(error.clone()),
            };
            self.finish(&task, failed, None, now).await?;
        } else {
            self.store.touch(task.id, now, None).await?;
        }

        self.get(task.id).await
    }

    /// Force a task to `failed`
    pub async fn cancel(&self, id: Uuid) -> Result<Task, OrchestratorError> {
        let task = self.get(id).await?;
        if task.status.is_terminal() {
            return Err(OrchestratorError::AlreadyTerminal {
                id,
                status: task.status,
            });
        }

        let cancelled = Resolution {
            status: TaskStatus::Failed,
            result_url: None,
            result_data: None,
            error: Some("cancelled".to_string()),
        };
        if !self.finish(&task, cancelled, None, Utc::now()).await? {
            let current = self.get(id).await?;
            return Err(OrchestratorError::AlreadyTerminal {
                id,
                status: current.status,
            });
        }

        tracing::info!("[Orchestrator] Task {} cancelled", id);
        self.get(id).await
    }

    /// Re-announce a terminal task to its document
    pub async fn renotify(&self, id: Uuid) -> Result<Task, OrchestratorError> {
        let task = self.get(id).await?;
        if !task.status.is_terminal() {
            return Err(OrchestratorError::NotTerminal(id));
        }
        self.emit(TaskEvent::Resolved(task.resolution()));
        Ok(task)
    }

    pub async fn get(&self, id: Uuid) -> Result<Task, OrchestratorError> {
        self.store
            .get(id)
            .await?
            .ok_or(OrchestratorError::NotFound(id))
    }

    /// Ask the owning document to poll soon
    pub fn request_polling(&self, document_id: &str, delay: Duration) {
        self.emit(TaskEvent::PollingRequested {
            document_id: document_id.to_string(),
            delay,
        });
    }

    /// Persist a terminal transition and notify; false if another path won
    async fn finish(
        &self,
        task: &Task,
        resolution: Resolution,
        retry_count: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<bool, OrchestratorError> {
        let applied = self
            .store
            .resolve(task.id, &resolution, retry_count, now)
            .await?;
        if !applied {
            tracing::debug!("[Orchestrator] Task {} was already resolved", task.id);
            return Ok(false);
        }

        tracing::info!(
            "[Orchestrator] Task {} for {}/{} -> {}",
            task.id,
            task.document_id,
            task.node_id,
            resolution.status
        );

        self.emit(TaskEvent::Resolved(TaskResolution {
            document_id: task.document_id.clone(),
            node_id: task.node_id.clone(),
            task_id: task.id,
            task_type: task.task_type,
            status: resolution.status,
            result_url: resolution.result_url,
            result_data: resolution.result_data,
            error: resolution.error,
        }));
        Ok(true)
    }

    fn emit(&self, event: TaskEvent) {
        if self.events.send(event).is_err() {
            tracing::warn!("[Orchestrator] Event channel closed, notification dropped");
        }
    }
}

fn resolution_of(outcome: &ExecutorResult) -> Resolution {
    Resolution {
        status: if outcome.error.is_some() {
            TaskStatus::Failed
        } else {
            TaskStatus::Completed
        },
        result_url: outcome.result_url.clone(),
        result_data: outcome.result_data.clone(),
        error: outcome.error.clone(),
    }
}
