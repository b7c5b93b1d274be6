//! Per-document sync actor.
//!
//! Every document id is owned by exactly one [`SyncActor`] running as its
//! own tokio task. All access goes through a cloneable [`SyncActorHandle`]
//! that sends commands over an unbounded mailbox, so merges, broadcasts,
//! projector passes and orchestrator callbacks for one document are applied
//! strictly one at a time. Slow work (snapshot saves, executor calls,
//! polling passes) runs in spawned tasks that report back through the same
//! mailbox; a stuck provider never stalls merging.
//!
//! ```text
//!   SyncActorHandle           mpsc             SyncActor (one per doc)
//!   ┌────────────────┐  ─────────────────▶  ┌─────────────────────────┐
//!   │ .connect()     │                      │ CanvasDocument          │
//!   │ .client_update │  ◀─────────────────  │ ConnectionSet           │
//!   │ .flush()       │      oneshot         │ AlarmClock              │
//!   └────────────────┘                      └─────────────────────────┘
//!                                              │ spawn      ▲ SaveFinished
//!                                              ▼            │ PollPassFinished
//!                                           save / dispatch / poll tasks
//! ```
//!
//! # Lifecycle
//!
//! `uninitialized → initializing → ready`. The first command that needs the
//! document loads the persisted snapshot (an undecodable snapshot starts an
//! empty document), reconciles markers against tasks that finished while the
//! document was unloaded, restores the persisted alarm and switches to
//! polling when poll-mode tasks are still outstanding. Commands arriving
//! during initialization wait in the mailbox.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::backend::collab::alarm::AlarmClock;
use crate::backend::collab::broadcast::{ConnectionId, ConnectionSet, Outbound};
use crate::backend::crdt::{CanvasDocument, DocumentError};
use crate::backend::persistence::{AlarmKind, ScheduleStore, SnapshotStore, StorageError};
use crate::backend::projector::{self, Claim};
use crate::backend::tasks::orchestrator::TaskOrchestrator;
use crate::shared::config::AppConfig;
use crate::shared::node::NodeView;
use crate::shared::task::TaskResolution;

/// Errors surfaced through a [`SyncActorHandle`]
#[derive(Debug, Error)]
pub enum ActorError {
    #[error("document actor shut down")]
    Shutdown,

    #[error("document is not loaded")]
    NotReady,

    #[error("client connection closed")]
    Disconnected,

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("snapshot save failed: {0}")]
    SaveFailed(String),
}

/// Timing knobs of a document actor
#[derive(Debug, Clone)]
pub struct ActorSettings {
    pub snapshot_interval: Duration,
    pub poll_interval: Duration,
    pub initial_poll_delay: Duration,
    pub description_retry_limit: u32,
    pub task_horizon: Duration,
}

impl From<&AppConfig> for ActorSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            snapshot_interval: config.snapshot_interval(),
            poll_interval: config.poll_interval(),
            initial_poll_delay: config.initial_poll_delay(),
            description_retry_limit: config.description_retry_limit,
            task_horizon: config.task_horizon(),
        }
    }
}

/// Shared services every actor needs
#[derive(Debug, Clone)]
pub struct ActorContext {
    pub snapshots: SnapshotStore,
    pub schedules: ScheduleStore,
    pub orchestrator: Arc<TaskOrchestrator>,
    pub settings: ActorSettings,
}

/// Point-in-time view of an actor, for diagnostics and tests
#[derive(Debug, Clone, PartialEq)]
pub struct ActorStatus {
    pub ready: bool,
    pub connections: usize,
    pub alarm: Option<(AlarmKind, DateTime<Utc>)>,
    pub save_in_progress: bool,
    /// Snapshot saves started since the actor was spawned
    pub saves_started: u64,
    pub polling_in_progress: bool,
}

enum ActorCommand {
    // Client traffic
    Connect {
        outbound: Outbound,
        reply: oneshot::Sender<Result<ConnectionId, ActorError>>,
    },
    ClientUpdate {
        conn: ConnectionId,
        update: Bytes,
    },
    Disconnect {
        conn: ConnectionId,
    },

    // Orchestration
    ApplyResolution(TaskResolution),
    ProjectionFailed {
        claim: Claim,
        error: String,
    },
    TriggerPolling {
        delay: Duration,
    },

    // Internal completions
    Wake {
        generation: u64,
    },
    SaveFinished {
        result: Result<(), String>,
    },
    PollPassFinished {
        outstanding: Option<usize>,
    },

    // Queries
    Snapshot {
        reply: oneshot::Sender<Result<Vec<u8>, ActorError>>,
    },
    Node {
        node_id: String,
        reply: oneshot::Sender<Result<Option<Value>, ActorError>>,
    },
    Status {
        reply: oneshot::Sender<ActorStatus>,
    },
    Resume,
    Flush {
        reply: oneshot::Sender<Result<(), ActorError>>,
    },
}

/// Cloneable, `Send + Sync` handle to one document actor
#[derive(Debug, Clone)]
pub struct SyncActorHandle {
    doc_id: Arc<str>,
    tx: mpsc::UnboundedSender<ActorCommand>,
}

impl std::fmt::Debug for ActorCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ActorCommand::Connect { .. } => "Connect",
            ActorCommand::ClientUpdate { .. } => "ClientUpdate",
            ActorCommand::Disconnect { .. } => "Disconnect",
            ActorCommand::ApplyResolution(_) => "ApplyResolution",
            ActorCommand::ProjectionFailed { .. } => "ProjectionFailed",
            ActorCommand::TriggerPolling { .. } => "TriggerPolling",
            ActorCommand::Wake { .. } => "Wake",
            ActorCommand::SaveFinished { .. } => "SaveFinished",
            ActorCommand::PollPassFinished { .. } => "PollPassFinished",
            ActorCommand::Snapshot { .. } => "Snapshot",
            ActorCommand::Node { .. } => "Node",
            ActorCommand::Status { .. } => "Status",
            ActorCommand::Resume => "Resume",
            ActorCommand::Flush { .. } => "Flush",
        };
        f.write_str(name)
    }
}

impl SyncActorHandle {
    /// Start the actor for `doc_id`; the document loads lazily
    pub fn spawn(doc_id: impl Into<String>, context: ActorContext) -> Self {
        let doc_id: String = doc_id.into();
        let (tx, rx) = mpsc::unbounded_channel();

        let actor = SyncActor {
            doc_id: doc_id.clone(),
            context,
            mailbox: tx.downgrade(),
            phase: Phase::Uninitialized,
            connections: ConnectionSet::new(),
            alarm: AlarmClock::new(),
            save_in_progress: false,
            save_requested: false,
            saves_started: 0,
            flush_waiters: Vec::new(),
            polling_in_progress: false,
        };
        tokio::spawn(actor.run(rx));

        Self {
            doc_id: doc_id.into(),
            tx,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.doc_id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Register a client; its first outbound frame is a full snapshot
    pub async fn connect(&self, outbound: Outbound) -> Result<ConnectionId, ActorError> {
        self.request(|reply| ActorCommand::Connect { outbound, reply })
            .await?
    }

    /// Merge a binary update received from `conn`
    pub fn client_update(&self, conn: ConnectionId, update: Bytes) -> Result<(), ActorError> {
        self.send(ActorCommand::ClientUpdate { conn, update })
    }

    pub fn disconnect(&self, conn: ConnectionId) {
        let _ = self.send(ActorCommand::Disconnect { conn });
    }

    /// Write a terminal task outcome into the document
    pub fn apply_resolution(&self, resolution: TaskResolution) -> Result<(), ActorError> {
        self.send(ActorCommand::ApplyResolution(resolution))
    }

    /// Poll outstanding tasks after `delay`, unless a sooner wake-up is armed
    pub fn trigger_polling(&self, delay: Duration) -> Result<(), ActorError> {
        self.send(ActorCommand::TriggerPolling { delay })
    }

    /// Load the document and restore its alarms without a client
    pub fn resume(&self) -> Result<(), ActorError> {
        self.send(ActorCommand::Resume)
    }

    /// Full snapshot of the current document
    pub async fn snapshot(&self) -> Result<Vec<u8>, ActorError> {
        self.request(|reply| ActorCommand::Snapshot { reply }).await?
    }

    /// One node entity as JSON
    pub async fn node(&self, node_id: &str) -> Result<Option<Value>, ActorError> {
        let node_id = node_id.to_string();
        self.request(|reply| ActorCommand::Node { node_id, reply })
            .await?
    }

    pub async fn status(&self) -> Result<ActorStatus, ActorError> {
        self.request(|reply| ActorCommand::Status { reply }).await
    }

    /// Persist the current state and wait for the save to land
    pub async fn flush(&self) -> Result<(), ActorError> {
        self.request(|reply| ActorCommand::Flush { reply }).await?
    }

    fn send(&self, command: ActorCommand) -> Result<(), ActorError> {
        self.tx.send(command).map_err(|_| ActorError::Shutdown)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ActorCommand,
    ) -> Result<T, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply))?;
        rx.await.map_err(|_| ActorError::Shutdown)
    }
}

enum Phase {
    Uninitialized,
    Initializing,
    Ready(CanvasDocument),
}

struct SyncActor {
    doc_id: String,
    context: ActorContext,
    /// Weak so that dropping every handle stops the actor
    mailbox: mpsc::WeakUnboundedSender<ActorCommand>,
    phase: Phase,
    connections: ConnectionSet,
    alarm: AlarmClock,
    save_in_progress: bool,
    save_requested: bool,
    saves_started: u64,
    flush_waiters: Vec<oneshot::Sender<Result<(), ActorError>>>,
    polling_in_progress: bool,
}

impl SyncActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ActorCommand>) {
        tracing::debug!("[Actor] Started actor for {}", self.doc_id);

        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }

        tracing::debug!("[Actor] Actor for {} stopped", self.doc_id);
    }

    async fn handle(&mut self, command: ActorCommand) {
        match command {
            ActorCommand::Connect { outbound, reply } => {
                let _ = reply.send(self.connect(outbound).await);
            }
            ActorCommand::ClientUpdate { conn, update } => self.merge_client_update(conn, update),
            ActorCommand::Disconnect { conn } => {
                if self.connections.remove(conn) {
                    tracing::info!(
                        "[Actor] Connection {} left {} ({} remaining)",
                        conn,
                        self.doc_id,
                        self.connections.len()
                    );
                }
            }
            ActorCommand::ApplyResolution(resolution) => self.apply_resolution(resolution).await,
            ActorCommand::ProjectionFailed { claim, error } => self.projection_failed(claim, &error),
            ActorCommand::TriggerPolling { delay } => match self.ensure_ready().await {
                Ok(_) => self.switch_to_polling(delay).await,
                Err(e) => tracing::error!("[Actor] Cannot poll {}: {}", self.doc_id, e),
            },
            ActorCommand::Wake { generation } => self.wake(generation).await,
            ActorCommand::SaveFinished { result } => self.save_finished(result),
            ActorCommand::PollPassFinished { outstanding } => self.poll_pass_finished(outstanding).await,
            ActorCommand::Snapshot { reply } => {
                let snapshot = match self.ensure_ready().await {
                    Ok(document) => document.export_snapshot().map_err(ActorError::from),
                    Err(e) => Err(e),
                };
                let _ = reply.send(snapshot);
            }
            ActorCommand::Node { node_id, reply } => {
                let node = self.ensure_ready().await.map(|document| document.node(&node_id));
                let _ = reply.send(node);
            }
            ActorCommand::Status { reply } => {
                let _ = reply.send(ActorStatus {
                    ready: matches!(self.phase, Phase::Ready(_)),
                    connections: self.connections.len(),
                    alarm: self.alarm.armed(),
                    save_in_progress: self.save_in_progress,
                    saves_started: self.saves_started,
                    polling_in_progress: self.polling_in_progress,
                });
            }
            ActorCommand::Resume => {
                if let Err(e) = self.ensure_ready().await {
                    tracing::error!("[Actor] Failed to resume {}: {}", self.doc_id, e);
                }
            }
            ActorCommand::Flush { reply } => {
                if !matches!(self.phase, Phase::Ready(_)) {
                    let _ = reply.send(Ok(()));
                    return;
                }
                self.flush_waiters.push(reply);
                self.request_save();
            }
        }
    }

    // ------------------------------------------------------------------
    // Initialization
    // ------------------------------------------------------------------

    async fn ensure_ready(&mut self) -> Result<&CanvasDocument, ActorError> {
        if !matches!(self.phase, Phase::Ready(_)) {
            self.phase = Phase::Initializing;
            if let Err(e) = self.initialize().await {
                self.phase = Phase::Uninitialized;
                return Err(e);
            }
        }
        match &self.phase {
            Phase::Ready(document) => Ok(document),
            _ => Err(ActorError::NotReady),
        }
    }

    async fn initialize(&mut self) -> Result<(), ActorError> {
        let document = match self.context.snapshots.load(&self.doc_id).await? {
            Some(bytes) => match CanvasDocument::from_snapshot(&bytes) {
                Ok(document) => {
                    tracing::info!(
                        "[Actor] Loaded {} ({} bytes, {} nodes)",
                        self.doc_id,
                        bytes.len(),
                        document.nodes().len()
                    );
                    document
                }
                Err(e) => {
                    tracing::warn!(
                        "[Actor] Snapshot of {} could not be decoded, starting empty: {}",
                        self.doc_id,
                        e
                    );
                    CanvasDocument::new()
                }
            },
            None => {
                tracing::info!("[Actor] No snapshot for {}, starting empty", self.doc_id);
                CanvasDocument::new()
            }
        };
        self.phase = Phase::Ready(document);

        self.reconcile_tasks().await;
        self.restore_alarm().await;

        let horizon_start = Utc::now() - chrono_duration(self.context.settings.task_horizon);
        match self
            .context
            .orchestrator
            .store()
            .count_outstanding_polling(&self.doc_id, horizon_start)
            .await
        {
            Ok(0) => {}
            Ok(outstanding) => {
                tracing::info!(
                    "[Actor] {} has {} outstanding task(s), polling",
                    self.doc_id,
                    outstanding
                );
                self.switch_to_polling(self.context.settings.poll_interval).await;
            }
            Err(e) => tracing::warn!(
                "[Actor] Could not count outstanding tasks for {}: {}",
                self.doc_id,
                e
            ),
        }

        // Nodes saved before a crash may still be waiting for a claim
        self.project();
        Ok(())
    }

    /// Apply terminal tasks whose notification was missed and release
    /// markers whose task row was never written.
    async fn reconcile_tasks(&mut self) {
        let tasks = match self
            .context
            .orchestrator
            .store()
            .list_for_document(&self.doc_id)
            .await
        {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::warn!("[Actor] Could not list tasks for {}: {}", self.doc_id, e);
                return;
            }
        };

        let Phase::Ready(document) = &self.phase else {
            return;
        };

        let known: HashSet<String> = tasks.iter().map(|task| task.id.to_string()).collect();
        let orphans: Vec<(String, String)> = document
            .nodes()
            .iter()
            .filter_map(|(id, entity)| {
                let marker = NodeView::new(id, entity).marker()?;
                (!known.contains(marker)).then(|| (id.clone(), marker.to_string()))
            })
            .collect();

        let missed: Vec<TaskResolution> = tasks
            .iter()
            .filter(|task| task.status.is_terminal())
            .filter(|task| {
                document.node(&task.node_id).is_some_and(|entity| {
                    NodeView::new(&task.node_id, &entity).marker() == Some(task.id.to_string().as_str())
                })
            })
            .map(|task| task.resolution())
            .collect();

        if missed.is_empty() && orphans.is_empty() {
            return;
        }

        tracing::info!(
            "[Actor] Reconciling {} finished task(s) and {} orphaned marker(s) on {}",
            missed.len(),
            orphans.len(),
            self.doc_id
        );
        let mut changed = false;
        for (node_id, marker) in &orphans {
            tracing::warn!(
                "[Actor] Node {} on {} claimed by unknown task {}, releasing",
                node_id,
                self.doc_id,
                marker
            );
            match document.mutate(|d| d.update_node_data(node_id, &projector::release_patch())) {
                Ok((_, delta)) => changed |= delta.is_some(),
                Err(e) => tracing::error!(
                    "[Actor] Failed to release node {} on {}: {}",
                    node_id,
                    self.doc_id,
                    e
                ),
            }
        }
        for resolution in &missed {
            match document.mutate(|d| write_resolution(d, resolution)) {
                Ok((_, delta)) => changed |= delta.is_some(),
                Err(e) => tracing::error!(
                    "[Actor] Failed to reconcile task {} on {}: {}",
                    resolution.task_id,
                    self.doc_id,
                    e
                ),
            }
        }
        if changed {
            self.request_save();
        }
    }

    async fn restore_alarm(&mut self) {
        match self.context.schedules.get(&self.doc_id).await {
            Ok(Some(schedule)) => {
                let at = schedule.wake_at.max(Utc::now());
                tracing::debug!(
                    "[Actor] Restoring {} alarm for {} at {}",
                    schedule.kind,
                    self.doc_id,
                    at
                );
                self.arm(schedule.kind, at).await;
            }
            Ok(None) => self.arm_snapshot().await,
            Err(e) => {
                tracing::warn!("[Actor] Could not read schedule for {}: {}", self.doc_id, e);
                self.arm_snapshot().await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Client traffic
    // ------------------------------------------------------------------

    async fn connect(&mut self, outbound: Outbound) -> Result<ConnectionId, ActorError> {
        let snapshot = self.ensure_ready().await?.export_snapshot()?;
        outbound
            .try_send(Bytes::from(snapshot))
            .map_err(|_| ActorError::Disconnected)?;

        let conn = self.connections.add(outbound);
        tracing::info!(
            "[Actor] Connection {} joined {} ({} open)",
            conn,
            self.doc_id,
            self.connections.len()
        );
        Ok(conn)
    }

    fn merge_client_update(&mut self, conn: ConnectionId, update: Bytes) {
        let Phase::Ready(document) = &self.phase else {
            tracing::warn!("[Actor] Update for {} before load, dropped", self.doc_id);
            return;
        };

        let before = document.version();
        let merged = document.import(&update).and_then(|()| {
            if document.version() == before {
                Ok(None)
            } else {
                document.export_since(&before).map(Some)
            }
        });

        match merged {
            Ok(Some(delta)) => {
                let delivered = self.connections.broadcast(&Bytes::from(delta), Some(conn));
                tracing::debug!(
                    "[Actor] Merged {} bytes from connection {} on {}, relayed to {}",
                    update.len(),
                    conn,
                    self.doc_id,
                    delivered
                );
            }
            Ok(None) => {
                tracing::debug!("[Actor] Update from connection {} carried nothing new", conn);
                return;
            }
            Err(e) => {
                tracing::warn!(
                    "[Actor] Rejected update from connection {} on {}: {}",
                    conn,
                    self.doc_id,
                    e
                );
                return;
            }
        }

        self.project();
        self.request_save();
    }

    /// Broadcast a server-side delta to every connection
    fn publish(&mut self, delta: Option<Vec<u8>>) -> bool {
        match delta {
            Some(delta) => {
                self.connections.broadcast(&Bytes::from(delta), None);
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Projection
    // ------------------------------------------------------------------

    /// Claim every node that needs work and hand the claims to the orchestrator
    fn project(&mut self) {
        let Phase::Ready(document) = &self.phase else {
            return;
        };

        let items = projector::scan(document, self.context.settings.description_retry_limit);
        if items.is_empty() {
            return;
        }

        let claims: Vec<Claim> = items.into_iter().map(Claim::new).collect();
        let claimed = document.mutate(|d| {
            for claim in &claims {
                d.update_node_data(&claim.item.node_id, &claim.patch())?;
            }
            Ok(())
        });

        match claimed {
            Ok(((), delta)) => {
                self.publish(delta);
            }
            Err(e) => {
                tracing::error!("[Projector] Failed to claim nodes on {}: {}", self.doc_id, e);
                return;
            }
        }

        tracing::info!(
            "[Projector] Claimed {} work item(s) on {}",
            claims.len(),
            self.doc_id
        );
        self.dispatch(claims);
        self.request_save();
    }

    fn dispatch(&self, claims: Vec<Claim>) {
        let orchestrator = self.context.orchestrator.clone();
        let doc_id = self.doc_id.clone();
        let mailbox = self.mailbox.clone();
        let delay = self.context.settings.initial_poll_delay;

        tokio::spawn(async move {
            let report = projector::dispatch(&orchestrator, &doc_id, claims).await;
            let Some(tx) = mailbox.upgrade() else {
                return;
            };
            for (claim, error) in report.failed {
                let _ = tx.send(ActorCommand::ProjectionFailed { claim, error });
            }
            if report.created > 0 {
                let _ = tx.send(ActorCommand::TriggerPolling { delay });
            }
        });
    }

    fn projection_failed(&mut self, claim: Claim, error: &str) {
        let Phase::Ready(document) = &self.phase else {
            return;
        };

        let task_id = claim.task_id.to_string();
        let outcome = document.mutate(|d| {
            let Some(entity) = d.node(&claim.item.node_id) else {
                return Ok(false);
            };
            let node = NodeView::new(&claim.item.node_id, &entity);
            if node.marker() != Some(task_id.as_str()) {
                return Ok(false);
            }
            let patch = projector::submission_failure_patch(&node, claim.item.task_type, error);
            d.update_node_data(&claim.item.node_id, &patch)?;
            Ok(true)
        });

        match outcome {
            Ok((true, delta)) => {
                self.publish(delta);
                self.project();
                self.request_save();
            }
            Ok((false, _)) => tracing::debug!(
                "[Projector] Node {} no longer carries claim {}",
                claim.item.node_id,
                task_id
            ),
            Err(e) => tracing::error!(
                "[Projector] Failed to record submission failure for {}: {}",
                claim.item.node_id,
                e
            ),
        }
    }

    // ------------------------------------------------------------------
    // Task outcomes
    // ------------------------------------------------------------------

    async fn apply_resolution(&mut self, resolution: TaskResolution) {
        if resolution.document_id != self.doc_id {
            tracing::warn!(
                "[Actor] Resolution for {} delivered to {}, skipped",
                resolution.document_id,
                self.doc_id
            );
            return;
        }

        let document = match self.ensure_ready().await {
            Ok(document) => document,
            Err(e) => {
                tracing::error!(
                    "[Actor] Cannot apply task {} to {}: {}",
                    resolution.task_id,
                    self.doc_id,
                    e
                );
                return;
            }
        };

        match document.mutate(|d| write_resolution(d, &resolution)) {
            Ok((patched, delta)) => {
                tracing::info!(
                    "[Actor] Task {} ({}) -> {} on {}/{}",
                    resolution.task_id,
                    resolution.task_type,
                    resolution.status,
                    self.doc_id,
                    resolution.node_id
                );
                self.publish(delta);
                if patched {
                    self.project();
                }
                self.request_save();
            }
            Err(e) => tracing::error!(
                "[Actor] Failed to apply task {} on {}: {}",
                resolution.task_id,
                self.doc_id,
                e
            ),
        }
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    fn request_save(&mut self) {
        if !matches!(self.phase, Phase::Ready(_)) {
            return;
        }
        if self.save_in_progress {
            self.save_requested = true;
            return;
        }
        self.start_save();
    }

    fn start_save(&mut self) {
        let export = match &self.phase {
            Phase::Ready(document) => document
                .export_snapshot()
                .map(|bytes| (bytes, document.version_tag())),
            _ => return,
        };

        let (bytes, version) = match export {
            Ok(export) => export,
            Err(e) => {
                tracing::error!("[Snapshot] Failed to export {}: {}", self.doc_id, e);
                self.answer_flush(&Err(e.to_string()));
                return;
            }
        };

        self.save_in_progress = true;
        self.save_requested = false;
        self.saves_started += 1;

        let snapshots = self.context.snapshots.clone();
        let doc_id = self.doc_id.clone();
        let mailbox = self.mailbox.clone();

        tokio::spawn(async move {
            let result = match snapshots.save(&doc_id, &bytes, &version).await {
                Ok(chunks) => {
                    tracing::debug!(
                        "[Snapshot] Saved {} ({} bytes in {} chunk(s))",
                        doc_id,
                        bytes.len(),
                        chunks
                    );
                    Ok(())
                }
                Err(e) => Err(e.to_string()),
            };
            if let Some(tx) = mailbox.upgrade() {
                let _ = tx.send(ActorCommand::SaveFinished { result });
            }
        });
    }

    fn save_finished(&mut self, result: Result<(), String>) {
        self.save_in_progress = false;
        if let Err(e) = &result {
            tracing::error!("[Snapshot] Save of {} failed: {}", self.doc_id, e);
        }

        if self.save_requested {
            self.start_save();
            return;
        }
        self.answer_flush(&result);
    }

    fn answer_flush(&mut self, result: &Result<(), String>) {
        for waiter in self.flush_waiters.drain(..) {
            let answer = match result {
                Ok(()) => Ok(()),
                Err(e) => Err(ActorError::SaveFailed(e.clone())),
            };
            let _ = waiter.send(answer);
        }
    }

    // ------------------------------------------------------------------
    // Alarms
    // ------------------------------------------------------------------

    async fn arm(&mut self, kind: AlarmKind, at: DateTime<Utc>) {
        let mailbox = self.mailbox.clone();
        self.alarm.arm(kind, at, move |generation| {
            if let Some(tx) = mailbox.upgrade() {
                let _ = tx.send(ActorCommand::Wake { generation });
            }
        });

        if let Err(e) = self.context.schedules.set(&self.doc_id, kind, at).await {
            tracing::warn!(
                "[Actor] Could not persist {} alarm for {}: {}",
                kind,
                self.doc_id,
                e
            );
        }
    }

    async fn arm_snapshot(&mut self) {
        let at = Utc::now() + chrono_duration(self.context.settings.snapshot_interval);
        self.arm(AlarmKind::Snapshot, at).await;
    }

    /// Arm a polling wake-up; a sooner alarm that is already armed wins
    async fn switch_to_polling(&mut self, delay: Duration) {
        let target = self
            .alarm
            .polling_target(Utc::now() + chrono_duration(delay));
        if self.alarm.armed() == Some((AlarmKind::TaskPolling, target)) {
            return;
        }
        self.arm(AlarmKind::TaskPolling, target).await;
    }

    async fn wake(&mut self, generation: u64) {
        let Some(kind) = self.alarm.fire(generation) else {
            tracing::debug!("[Actor] Stale wake-up {} on {} ignored", generation, self.doc_id);
            return;
        };

        match kind {
            AlarmKind::Snapshot => {
                self.request_save();
                self.arm_snapshot().await;
            }
            AlarmKind::TaskPolling => self.start_poll_pass(),
        }
    }

    fn start_poll_pass(&mut self) {
        if self.polling_in_progress {
            tracing::debug!("[Actor] Poll pass already running on {}", self.doc_id);
            return;
        }
        self.polling_in_progress = true;

        let orchestrator = self.context.orchestrator.clone();
        let doc_id = self.doc_id.clone();
        let mailbox = self.mailbox.clone();

        tokio::spawn(async move {
            let outstanding = match orchestrator.poll_document(&doc_id).await {
                Ok(summary) => Some(summary.outstanding),
                Err(e) => {
                    tracing::error!("[Actor] Poll pass on {} failed: {}", doc_id, e);
                    None
                }
            };
            if let Some(tx) = mailbox.upgrade() {
                let _ = tx.send(ActorCommand::PollPassFinished { outstanding });
            }
        });
    }

    async fn poll_pass_finished(&mut self, outstanding: Option<usize>) {
        self.polling_in_progress = false;

        match outstanding {
            Some(0) => {
                if self.alarm.armed().is_none() {
                    tracing::info!(
                        "[Actor] No outstanding tasks on {}, back to periodic snapshots",
                        self.doc_id
                    );
                    self.arm_snapshot().await;
                }
            }
            _ => self.switch_to_polling(self.context.settings.poll_interval).await,
        }
    }
}

/// Patch the node (when the outcome still applies) and record the ledger entry.
///
/// Returns whether the node itself was patched.
fn write_resolution(document: &CanvasDocument, resolution: &TaskResolution) -> Result<bool, DocumentError> {
    let task_id = resolution.task_id.to_string();
    let mut patched = false;

    match document.node(&resolution.node_id) {
        Some(entity) => {
            let node = NodeView::new(&resolution.node_id, &entity);
            let applies = match node.marker() {
                Some(marker) => marker == task_id,
                None => !ledger_has_status(document, &task_id, resolution),
            };
            if applies {
                let patch = projector::resolution_patch(&node, resolution);
                document.update_node_data(&resolution.node_id, &patch)?;
                patched = true;
            } else {
                tracing::debug!(
                    "[Actor] Node {} is not waiting for task {}",
                    resolution.node_id,
                    task_id
                );
            }
        }
        None => tracing::warn!(
            "[Actor] Task {} resolved for unknown node {}",
            task_id,
            resolution.node_id
        ),
    }

    document.put_task_entry(&task_id, &ledger_entry(resolution))?;
    Ok(patched)
}

fn ledger_has_status(document: &CanvasDocument, task_id: &str, resolution: &TaskResolution) -> bool {
    document
        .task_entry(task_id)
        .and_then(|entry| entry.get("status").and_then(Value::as_str).map(str::to_string))
        .is_some_and(|status| status == resolution.status.as_str())
}

fn ledger_entry(resolution: &TaskResolution) -> Value {
    json!({
        "nodeId": resolution.node_id,
        "taskType": resolution.task_type.as_str(),
        "status": resolution.status.as_str(),
        "resultUrl": resolution.result_url,
        "error": resolution.error,
        "updatedAt": Utc::now().timestamp_millis(),
    })
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}
