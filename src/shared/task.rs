//! Task Types
//!
//! A task is one durable request for external generation or analysis work.
//! Tasks live outside the shared document (in the task store) and are the
//! source of truth for work-item progress; the document only mirrors their
//! outcome onto nodes and into the `tasks` ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::shared::error::SharedError;

/// Kind of work a task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Image,
    Video,
    Description,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Description => "description",
        }
    }

    /// Generation task for a node `type`, if that node type generates anything.
    pub fn for_node_type(node_type: &str) -> Option<Self> {
        match node_type {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            _ => None,
        }
    }

    pub fn is_generation(&self) -> bool {
        !matches!(self, Self::Description)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "description" => Ok(Self::Description),
            other => Err(SharedError::unknown_variant("task type", other)),
        }
    }
}

/// Task lifecycle status. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "generating" => Ok(Self::Generating),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(SharedError::unknown_variant("task status", other)),
        }
    }
}

/// How an executor reports completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    /// `submit` returns the final result
    Sync,
    /// `submit` returns an external reference that is polled until done
    Poll,
    /// `submit` returns an external reference; the provider calls back
    Webhook,
}

impl CompletionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Poll => "poll",
            Self::Webhook => "webhook",
        }
    }
}

impl fmt::Display for CompletionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompletionMode {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(Self::Sync),
            "poll" => Ok(Self::Poll),
            "webhook" => Ok(Self::Webhook),
            other => Err(SharedError::unknown_variant("completion mode", other)),
        }
    }
}

/// Outcome reported by an executor for `submit`, `poll` or `process_webhook`.
///
/// `completed` means the work item is resolved: with `error` set it resolved
/// as a definitive failure, otherwise as a success. An unresolved result with
/// `error` set is a transient failure that costs a retry; an unresolved result
/// without an error is simply still running.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutorResult {
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl ExecutorResult {
    pub fn success_url(url: impl Into<String>) -> Self {
        Self {
            completed: true,
            result_url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn success_data(data: Value) -> Self {
        Self {
            completed: true,
            result_data: Some(data),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            completed: true,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn accepted(external_ref: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            external_ref: Some(external_ref.into()),
            provider: Some(provider.into()),
            ..Default::default()
        }
    }

    pub fn still_pending() -> Self {
        Self::default()
    }

    pub fn transient(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.completed && self.error.is_none()
    }
}

/// Durable task record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub document_id: String,
    pub node_id: String,
    pub task_type: TaskType,
    pub provider: String,
    pub completion_mode: CompletionMode,
    pub status: TaskStatus,
    pub external_ref: Option<String>,
    pub params: Value,
    pub result_url: Option<String>,
    pub result_data: Option<Value>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_poll_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn resolution(&self) -> TaskResolution {
        TaskResolution {
            document_id: self.document_id.clone(),
            node_id: self.node_id.clone(),
            task_id: self.id,
            task_type: self.task_type,
            status: self.status,
            result_url: self.result_url.clone(),
            result_data: self.result_data.clone(),
            error: self.error.clone(),
        }
    }
}

/// Request body of the submit-task endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTaskRequest {
    pub document_id: String,
    pub node_id: String,
    pub task_type: TaskType,
    #[serde(default)]
    pub params: Value,
    /// Pin the work to a named provider instead of the type's default
    #[serde(default)]
    pub provider: Option<String>,
}

/// Terminal outcome of a task, as delivered to the owning document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResolution {
    pub document_id: String,
    pub node_id: String,
    pub task_id: Uuid,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub result_url: Option<String>,
    pub result_data: Option<Value>,
    pub error: Option<String>,
}
