//! Executors
//!
//! An executor turns task parameters into external work and reports progress
//! as [`ExecutorResult`]s. The orchestrator never talks to a provider
//! directly; it picks an executor from the [`ExecutorRegistry`] by task type
//! or provider name and interprets the results uniformly.
//!
//! | Mode      | `submit` returns           | Completion observed via |
//! |-----------|----------------------------|-------------------------|
//! | `sync`    | the final result           | `submit` itself         |
//! | `poll`    | an external reference      | repeated `poll` calls   |
//! | `webhook` | an external reference      | `process_webhook`       |
//!
//! Executors classify failures themselves: a definitive failure is a
//! *completed* result with an error, a transient one is an uncompleted
//! result with an error (or an `Err`, which the orchestrator treats the
//! same way while polling).

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::shared::task::{CompletionMode, ExecutorResult, TaskType};

/// HTTP job-API executor
pub mod http;

/// Executor lookup by task type and provider
pub mod registry;

pub use http::HttpExecutor;
pub use registry::ExecutorRegistry;

/// Errors raised by executors
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The executor does not support this operation in its completion mode
    #[error("{provider} does not support {operation}")]
    Unsupported {
        provider: String,
        operation: &'static str,
    },

    /// The request could not be delivered or the reply could not be read
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider rejected the request outright
    #[error("provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The provider replied with something we cannot interpret
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ExecutorError {
    pub fn unsupported(provider: impl Into<String>, operation: &'static str) -> Self {
        Self::Unsupported {
            provider: provider.into(),
            operation,
        }
    }
}

/// One pluggable backend for generation or analysis work
#[async_trait]
pub trait Executor: Send + Sync {
    /// Stable provider name, stored on every task it creates
    fn provider(&self) -> &str;

    /// Task types this executor can perform
    fn task_types(&self) -> &[TaskType];

    fn completion_mode(&self) -> CompletionMode;

    /// Start work for `params`
    async fn submit(&self, params: &Value) -> Result<ExecutorResult, ExecutorError>;

    /// Check progress of previously submitted work
    async fn poll(&self, external_ref: &str) -> Result<ExecutorResult, ExecutorError> {
        let _ = external_ref;
        Err(ExecutorError::unsupported(self.provider(), "poll"))
    }

    /// Interpret a provider callback payload
    async fn process_webhook(&self, payload: &Value) -> Result<ExecutorResult, ExecutorError> {
        let _ = payload;
        Err(ExecutorError::unsupported(self.provider(), "webhooks"))
    }
}
