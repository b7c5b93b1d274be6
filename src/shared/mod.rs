//! Shared Module
//!
//! This module contains types and data structures that are shared between
//! the document layer, the task layer and the HTTP surface. They carry no
//! server state and are safe to use from tests and tools.
//!
//! # Overview
//!
//! - **`node`** - canvas node fields, statuses and the data-merge rule
//! - **`task`** - task records, statuses, completion modes, executor results
//! - **`error`** - shared error types
//! - **`config`** - application configuration

/// Canvas node fields and helpers
pub mod node;

/// Task types shared by the orchestrator and the HTTP surface
pub mod task;

/// Shared error types
pub mod error;

/// Application configuration
pub mod config;

/// Re-export commonly used types for convenience
pub use node::{NodeStatus, NodeView};
pub use task::{
    CompletionMode, ExecutorResult, SubmitTaskRequest, Task, TaskResolution, TaskStatus, TaskType,
};
pub use error::SharedError;
pub use config::{AppConfig, AppConfigBuilder, ConfigError, ProviderConfig};
