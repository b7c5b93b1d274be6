//! Tasks Module
//!
//! Durable AI-generation work items and everything that moves them through
//! their lifecycle.
//!
//! # Module Structure
//!
//! ```text
//! tasks/
//! ├── mod.rs           - Module exports
//! ├── store.rs         - Task rows in SQLite
//! ├── executor/        - Executor trait, HTTP executor, registry
//! ├── orchestrator.rs  - Task state machine, polling, webhooks
//! └── handlers.rs      - HTTP endpoints
//! ```

/// Durable task storage
pub mod store;

/// Executors and their registry
pub mod executor;

/// Task state machine
pub mod orchestrator;

/// HTTP handlers
pub mod handlers;

pub use executor::{Executor, ExecutorError, ExecutorRegistry, HttpExecutor};
pub use orchestrator::{
    OrchestratorConfig, OrchestratorError, PollSummary, TaskEvent, TaskOrchestrator,
};
pub use store::TaskStore;
