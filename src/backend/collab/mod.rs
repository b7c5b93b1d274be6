//! Collaboration Module
//!
//! Everything that keeps one canvas document live in memory: the per-document
//! sync actor, the registry that guarantees a single actor per document id,
//! durable alarms, client fan-out and the WebSocket surface.
//!
//! # Architecture
//!
//! - **`actor`** - single-writer actor owning a document, its connections and its alarm
//! - **`registry`** - document id → actor map, orchestrator event routing, startup recovery
//! - **`alarm`** - in-process timer half of a persisted schedule row
//! - **`broadcast`** - per-document connection set with tolerant fan-out
//! - **`handlers`** - WebSocket upgrade and internal control endpoints

/// Per-document sync actor
pub mod actor;

/// Actor registry and event routing
pub mod registry;

/// Durable alarm timers
pub mod alarm;

/// Connection fan-out
pub mod broadcast;

/// HTTP and WebSocket handlers
pub mod handlers;

/// Re-export commonly used types
pub use actor::{ActorContext, ActorError, ActorSettings, ActorStatus, SyncActorHandle};
pub use handlers::{broadcast_task_completion, handle_document_socket, trigger_task_polling};
pub use registry::ActorRegistry;
