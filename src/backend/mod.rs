//! Backend Module
//!
//! This module contains all server-side code: the Axum HTTP server, the
//! per-document sync actors, durable storage and the task pipeline that
//! turns canvas nodes into AI-generation work.
//!
//! # Architecture
//!
//! - **`server`** - Server initialization, application state, database bootstrap
//! - **`routes`** - HTTP route configuration and router assembly
//! - **`collab`** - Sync actors, actor registry, alarms, WebSocket handler
//! - **`crdt`** - Loro document wrapper
//! - **`persistence`** - Chunked snapshots and durable alarm rows
//! - **`tasks`** - Task store, executors, orchestrator and handlers
//! - **`projector`** - Node → work item rules and outcome patches
//! - **`error`** - HTTP-facing error type
//!
//! # Module Structure
//!
//! ```text
//! backend/
//! ├── mod.rs          - Module exports and documentation
//! ├── main.rs         - Server binary
//! ├── server/         - Server initialization and state
//! ├── routes/         - Route configuration
//! ├── collab/         - Real-time collaboration
//! ├── crdt/           - CRDT document
//! ├── persistence/    - Snapshot and schedule storage
//! ├── tasks/          - Task lifecycle
//! ├── projector/      - Node projection
//! └── error/          - Error types
//! ```
//!
//! # Data Flow
//!
//! ```text
//! client ──ws──► SyncActor ──merge──► CanvasDocument
//!                   │  ▲                    │
//!          projector│  │TaskEvent           │snapshot
//!                   ▼  │                    ▼
//!           TaskOrchestrator ──► Executor   SnapshotStore
//! ```

/// Server initialization and state
pub mod server;

/// Route configuration
pub mod routes;

/// Real-time collaboration
pub mod collab;

/// CRDT document wrapper
pub mod crdt;

/// Snapshot and schedule storage
pub mod persistence;

/// Task lifecycle
pub mod tasks;

/// Node projection rules
pub mod projector;

/// Backend-specific error types
pub mod error;
