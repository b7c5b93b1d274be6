//! Canvas Collab - Main Library
//!
//! Real-time collaboration backend for a canvas of AI-generated media.
//! Clients edit a shared CRDT document over WebSockets; the server merges
//! and relays their deltas, persists snapshots, and turns nodes that ask for
//! generated content into durable tasks executed by external providers.
//!
//! # Module Structure
//!
//! - **`shared`** - Types with no server state
//!   - Node fields and statuses, task records, executor results
//!   - Application configuration
//!   - Shared error types
//!
//! - **`backend`** - Server-side code
//!   - Axum HTTP server and WebSocket channel
//!   - Per-document sync actors with durable alarms
//!   - Task orchestrator, executors and node projector
//!   - SQLite persistence via sqlx
//!
//! # Usage
//!
//! ```rust,no_run
//! use canvas_collab::backend::server::create_app;
//! use canvas_collab::shared::AppConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load()?;
//! let app = create_app(config).await?;
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! Each document is owned by a single actor task; nothing outside the actor
//! touches its CRDT. Shared services (stores, orchestrator, registry) are
//! cheap `Clone`/`Arc` handles.

/// Shared types and data structures
pub mod shared;

/// Backend server-side code
pub mod backend;
