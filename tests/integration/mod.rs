//! Integration tests
//!
//! - `api` - HTTP endpoints through the full router
//! - `database` - Storage against real SQLite files
//! - `realtime` - Collaboration, task pipeline and restart recovery

pub mod api;
pub mod database;
