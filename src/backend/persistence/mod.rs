//! Persistence Module
//!
//! Durable storage for document snapshots and per-document alarms. Both live
//! in the same SQLite database as the task records; the schema is created by
//! the migrations under `migrations/`.
//!
//! # Module Structure
//!
//! ```text
//! persistence/
//! ├── mod.rs             - Pool setup and timestamp helpers
//! ├── snapshot_store.rs  - Chunked snapshot storage with retries
//! └── schedule_store.rs  - Durable alarm rows
//! ```

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Chunked snapshot storage
pub mod snapshot_store;

/// Durable alarm schedule
pub mod schedule_store;

pub use schedule_store::{AlarmKind, Schedule, ScheduleStore};
pub use snapshot_store::{SnapshotMeta, SnapshotStore, StorageError, StorageRetry};

/// Open a SQLite pool and bring the schema up to date.
///
/// In-memory URLs get a single long-lived connection, otherwise each pooled
/// connection would see its own empty database.
pub async fn connect_database(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

    let mut options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(8)
    };

    let pool = pool_options.connect_with(options).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

/// Timestamps are stored as Unix milliseconds
pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default()
}
