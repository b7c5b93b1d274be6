//! Database test fixtures and utilities
//!
//! Every test gets its own SQLite database: in-memory for single-process
//! tests, a temporary file when a test needs to "restart" the server on
//! top of the same data.

use canvas_collab::backend::persistence::connect_database;
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Fresh in-memory database with migrations applied
pub async fn memory_pool() -> SqlitePool {
    connect_database("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database")
}

/// A database file that outlives individual pools
///
/// Dropping the fixture deletes the directory holding the file.
pub struct TestDatabase {
    _dir: TempDir,
    url: String,
}

impl TestDatabase {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("canvas.db").display());
        Self { _dir: dir, url }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open a new pool on the file
    pub async fn pool(&self) -> SqlitePool {
        connect_database(&self.url)
            .await
            .expect("Failed to open test database")
    }
}
