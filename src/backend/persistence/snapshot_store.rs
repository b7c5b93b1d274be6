/**
 * Snapshot Persistence
 *
 * This module persists binary document snapshots in SQLite. A single
 * snapshot can exceed what we want to write in one row, so it is split into
 * fixed-size chunks that are rewritten as a complete set inside one
 * transaction: readers see either the old chunk set or the new one, never a
 * mix.
 *
 * # Tables
 *
 * - `snapshot_chunks (doc_id, chunk_index, data)`
 * - `snapshot_meta (doc_id, version, chunk_count, byte_len, updated_at, legacy_snapshot)`
 *
 * # Retries
 *
 * Loads and saves are idempotent, so transient failures (I/O, pool timeouts,
 * SQLITE_BUSY/LOCKED) are retried with linear backoff. Anything else aborts
 * on the first attempt.
 */

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::backend::persistence::{from_millis, to_millis};

/// Errors surfaced by the persistence layer
#[derive(Debug, Error)]
pub enum StorageError {
    /// A non-transient database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A transient error that persisted through every attempt
    #[error("{operation} failed after {attempts} attempts: {source}")]
    Exhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    /// A stored row that no longer decodes into its record type
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Bounded retry policy for idempotent storage operations
#[derive(Debug, Clone, Copy)]
pub struct StorageRetry {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for StorageRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

impl StorageRetry {
    /// Run `op` until it succeeds, fails permanently, or the budget runs out
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if is_transient(&e) && attempt < attempts => {
                    tracing::warn!(
                        "[Snapshot] {} attempt {}/{} failed, retrying: {}",
                        operation,
                        attempt,
                        attempts,
                        e
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) if is_transient(&e) => {
                    return Err(StorageError::Exhausted {
                        operation,
                        attempts,
                        source: e,
                    })
                }
                Err(e) => return Err(StorageError::Database(e)),
            }
        }
    }
}

/// Whether a database error is worth retrying
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => {
            // SQLITE_BUSY (5) and SQLITE_LOCKED (6), including extended codes
            let code_is_busy = db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| matches!(code & 0xff, 5 | 6))
                .unwrap_or(false);
            let message = db.message().to_ascii_lowercase();
            code_is_busy || message.contains("database is locked") || message.contains("busy")
        }
        _ => false,
    }
}

/// Split `bytes` into chunks of at most `chunk_size` bytes
pub fn split_chunks(bytes: &[u8], chunk_size: usize) -> Vec<&[u8]> {
    bytes.chunks(chunk_size.max(1)).collect()
}

/// Metadata row for a stored snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotMeta {
    pub version: String,
    pub chunk_count: i64,
    pub byte_len: i64,
    pub updated_at: chrono::DateTime<Utc>,
}

/// Chunked snapshot store
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    pool: SqlitePool,
    chunk_size: usize,
    retry: StorageRetry,
}

impl SnapshotStore {
    pub fn new(pool: SqlitePool, chunk_size: usize, retry: StorageRetry) -> Self {
        Self {
            pool,
            chunk_size: chunk_size.max(1),
            retry,
        }
    }

    /// Load the snapshot for `doc_id`; `Ok(None)` means none was ever saved
    pub async fn load(&self, doc_id: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.retry.run("load", || self.read_snapshot(doc_id)).await
    }

    /// Replace the stored snapshot for `doc_id`. Returns the chunk count.
    pub async fn save(&self, doc_id: &str, bytes: &[u8], version: &str) -> Result<usize, StorageError> {
        let chunks = split_chunks(bytes, self.chunk_size);
        let written = self
            .retry
            .run("save", || self.write_chunks(doc_id, &chunks, bytes.len(), version))
            .await?;
        tracing::debug!(
            "[Snapshot] Saved {} ({} bytes in {} chunks)",
            doc_id,
            bytes.len(),
            written
        );
        Ok(written)
    }

    /// Metadata for the stored snapshot, if any
    pub async fn metadata(&self, doc_id: &str) -> Result<Option<SnapshotMeta>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT version, chunk_count, byte_len, updated_at
            FROM snapshot_meta
            WHERE doc_id = ?
            "#,
        )
        .bind(doc_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<SnapshotMeta, sqlx::Error> {
            Ok(SnapshotMeta {
                version: row.try_get("version")?,
                chunk_count: row.try_get("chunk_count")?,
                byte_len: row.try_get("byte_len")?,
                updated_at: from_millis(row.try_get("updated_at")?),
            })
        })
        .transpose()
        .map_err(StorageError::from)
    }

    /// Number of chunk rows currently stored for `doc_id`
    pub async fn chunk_count(&self, doc_id: &str) -> Result<i64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM snapshot_chunks WHERE doc_id = ?")
            .bind(doc_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Write a single-blob snapshot in the pre-chunking layout
    pub async fn write_legacy(&self, doc_id: &str, bytes: &[u8]) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO snapshot_meta (doc_id, updated_at, legacy_snapshot)
            VALUES (?, ?, ?)
            ON CONFLICT (doc_id) DO UPDATE SET
                legacy_snapshot = excluded.legacy_snapshot,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(doc_id)
        .bind(to_millis(Utc::now()))
        .bind(bytes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn read_snapshot(&self, doc_id: &str) -> Result<Option<Vec<u8>>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT data
            FROM snapshot_chunks
            WHERE doc_id = ?
            ORDER BY chunk_index ASC
            "#,
        )
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await?;

        if !rows.is_empty() {
            let mut bytes = Vec::new();
            for row in rows {
                let chunk: Vec<u8> = row.try_get("data")?;
                bytes.extend_from_slice(&chunk);
            }
            return Ok(Some(bytes));
        }

        let legacy: Option<Option<Vec<u8>>> =
            sqlx::query_scalar("SELECT legacy_snapshot FROM snapshot_meta WHERE doc_id = ?")
                .bind(doc_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(legacy.flatten().filter(|bytes| !bytes.is_empty()))
    }

    async fn write_chunks(
        &self,
        doc_id: &str,
        chunks: &[&[u8]],
        byte_len: usize,
        version: &str,
    ) -> Result<usize, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM snapshot_chunks WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        for (index, chunk) in chunks.iter().enumerate() {
            sqlx::query("INSERT INTO snapshot_chunks (doc_id, chunk_index, data) VALUES (?, ?, ?)")
                .bind(doc_id)
                .bind(index as i64)
                .bind(*chunk)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO snapshot_meta (doc_id, version, chunk_count, byte_len, updated_at, legacy_snapshot)
            VALUES (?, ?, ?, ?, ?, NULL)
            ON CONFLICT (doc_id) DO UPDATE SET
                version = excluded.version,
                chunk_count = excluded.chunk_count,
                byte_len = excluded.byte_len,
                updated_at = excluded.updated_at,
                legacy_snapshot = NULL
            "#,
        )
        .bind(doc_id)
        .bind(version)
        .bind(chunks.len() as i64)
        .bind(byte_len as i64)
        .bind(to_millis(Utc::now()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(chunks.len())
    }
}
