//! Durable alarm rows.
//!
//! Each document has at most one pending wake-up. The row survives restarts
//! so a recovering process can re-arm the alarm, firing immediately when the
//! stored time is already in the past.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::fmt;
use std::str::FromStr;

use super::{from_millis, to_millis, StorageError};
use crate::shared::SharedError;

/// What an alarm wakes the document up for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmKind {
    /// Periodic snapshot save
    Snapshot,
    /// Poll pass over outstanding poll-mode tasks
    TaskPolling,
}

impl AlarmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmKind::Snapshot => "snapshot",
            AlarmKind::TaskPolling => "task_polling",
        }
    }
}

impl fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlarmKind {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "snapshot" => Ok(AlarmKind::Snapshot),
            "task_polling" => Ok(AlarmKind::TaskPolling),
            other => Err(SharedError::unknown_variant("alarm kind", other)),
        }
    }
}

/// A persisted alarm
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub doc_id: String,
    pub kind: AlarmKind,
    pub wake_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ScheduleStore {
    pool: SqlitePool,
}

impl ScheduleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Replace the document's alarm
    pub async fn set(&self, doc_id: &str, kind: AlarmKind, wake_at: DateTime<Utc>) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO schedules (doc_id, kind, wake_at)
            VALUES (?, ?, ?)
            ON CONFLICT (doc_id) DO UPDATE SET
                kind = excluded.kind,
                wake_at = excluded.wake_at
            "#,
        )
        .bind(doc_id)
        .bind(kind.as_str())
        .bind(to_millis(wake_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, doc_id: &str) -> Result<Option<Schedule>, StorageError> {
        let row = sqlx::query("SELECT doc_id, kind, wake_at FROM schedules WHERE doc_id = ?")
            .bind(doc_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|row| parse_row(&row)))
    }

    pub async fn clear(&self, doc_id: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM schedules WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Every persisted alarm, soonest first
    pub async fn all(&self) -> Result<Vec<Schedule>, StorageError> {
        let rows = sqlx::query("SELECT doc_id, kind, wake_at FROM schedules ORDER BY wake_at ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().filter_map(parse_row).collect())
    }
}

fn parse_row(row: &sqlx::sqlite::SqliteRow) -> Option<Schedule> {
    let doc_id: String = row.try_get("doc_id").ok()?;
    let kind: String = row.try_get("kind").ok()?;
    let wake_at: i64 = row.try_get("wake_at").ok()?;
    match kind.parse::<AlarmKind>() {
        Ok(kind) => Some(Schedule {
            doc_id,
            kind,
            wake_at: from_millis(wake_at),
        }),
        Err(e) => {
            tracing::warn!("[Schedule] Ignoring alarm for {}: {}", doc_id, e);
            None
        }
    }
}
