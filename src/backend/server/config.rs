/**
 * Server Configuration
 *
 * Database bootstrap for the server. Unlike optional services, the database
 * is required: snapshots, tasks and alarms all live in it, so a connection
 * or migration failure aborts startup.
 */

use sqlx::SqlitePool;

use crate::backend::persistence::connect_database;

/// Open the database pool and run migrations
///
/// In-memory URLs (`sqlite::memory:`) are accepted for tests and demos;
/// their contents vanish with the process.
pub async fn load_database(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    tracing::info!("Connecting to database...");

    let pool = connect_database(database_url).await.map_err(|e| {
        tracing::error!("Failed to open database: {}", e);
        e
    })?;

    if database_url.contains(":memory:") {
        tracing::warn!("Using an in-memory database; documents will not survive a restart");
    }
    tracing::info!("Database ready, migrations applied");
    Ok(pool)
}
