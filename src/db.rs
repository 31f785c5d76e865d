use std::{str::FromStr, time::Duration};

use anyhow::Context;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};

use crate::config::AppConfig;

/// Opens the pooled SQLite store and makes sure the schema is in place.
pub async fn connect(config: &AppConfig) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.database_url)
        .with_context(|| "parse DATABASE_URL")?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(config.db_busy_timeout);

    let db = SqlitePoolOptions::new()
        .max_connections(10)
        .acquire_timeout(config.db_busy_timeout + Duration::from_secs(1))
        .connect_with(options)
        .await
        .context("connect to database")?;

    create_schema_if_absent(&db).await?;
    Ok(db)
}

/// Idempotent; safe to run on every start.
pub async fn create_schema_if_absent(db: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT UNIQUE NOT NULL,
            password TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(db)
    .await
    .context("create users table")?;
    Ok(())
}

/// Single-connection in-memory store for tests. One connection keeps every
/// query on the same database.
#[cfg(test)]
pub async fn memory_pool() -> SqlitePool {
    let db = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    create_schema_if_absent(&db).await.expect("schema");
    db
}

/// File-backed pool with the production settings, for tests that need more
/// than one connection at a time.
#[cfg(test)]
pub async fn file_pool(dir: &std::path::Path) -> SqlitePool {
    let mut config = crate::state::test_config(dir);
    config.database_url = format!("sqlite://{}", dir.join("store.db").display());
    connect(&config).await.expect("file-backed sqlite")
}
