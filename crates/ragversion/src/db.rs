//! SQLite connection management.
//!
//! Opens a connection pool with WAL mode so concurrent tracking workers can
//! read while one writes. The database file and its parent directories are
//! created if missing. Foreign keys are switched on for every connection
//! because the schema relies on `ON DELETE CASCADE`.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use ragversion_core::error::StorageResultExt;
use ragversion_core::{Error, Result};

use crate::config::SqliteConfig;

/// Create a connection pool for the configured database file.
pub async fn connect(config: &SqliteConfig) -> Result<SqlitePool> {
    let db_path = &config.path;

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
        .storage_context("invalid sqlite path")?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal);

    SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
        .storage_context("failed to open sqlite database")
}
