//! SQLite schema.
//!
//! All statements are `IF NOT EXISTS`, so running migrations on every
//! startup is safe. Timestamps are stored as Unix milliseconds; metadata as
//! JSON text. Content tables hold BLOBs with a `compressed` flag so
//! compressed and plain rows can coexist after a configuration change.

use sqlx::SqlitePool;

use ragversion_core::error::StorageResultExt;
use ragversion_core::Result;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        file_path TEXT NOT NULL UNIQUE,
        file_name TEXT NOT NULL,
        file_type TEXT NOT NULL,
        file_size INTEGER NOT NULL,
        content_hash TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        version_count INTEGER NOT NULL DEFAULT 1,
        current_version INTEGER NOT NULL DEFAULT 1,
        metadata TEXT NOT NULL DEFAULT '{}'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS versions (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        version_number INTEGER NOT NULL,
        content_hash TEXT NOT NULL,
        file_size INTEGER,
        change_type TEXT NOT NULL
            CHECK (change_type IN ('created', 'modified', 'deleted', 'restored')),
        created_at INTEGER NOT NULL,
        created_by TEXT,
        metadata TEXT NOT NULL DEFAULT '{}',
        UNIQUE(document_id, version_number),
        FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS content_snapshots (
        version_id TEXT PRIMARY KEY,
        content BLOB NOT NULL,
        compressed INTEGER NOT NULL DEFAULT 0,
        original_size INTEGER NOT NULL,
        FOREIGN KEY (version_id) REFERENCES versions(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunks (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        version_id TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        content_hash TEXT NOT NULL,
        token_count INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}',
        UNIQUE(version_id, chunk_index),
        FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE,
        FOREIGN KEY (version_id) REFERENCES versions(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunk_content (
        chunk_id TEXT PRIMARY KEY,
        content BLOB NOT NULL,
        compressed INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (chunk_id) REFERENCES chunks(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_documents_file_path ON documents(file_path)",
    "CREATE INDEX IF NOT EXISTS idx_documents_content_hash ON documents(content_hash)",
    "CREATE INDEX IF NOT EXISTS idx_versions_document_number ON versions(document_id, version_number)",
    "CREATE INDEX IF NOT EXISTS idx_versions_created_at ON versions(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_document_version ON chunks(document_id, version_id)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_version ON chunks(version_id)",
];

/// Create all tables and indexes.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .storage_context("failed to apply schema")?;
    }
    Ok(())
}
