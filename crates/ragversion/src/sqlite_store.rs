//! SQLite-backed [`Store`] implementation.
//!
//! Maps every [`Store`] operation onto the schema in [`crate::migrate`].
//! Timestamps are Unix milliseconds, metadata is JSON text, and content
//! blobs carry a `compressed` flag. Cascading deletes are left to SQLite's
//! foreign keys, which [`crate::db::connect`] enables per connection.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use ragversion_core::error::StorageResultExt;
use ragversion_core::models::{
    Chunk, ChunkRecord, Document, DocumentFilter, DocumentSort, Metadata, StorageStatistics,
    Version, VersionRecord,
};
use ragversion_core::store::Store;
use ragversion_core::{Error, Result};

use crate::compress;
use crate::config::SqliteConfig;
use crate::db;
use crate::migrate;

const DOCUMENT_COLUMNS: &str = "id, file_path, file_name, file_type, file_size, content_hash, \
     created_at, updated_at, version_count, current_version, metadata";
const VERSION_COLUMNS: &str = "id, document_id, version_number, content_hash, file_size, \
     change_type, created_at, created_by, metadata";
const CHUNK_COLUMNS: &str = "id, document_id, version_id, chunk_index, content_hash, \
     token_count, created_at, metadata";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    compress: bool,
}

impl SqliteStore {
    /// Wrap an existing pool. `compress` is the default for version content.
    pub fn new(pool: SqlitePool, compress: bool) -> Self {
        Self { pool, compress }
    }

    /// Connect to the configured database file.
    pub async fn open(config: &SqliteConfig, compress: bool) -> Result<Self> {
        let pool = db::connect(config).await?;
        Ok(Self::new(pool, compress))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::storage_msg(format!("invalid stored timestamp {}", ms)))
}

fn metadata_json(metadata: &Metadata) -> Result<String> {
    serde_json::to_string(metadata).storage_context("failed to encode metadata")
}

fn parse_metadata(raw: &str) -> Result<Metadata> {
    serde_json::from_str(raw).storage_context("failed to decode stored metadata")
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let read = "failed to read document row";
    Ok(Document {
        id: row.try_get("id").storage_context(read)?,
        file_path: row.try_get("file_path").storage_context(read)?,
        file_name: row.try_get("file_name").storage_context(read)?,
        file_type: row.try_get("file_type").storage_context(read)?,
        file_size: row.try_get("file_size").storage_context(read)?,
        content_hash: row.try_get("content_hash").storage_context(read)?,
        created_at: from_millis(row.try_get("created_at").storage_context(read)?)?,
        updated_at: from_millis(row.try_get("updated_at").storage_context(read)?)?,
        version_count: row.try_get("version_count").storage_context(read)?,
        current_version: row.try_get("current_version").storage_context(read)?,
        metadata: parse_metadata(row.try_get("metadata").storage_context(read)?)?,
    })
}

fn version_from_row(row: &SqliteRow) -> Result<Version> {
    let read = "failed to read version row";
    let kind: String = row.try_get("change_type").storage_context(read)?;
    Ok(Version {
        id: row.try_get("id").storage_context(read)?,
        document_id: row.try_get("document_id").storage_context(read)?,
        version_number: row.try_get("version_number").storage_context(read)?,
        content_hash: row.try_get("content_hash").storage_context(read)?,
        file_size: row.try_get("file_size").storage_context(read)?,
        change_kind: kind.parse()?,
        created_at: from_millis(row.try_get("created_at").storage_context(read)?)?,
        created_by: row.try_get("created_by").storage_context(read)?,
        metadata: parse_metadata(row.try_get("metadata").storage_context(read)?)?,
    })
}

fn chunk_from_row(row: &SqliteRow) -> Result<Chunk> {
    let read = "failed to read chunk row";
    Ok(Chunk {
        id: row.try_get("id").storage_context(read)?,
        document_id: row.try_get("document_id").storage_context(read)?,
        version_id: row.try_get("version_id").storage_context(read)?,
        chunk_index: row.try_get("chunk_index").storage_context(read)?,
        content_hash: row.try_get("content_hash").storage_context(read)?,
        token_count: row.try_get("token_count").storage_context(read)?,
        created_at: from_millis(row.try_get("created_at").storage_context(read)?)?,
        metadata: parse_metadata(row.try_get("metadata").storage_context(read)?)?,
    })
}

/// Decode a `(content, compressed)` row.
fn content_from_row(row: &SqliteRow) -> Result<String> {
    let read = "failed to read content row";
    let bytes: Vec<u8> = row.try_get("content").storage_context(read)?;
    let compressed: bool = row.try_get("compressed").storage_context(read)?;
    compress::decode(&bytes, compressed)
}

async fn insert_document(tx: &mut Transaction<'_, Sqlite>, doc: &Document) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO documents (id, file_path, file_name, file_type, file_size, content_hash,
                               created_at, updated_at, version_count, current_version, metadata)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&doc.id)
    .bind(&doc.file_path)
    .bind(&doc.file_name)
    .bind(&doc.file_type)
    .bind(doc.file_size)
    .bind(&doc.content_hash)
    .bind(millis(&doc.created_at))
    .bind(millis(&doc.updated_at))
    .bind(doc.version_count)
    .bind(doc.current_version)
    .bind(metadata_json(&doc.metadata)?)
    .execute(&mut **tx)
    .await
    .storage_context("failed to insert document")?;
    Ok(())
}

/// Overwrites the mutable columns. Unknown ids are `DocumentNotFound`.
async fn update_document_row(tx: &mut Transaction<'_, Sqlite>, doc: &Document) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE documents SET
            file_path = ?, file_name = ?, file_type = ?, file_size = ?,
            content_hash = ?, updated_at = ?, version_count = ?,
            current_version = ?, metadata = ?
        WHERE id = ?
        "#,
    )
    .bind(&doc.file_path)
    .bind(&doc.file_name)
    .bind(&doc.file_type)
    .bind(doc.file_size)
    .bind(&doc.content_hash)
    .bind(millis(&doc.updated_at))
    .bind(doc.version_count)
    .bind(doc.current_version)
    .bind(metadata_json(&doc.metadata)?)
    .bind(&doc.id)
    .execute(&mut **tx)
    .await
    .storage_context("failed to update document")?;

    if result.rows_affected() == 0 {
        return Err(Error::DocumentNotFound(doc.id.clone()));
    }
    Ok(())
}

async fn insert_version(tx: &mut Transaction<'_, Sqlite>, version: &Version) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO versions (id, document_id, version_number, content_hash, file_size,
                              change_type, created_at, created_by, metadata)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&version.id)
    .bind(&version.document_id)
    .bind(version.version_number)
    .bind(&version.content_hash)
    .bind(version.file_size)
    .bind(version.change_kind.as_str())
    .bind(millis(&version.created_at))
    .bind(&version.created_by)
    .bind(metadata_json(&version.metadata)?)
    .execute(&mut **tx)
    .await
    .storage_context("failed to insert version")?;
    Ok(())
}

async fn upsert_content(
    tx: &mut Transaction<'_, Sqlite>,
    version_id: &str,
    content: &str,
    compress: bool,
) -> Result<()> {
    let (bytes, compressed) = compress::encode(content, compress)?;
    sqlx::query(
        r#"
        INSERT INTO content_snapshots (version_id, content, compressed, original_size)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(version_id) DO UPDATE SET
            content = excluded.content,
            compressed = excluded.compressed,
            original_size = excluded.original_size
        "#,
    )
    .bind(version_id)
    .bind(bytes)
    .bind(compressed)
    .bind(content.len() as i64)
    .execute(&mut **tx)
    .await
    .storage_context("failed to store content")?;
    Ok(())
}

async fn insert_chunk(tx: &mut Transaction<'_, Sqlite>, chunk: &Chunk) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO chunks (id, document_id, version_id, chunk_index, content_hash,
                            token_count, created_at, metadata)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&chunk.id)
    .bind(&chunk.document_id)
    .bind(&chunk.version_id)
    .bind(chunk.chunk_index)
    .bind(&chunk.content_hash)
    .bind(chunk.token_count)
    .bind(millis(&chunk.created_at))
    .bind(metadata_json(&chunk.metadata)?)
    .execute(&mut **tx)
    .await
    .storage_context("failed to insert chunk")?;
    Ok(())
}

async fn upsert_chunk_content(
    tx: &mut Transaction<'_, Sqlite>,
    chunk_id: &str,
    text: &str,
    compress: bool,
) -> Result<()> {
    let (bytes, compressed) = compress::encode(text, compress)?;
    sqlx::query(
        r#"
        INSERT INTO chunk_content (chunk_id, content, compressed)
        VALUES (?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            content = excluded.content,
            compressed = excluded.compressed
        "#,
    )
    .bind(chunk_id)
    .bind(bytes)
    .bind(compressed)
    .execute(&mut **tx)
    .await
    .storage_context("failed to store chunk content")?;
    Ok(())
}

/// JSON path for a top-level metadata key.
fn json_key_path(key: &str) -> String {
    format!("$.\"{}\"", key.replace('\\', "\\\\").replace('"', "\\\""))
}

#[async_trait]
impl Store for SqliteStore {
    async fn initialize(&self) -> Result<()> {
        migrate::run_migrations(&self.pool).await
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    async fn health_check(&self) -> bool {
        if self.pool.is_closed() {
            return false;
        }
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    async fn create_document(&self, doc: &Document) -> Result<()> {
        let mut tx = self.pool.begin().await.storage_context("failed to begin transaction")?;
        insert_document(&mut tx, doc).await?;
        tx.commit().await.storage_context("failed to commit document")?;
        Ok(())
    }

    async fn batch_create_documents(&self, docs: &[Document]) -> Result<()> {
        let mut tx = self.pool.begin().await.storage_context("failed to begin transaction")?;
        for doc in docs {
            insert_document(&mut tx, doc).await?;
        }
        tx.commit().await.storage_context("failed to commit documents")?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let sql = format!("SELECT {} FROM documents WHERE id = ?", DOCUMENT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .storage_context("failed to get document")?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn get_document_by_path(&self, file_path: &str) -> Result<Option<Document>> {
        let sql = format!("SELECT {} FROM documents WHERE file_path = ?", DOCUMENT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(file_path)
            .fetch_optional(&self.pool)
            .await
            .storage_context("failed to get document by path")?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn update_document(&self, doc: &Document) -> Result<()> {
        let mut tx = self.pool.begin().await.storage_context("failed to begin transaction")?;
        update_document_row(&mut tx, doc).await?;
        tx.commit().await.storage_context("failed to commit document")?;
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .storage_context("failed to delete document")?;
        Ok(())
    }

    async fn list_documents(
        &self,
        limit: i64,
        offset: i64,
        sort: DocumentSort,
    ) -> Result<Vec<Document>> {
        let sql = format!(
            "SELECT {} FROM documents ORDER BY {} DESC LIMIT ? OFFSET ?",
            DOCUMENT_COLUMNS,
            sort.column()
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .storage_context("failed to list documents")?;
        rows.iter().map(document_from_row).collect()
    }

    async fn search_documents(&self, filter: &DocumentFilter) -> Result<Vec<Document>> {
        let mut conditions: Vec<&str> = Vec::new();
        let mut binds: Vec<String> = Vec::new();

        for (key, value) in &filter.metadata {
            conditions.push("json_extract(metadata, ?) IS json_extract(?, '$')");
            binds.push(json_key_path(key));
            binds.push(serde_json::to_string(value).storage_context("failed to encode filter")?);
        }
        if let Some(file_type) = &filter.file_type {
            conditions.push("file_type = ?");
            binds.push(file_type.clone());
        }

        let mut sql = format!("SELECT {} FROM documents", DOCUMENT_COLUMNS);
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY updated_at DESC");

        let mut query = sqlx::query(&sql);
        for value in &binds {
            query = query.bind(value);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .storage_context("failed to search documents")?;
        rows.iter().map(document_from_row).collect()
    }

    async fn create_version(&self, version: &Version, content: Option<&str>) -> Result<()> {
        let mut tx = self.pool.begin().await.storage_context("failed to begin transaction")?;
        insert_version(&mut tx, version).await?;
        if let Some(text) = content {
            upsert_content(&mut tx, &version.id, text, self.compress).await?;
        }
        tx.commit().await.storage_context("failed to commit version")?;
        Ok(())
    }

    async fn create_document_with_version(
        &self,
        doc: &Document,
        version: &Version,
        content: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.storage_context("failed to begin transaction")?;
        insert_document(&mut tx, doc).await?;
        insert_version(&mut tx, version).await?;
        if let Some(text) = content {
            upsert_content(&mut tx, &version.id, text, self.compress).await?;
        }
        tx.commit().await.storage_context("failed to commit document")?;
        Ok(())
    }

    async fn append_version(
        &self,
        doc: &Document,
        version: &Version,
        content: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.storage_context("failed to begin transaction")?;
        update_document_row(&mut tx, doc).await?;
        insert_version(&mut tx, version).await?;
        if let Some(text) = content {
            upsert_content(&mut tx, &version.id, text, self.compress).await?;
        }
        tx.commit().await.storage_context("failed to commit version")?;
        Ok(())
    }

    async fn batch_create_versions(&self, records: &[VersionRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await.storage_context("failed to begin transaction")?;
        for record in records {
            insert_version(&mut tx, &record.version).await?;
            if let Some(text) = &record.content {
                upsert_content(&mut tx, &record.version.id, text, self.compress).await?;
            }
        }
        tx.commit().await.storage_context("failed to commit versions")?;
        Ok(())
    }

    async fn get_version(&self, id: &str) -> Result<Option<Version>> {
        let sql = format!("SELECT {} FROM versions WHERE id = ?", VERSION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .storage_context("failed to get version")?;
        row.as_ref().map(version_from_row).transpose()
    }

    async fn get_version_by_number(
        &self,
        document_id: &str,
        version_number: i64,
    ) -> Result<Option<Version>> {
        let sql = format!(
            "SELECT {} FROM versions WHERE document_id = ? AND version_number = ?",
            VERSION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(document_id)
            .bind(version_number)
            .fetch_optional(&self.pool)
            .await
            .storage_context("failed to get version by number")?;
        row.as_ref().map(version_from_row).transpose()
    }

    async fn list_versions(
        &self,
        document_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Version>> {
        let sql = format!(
            "SELECT {} FROM versions WHERE document_id = ? \
             ORDER BY version_number DESC LIMIT ? OFFSET ?",
            VERSION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(document_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .storage_context("failed to list versions")?;
        rows.iter().map(version_from_row).collect()
    }

    async fn delete_version(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM versions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .storage_context("failed to delete version")?;
        Ok(())
    }

    async fn get_latest_version(&self, document_id: &str) -> Result<Option<Version>> {
        let sql = format!(
            "SELECT {} FROM versions WHERE document_id = ? ORDER BY version_number DESC LIMIT 1",
            VERSION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .storage_context("failed to get latest version")?;
        row.as_ref().map(version_from_row).transpose()
    }

    async fn store_content(&self, version_id: &str, content: &str, compress: bool) -> Result<()> {
        let mut tx = self.pool.begin().await.storage_context("failed to begin transaction")?;
        upsert_content(&mut tx, version_id, content, compress).await?;
        tx.commit().await.storage_context("failed to commit content")?;
        Ok(())
    }

    async fn get_content(&self, version_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT content, compressed FROM content_snapshots WHERE version_id = ?")
            .bind(version_id)
            .fetch_optional(&self.pool)
            .await
            .storage_context("failed to get content")?;
        row.as_ref().map(content_from_row).transpose()
    }

    async fn delete_content(&self, version_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM content_snapshots WHERE version_id = ?")
            .bind(version_id)
            .execute(&self.pool)
            .await
            .storage_context("failed to delete content")?;
        Ok(())
    }

    async fn create_chunk(&self, chunk: &Chunk, text: Option<&str>) -> Result<()> {
        let mut tx = self.pool.begin().await.storage_context("failed to begin transaction")?;
        insert_chunk(&mut tx, chunk).await?;
        if let Some(text) = text {
            upsert_chunk_content(&mut tx, &chunk.id, text, self.compress).await?;
        }
        tx.commit().await.storage_context("failed to commit chunk")?;
        Ok(())
    }

    async fn batch_create_chunks(&self, records: &[ChunkRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await.storage_context("failed to begin transaction")?;
        for record in records {
            insert_chunk(&mut tx, &record.chunk).await?;
            if let Some(text) = &record.text {
                upsert_chunk_content(&mut tx, &record.chunk.id, text, self.compress).await?;
            }
        }
        tx.commit().await.storage_context("failed to commit chunks")?;
        Ok(())
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let sql = format!("SELECT {} FROM chunks WHERE id = ?", CHUNK_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .storage_context("failed to get chunk")?;
        row.as_ref().map(chunk_from_row).transpose()
    }

    async fn get_chunks_by_version(&self, version_id: &str) -> Result<Vec<Chunk>> {
        let sql = format!(
            "SELECT {} FROM chunks WHERE version_id = ? ORDER BY chunk_index",
            CHUNK_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(version_id)
            .fetch_all(&self.pool)
            .await
            .storage_context("failed to get chunks")?;
        rows.iter().map(chunk_from_row).collect()
    }

    async fn store_chunk_content(&self, chunk_id: &str, text: &str, compress: bool) -> Result<()> {
        let mut tx = self.pool.begin().await.storage_context("failed to begin transaction")?;
        upsert_chunk_content(&mut tx, chunk_id, text, compress).await?;
        tx.commit().await.storage_context("failed to commit chunk content")?;
        Ok(())
    }

    async fn get_chunk_content(&self, chunk_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT content, compressed FROM chunk_content WHERE chunk_id = ?")
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await
            .storage_context("failed to get chunk content")?;
        row.as_ref().map(content_from_row).transpose()
    }

    async fn delete_chunk_content(&self, chunk_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunk_content WHERE chunk_id = ?")
            .bind(chunk_id)
            .execute(&self.pool)
            .await
            .storage_context("failed to delete chunk content")?;
        Ok(())
    }

    async fn delete_chunks_by_version(&self, version_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE version_id = ?")
            .bind(version_id)
            .execute(&self.pool)
            .await
            .storage_context("failed to delete chunks")?;
        Ok(result.rows_affected())
    }

    async fn cleanup_by_age(&self, days: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(days);
        let result = sqlx::query("DELETE FROM versions WHERE created_at < ?")
            .bind(millis(&cutoff))
            .execute(&self.pool)
            .await
            .storage_context("failed to clean up old versions")?;
        Ok(result.rows_affected())
    }

    async fn get_statistics(&self) -> Result<StorageStatistics> {
        let ctx = "failed to compute statistics";

        let total_documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .storage_context(ctx)?;
        let total_versions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM versions")
            .fetch_one(&self.pool)
            .await
            .storage_context(ctx)?;
        let total_storage_bytes: Option<i64> =
            sqlx::query_scalar("SELECT SUM(file_size) FROM documents")
                .fetch_one(&self.pool)
                .await
                .storage_context(ctx)?;

        let mut documents_by_file_type = BTreeMap::new();
        let rows = sqlx::query("SELECT file_type, COUNT(*) AS n FROM documents GROUP BY file_type")
            .fetch_all(&self.pool)
            .await
            .storage_context(ctx)?;
        for row in &rows {
            let file_type: String = row.try_get("file_type").storage_context(ctx)?;
            let n: i64 = row.try_get("n").storage_context(ctx)?;
            documents_by_file_type.insert(file_type, n);
        }

        let week_ago = Utc::now() - Duration::days(7);
        let recent_activity_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM versions WHERE created_at >= ?")
                .bind(millis(&week_ago))
                .fetch_one(&self.pool)
                .await
                .storage_context(ctx)?;

        let row = sqlx::query("SELECT MIN(created_at) AS oldest, MAX(created_at) AS newest FROM documents")
            .fetch_one(&self.pool)
            .await
            .storage_context(ctx)?;
        let oldest: Option<i64> = row.try_get("oldest").storage_context(ctx)?;
        let newest: Option<i64> = row.try_get("newest").storage_context(ctx)?;

        Ok(StorageStatistics {
            total_documents,
            total_versions,
            total_storage_bytes: total_storage_bytes.unwrap_or(0),
            average_versions_per_document: if total_documents > 0 {
                total_versions as f64 / total_documents as f64
            } else {
                0.0
            },
            documents_by_file_type,
            recent_activity_count,
            oldest_document_date: oldest.map(from_millis).transpose()?,
            newest_document_date: newest.map(from_millis).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_key_path_escapes_quotes() {
        assert_eq!(json_key_path("team"), "$.\"team\"");
        assert_eq!(json_key_path("a\"b"), "$.\"a\\\"b\"");
    }

    #[test]
    fn test_millis_roundtrip_precision() {
        let now = Utc::now();
        let restored = from_millis(millis(&now)).unwrap();
        assert_eq!(restored.timestamp_millis(), now.timestamp_millis());
    }
}
