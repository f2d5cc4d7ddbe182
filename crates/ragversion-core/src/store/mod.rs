//! Storage abstraction for RAGVersion.
//!
//! The [`Store`] trait defines every persistence operation the change
//! detector, chunk detector and tracker need, so backends (SQLite, a remote
//! REST service, in-memory) are interchangeable. All conforming backends
//! must be behaviourally indistinguishable through this interface.
//!
//! Implementations must be `Send + Sync`: one handle is shared across all
//! workers of a directory run.
//!
//! # Cascades
//!
//! Deleting a document removes its versions, content blobs, chunks and
//! chunk content. Deleting a version removes its content blob, chunks and
//! chunk content.
//!
//! # Errors
//!
//! Backend I/O failures surface as [`Error::Storage`](crate::error::Error::Storage).
//! Lookups of absent records return `Ok(None)`; only updates of unknown
//! documents fail with `DocumentNotFound`.

pub mod memory;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::line_diff::{unified_diff, DEFAULT_CONTEXT};
use crate::models::{
    Chunk, ChunkRecord, DiffResult, Document, DocumentFilter, DocumentSort, DocumentStatistics,
    StorageStatistics, Version, VersionRecord,
};

/// Upper bound used when an operation needs a document's full history.
pub const ALL_VERSIONS: i64 = 10_000;

/// Abstract storage backend.
///
/// | Group | Methods |
/// |-------|---------|
/// | Lifecycle | [`initialize`](Store::initialize), [`close`](Store::close), [`health_check`](Store::health_check) |
/// | Documents | create, batch create, get, get by path, update, delete, list, search |
/// | Versions | create, batch create, get, get by number, list, delete, latest |
/// | Tracking | [`create_document_with_version`](Store::create_document_with_version), [`append_version`](Store::append_version) |
/// | Content | [`store_content`](Store::store_content), [`get_content`](Store::get_content), [`delete_content`](Store::delete_content) |
/// | Chunks | create, batch create, get, by version, chunk content, delete by version |
/// | Maintenance | [`compute_diff`](Store::compute_diff), cleanup, statistics |
#[async_trait]
pub trait Store: Send + Sync {
    /// Create tables or verify connectivity. Safe to call more than once.
    async fn initialize(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    async fn health_check(&self) -> bool;

    async fn create_document(&self, doc: &Document) -> Result<()>;

    /// Insert all documents or none.
    async fn batch_create_documents(&self, docs: &[Document]) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    async fn get_document_by_path(&self, file_path: &str) -> Result<Option<Document>>;

    /// Overwrite a document's mutable fields. Unknown ids are an error.
    async fn update_document(&self, doc: &Document) -> Result<()>;

    /// Delete a document and everything beneath it. Unknown ids are a no-op.
    async fn delete_document(&self, id: &str) -> Result<()>;

    /// Page through documents, sorted descending by `sort`.
    async fn list_documents(
        &self,
        limit: i64,
        offset: i64,
        sort: DocumentSort,
    ) -> Result<Vec<Document>>;

    async fn search_documents(&self, filter: &DocumentFilter) -> Result<Vec<Document>>;

    /// Insert a version, storing `content` with the backend's default
    /// compression when given.
    async fn create_version(&self, version: &Version, content: Option<&str>) -> Result<()>;

    /// Insert all versions (and their content) or none.
    async fn batch_create_versions(&self, records: &[VersionRecord]) -> Result<()>;

    async fn get_version(&self, id: &str) -> Result<Option<Version>>;

    async fn get_version_by_number(
        &self,
        document_id: &str,
        version_number: i64,
    ) -> Result<Option<Version>>;

    /// Versions of a document, newest first.
    async fn list_versions(
        &self,
        document_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Version>>;

    async fn delete_version(&self, id: &str) -> Result<()>;

    async fn get_latest_version(&self, document_id: &str) -> Result<Option<Version>>;

    async fn store_content(&self, version_id: &str, content: &str, compress: bool) -> Result<()>;

    /// Stored text for a version, decompressed.
    async fn get_content(&self, version_id: &str) -> Result<Option<String>>;

    async fn delete_content(&self, version_id: &str) -> Result<()>;

    async fn create_chunk(&self, chunk: &Chunk, text: Option<&str>) -> Result<()>;

    /// Insert all chunks (and their text) or none.
    async fn batch_create_chunks(&self, records: &[ChunkRecord]) -> Result<()>;

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>>;

    /// Chunks of a version ordered by `chunk_index`.
    async fn get_chunks_by_version(&self, version_id: &str) -> Result<Vec<Chunk>>;

    async fn store_chunk_content(&self, chunk_id: &str, text: &str, compress: bool) -> Result<()>;

    async fn get_chunk_content(&self, chunk_id: &str) -> Result<Option<String>>;

    async fn delete_chunk_content(&self, chunk_id: &str) -> Result<()>;

    /// Returns the number of chunks removed.
    async fn delete_chunks_by_version(&self, version_id: &str) -> Result<u64>;

    /// Delete every version created more than `days` days ago.
    async fn cleanup_by_age(&self, days: i64) -> Result<u64>;

    async fn get_statistics(&self) -> Result<StorageStatistics>;

    /// Insert a new document together with its first version. Either both
    /// are stored or neither.
    ///
    /// The default removes the document again when the version insert
    /// fails. Backends with transactions override it.
    async fn create_document_with_version(
        &self,
        doc: &Document,
        version: &Version,
        content: Option<&str>,
    ) -> Result<()> {
        self.create_document(doc).await?;
        if let Err(e) = self.create_version(version, content).await {
            if let Err(rollback) = self.delete_document(&doc.id).await {
                tracing::error!(
                    document_id = %doc.id,
                    error = %rollback,
                    "failed to remove document after its first version was rejected"
                );
            }
            return Err(e);
        }
        Ok(())
    }

    /// Insert a follow-up version and write the document's new counters.
    /// Either both are stored or neither.
    ///
    /// The default removes the version again when the document update
    /// fails. Backends with transactions override it.
    async fn append_version(
        &self,
        doc: &Document,
        version: &Version,
        content: Option<&str>,
    ) -> Result<()> {
        self.create_version(version, content).await?;
        if let Err(e) = self.update_document(doc).await {
            if let Err(rollback) = self.delete_version(&version.id).await {
                tracing::error!(
                    document_id = %doc.id,
                    version_id = %version.id,
                    error = %rollback,
                    "failed to remove version after document update was rejected"
                );
            }
            return Err(e);
        }
        Ok(())
    }

    /// Chunks of a version with their stored text.
    async fn get_chunks_with_content(&self, version_id: &str) -> Result<Vec<ChunkRecord>> {
        let chunks = self.get_chunks_by_version(version_id).await?;
        let mut records = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let text = self.get_chunk_content(&chunk.id).await?;
            records.push(ChunkRecord { chunk, text });
        }
        Ok(records)
    }

    /// Line diff between two versions' stored content.
    ///
    /// Returns `None` when either version or either content blob is missing.
    async fn compute_diff(
        &self,
        document_id: &str,
        from_version: i64,
        to_version: i64,
    ) -> Result<Option<DiffResult>> {
        let from = self.get_version_by_number(document_id, from_version).await?;
        let to = self.get_version_by_number(document_id, to_version).await?;
        let (Some(from), Some(to)) = (from, to) else {
            return Ok(None);
        };

        let from_content = self.get_content(&from.id).await?;
        let to_content = self.get_content(&to.id).await?;
        let (Some(from_content), Some(to_content)) = (from_content, to_content) else {
            return Ok(None);
        };

        let diff = unified_diff(
            &from_content,
            &to_content,
            &format!("v{}", from_version),
            &format!("v{}", to_version),
            DEFAULT_CONTEXT,
        );

        Ok(Some(DiffResult {
            document_id: document_id.to_string(),
            from_version,
            to_version,
            diff_text: diff.text,
            additions: diff.additions,
            deletions: diff.deletions,
            from_hash: from.content_hash,
            to_hash: to.content_hash,
        }))
    }

    /// Keep the `keep_count` newest versions of a document, deleting the rest.
    async fn cleanup_old_versions(&self, document_id: &str, keep_count: usize) -> Result<u64> {
        let versions = self.list_versions(document_id, ALL_VERSIONS, 0).await?;
        if versions.len() <= keep_count {
            return Ok(0);
        }
        let mut removed = 0;
        for version in &versions[keep_count..] {
            self.delete_version(&version.id).await?;
            removed += 1;
        }
        Ok(removed)
    }

    async fn get_document_statistics(&self, document_id: &str) -> Result<DocumentStatistics> {
        let doc = self
            .get_document(document_id)
            .await?
            .ok_or_else(|| Error::DocumentNotFound(document_id.to_string()))?;
        let versions = self.list_versions(document_id, ALL_VERSIONS, 0).await?;
        Ok(DocumentStatistics::from_versions(&doc, &versions))
    }
}
