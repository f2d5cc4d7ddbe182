//! In-memory [`Store`] implementation for tests and embedding.
//!
//! All tables live in one `HashMap` set behind a single `std::sync::RwLock`,
//! so batch inserts are atomic: they validate every record before touching
//! state. Uniqueness rules match the SQL schema (unique document path,
//! unique version number per document, unique chunk index per version).
//! Content is kept as plain text; the `compress` flag is accepted and ignored.
//! Timestamps are truncated to milliseconds on insert, as the SQLite
//! backend does. After [`close`](Store::close) every operation fails until
//! the store is initialized again.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};

use crate::error::{Error, Result};
use crate::models::{
    Chunk, ChunkRecord, Document, DocumentFilter, DocumentSort, StorageStatistics, Version,
    VersionRecord,
};

use super::Store;

#[derive(Default)]
struct State {
    initialized: bool,
    closed: bool,
    documents: HashMap<String, Document>,
    paths: HashMap<String, String>,
    versions: HashMap<String, Version>,
    contents: HashMap<String, String>,
    chunks: HashMap<String, Chunk>,
    chunk_contents: HashMap<String, String>,
}

impl State {
    fn check_document(&self, doc: &Document) -> Result<()> {
        if self.documents.contains_key(&doc.id) {
            return Err(Error::storage_msg(format!("document {} already exists", doc.id)));
        }
        if self.paths.contains_key(&doc.file_path) {
            return Err(Error::storage_msg(format!(
                "document with path {} already exists",
                doc.file_path
            )));
        }
        Ok(())
    }

    fn check_version(&self, version: &Version) -> Result<()> {
        if !self.documents.contains_key(&version.document_id) {
            return Err(Error::storage_msg(format!(
                "version {} references unknown document {}",
                version.id, version.document_id
            )));
        }
        if self.versions.contains_key(&version.id) {
            return Err(Error::storage_msg(format!("version {} already exists", version.id)));
        }
        let clash = self.versions.values().any(|v| {
            v.document_id == version.document_id && v.version_number == version.version_number
        });
        if clash {
            return Err(Error::storage_msg(format!(
                "version {} already exists for document {}",
                version.version_number, version.document_id
            )));
        }
        Ok(())
    }

    fn check_chunk(&self, chunk: &Chunk) -> Result<()> {
        if !self.versions.contains_key(&chunk.version_id) {
            return Err(Error::storage_msg(format!(
                "chunk {} references unknown version {}",
                chunk.id, chunk.version_id
            )));
        }
        if self.chunks.contains_key(&chunk.id) {
            return Err(Error::storage_msg(format!("chunk {} already exists", chunk.id)));
        }
        let clash = self
            .chunks
            .values()
            .any(|c| c.version_id == chunk.version_id && c.chunk_index == chunk.chunk_index);
        if clash {
            return Err(Error::storage_msg(format!(
                "chunk index {} already exists for version {}",
                chunk.chunk_index, chunk.version_id
            )));
        }
        Ok(())
    }

    /// Old path to release when `doc` replaces the stored record.
    fn check_update(&self, doc: &Document) -> Result<Option<String>> {
        let old_path = match self.documents.get(&doc.id) {
            Some(existing) => existing.file_path.clone(),
            None => return Err(Error::DocumentNotFound(doc.id.clone())),
        };
        if old_path == doc.file_path {
            return Ok(None);
        }
        if self.paths.contains_key(&doc.file_path) {
            return Err(Error::storage_msg(format!(
                "document with path {} already exists",
                doc.file_path
            )));
        }
        Ok(Some(old_path))
    }

    fn insert_document(&mut self, doc: &Document) {
        let mut doc = doc.clone();
        doc.created_at = millis(doc.created_at);
        doc.updated_at = millis(doc.updated_at);
        self.paths.insert(doc.file_path.clone(), doc.id.clone());
        self.documents.insert(doc.id.clone(), doc);
    }

    fn insert_version(&mut self, version: &Version, content: Option<&str>) {
        let mut version = version.clone();
        version.created_at = millis(version.created_at);
        if let Some(text) = content {
            self.contents.insert(version.id.clone(), text.to_string());
        }
        self.versions.insert(version.id.clone(), version);
    }

    fn insert_chunk(&mut self, chunk: &Chunk, text: Option<&str>) {
        let mut chunk = chunk.clone();
        chunk.created_at = millis(chunk.created_at);
        if let Some(text) = text {
            self.chunk_contents.insert(chunk.id.clone(), text.to_string());
        }
        self.chunks.insert(chunk.id.clone(), chunk);
    }

    fn remove_version(&mut self, version_id: &str) -> bool {
        if self.versions.remove(version_id).is_none() {
            return false;
        }
        self.contents.remove(version_id);
        self.remove_chunks_of(version_id);
        true
    }

    fn remove_chunks_of(&mut self, version_id: &str) -> u64 {
        let ids: Vec<String> = self
            .chunks
            .values()
            .filter(|c| c.version_id == version_id)
            .map(|c| c.id.clone())
            .collect();
        for id in &ids {
            self.chunks.remove(id);
            self.chunk_contents.remove(id);
        }
        ids.len() as u64
    }
}

/// In-memory store backed by hash maps.
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    fn lock(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| Error::storage_msg("in-memory store lock poisoned"))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        let state = self
            .state
            .read()
            .map_err(|_| Error::storage_msg("in-memory store lock poisoned"))?;
        if state.closed {
            return Err(Error::storage_msg("in-memory store is closed"));
        }
        Ok(state)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        let state = self.lock()?;
        if state.closed {
            return Err(Error::storage_msg("in-memory store is closed"));
        }
        Ok(state)
    }
}

fn millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(3)
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn page<T>(items: Vec<T>, limit: i64, offset: i64) -> Vec<T> {
    items
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

#[async_trait]
impl Store for InMemoryStore {
    async fn initialize(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.initialized = true;
        state.closed = false;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.initialized = false;
        state.closed = true;
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.state.read().map(|s| s.initialized).unwrap_or(false)
    }

    async fn create_document(&self, doc: &Document) -> Result<()> {
        let mut state = self.write()?;
        state.check_document(doc)?;
        state.insert_document(doc);
        Ok(())
    }

    async fn batch_create_documents(&self, docs: &[Document]) -> Result<()> {
        let mut state = self.write()?;
        let mut staged = State::default();
        for doc in docs {
            state.check_document(doc)?;
            staged.check_document(doc)?;
            staged.insert_document(doc);
        }
        for doc in docs {
            state.insert_document(doc);
        }
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.read()?.documents.get(id).cloned())
    }

    async fn get_document_by_path(&self, file_path: &str) -> Result<Option<Document>> {
        let state = self.read()?;
        Ok(state
            .paths
            .get(file_path)
            .and_then(|id| state.documents.get(id))
            .cloned())
    }

    async fn update_document(&self, doc: &Document) -> Result<()> {
        let mut state = self.write()?;
        if let Some(old_path) = state.check_update(doc)? {
            state.paths.remove(&old_path);
        }
        state.insert_document(doc);
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        let mut state = self.write()?;
        let Some(doc) = state.documents.remove(id) else {
            return Ok(());
        };
        state.paths.remove(&doc.file_path);
        let version_ids: Vec<String> = state
            .versions
            .values()
            .filter(|v| v.document_id == id)
            .map(|v| v.id.clone())
            .collect();
        for vid in version_ids {
            state.remove_version(&vid);
        }
        Ok(())
    }

    async fn list_documents(
        &self,
        limit: i64,
        offset: i64,
        sort: DocumentSort,
    ) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self.read()?.documents.values().cloned().collect();
        docs.sort_by(|a, b| match sort {
            DocumentSort::UpdatedAt => b.updated_at.cmp(&a.updated_at),
            DocumentSort::CreatedAt => b.created_at.cmp(&a.created_at),
            DocumentSort::FileName => b.file_name.cmp(&a.file_name),
            DocumentSort::FileSize => b.file_size.cmp(&a.file_size),
            DocumentSort::VersionCount => b.version_count.cmp(&a.version_count),
        });
        Ok(page(docs, limit, offset))
    }

    async fn search_documents(&self, filter: &DocumentFilter) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .read()?
            .documents
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(docs)
    }

    async fn create_version(&self, version: &Version, content: Option<&str>) -> Result<()> {
        let mut state = self.write()?;
        state.check_version(version)?;
        state.insert_version(version, content);
        Ok(())
    }

    async fn batch_create_versions(&self, records: &[VersionRecord]) -> Result<()> {
        let mut state = self.write()?;
        for (i, record) in records.iter().enumerate() {
            state.check_version(&record.version)?;
            let duplicate = records[..i].iter().any(|r| {
                r.version.id == record.version.id
                    || (r.version.document_id == record.version.document_id
                        && r.version.version_number == record.version.version_number)
            });
            if duplicate {
                return Err(Error::storage_msg(format!(
                    "duplicate version {} in batch",
                    record.version.version_number
                )));
            }
        }
        for record in records {
            state.insert_version(&record.version, record.content.as_deref());
        }
        Ok(())
    }

    async fn create_document_with_version(
        &self,
        doc: &Document,
        version: &Version,
        content: Option<&str>,
    ) -> Result<()> {
        let mut state = self.write()?;
        state.check_document(doc)?;
        state.insert_document(doc);
        if let Err(e) = state.check_version(version) {
            state.documents.remove(&doc.id);
            state.paths.remove(&doc.file_path);
            return Err(e);
        }
        state.insert_version(version, content);
        Ok(())
    }

    async fn append_version(
        &self,
        doc: &Document,
        version: &Version,
        content: Option<&str>,
    ) -> Result<()> {
        let mut state = self.write()?;
        let old_path = state.check_update(doc)?;
        state.check_version(version)?;
        if let Some(old_path) = old_path {
            state.paths.remove(&old_path);
        }
        state.insert_document(doc);
        state.insert_version(version, content);
        Ok(())
    }

    async fn get_version(&self, id: &str) -> Result<Option<Version>> {
        Ok(self.read()?.versions.get(id).cloned())
    }

    async fn get_version_by_number(
        &self,
        document_id: &str,
        version_number: i64,
    ) -> Result<Option<Version>> {
        Ok(self
            .read()?
            .versions
            .values()
            .find(|v| v.document_id == document_id && v.version_number == version_number)
            .cloned())
    }

    async fn list_versions(
        &self,
        document_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Version>> {
        let mut versions: Vec<Version> = self
            .read()?
            .versions
            .values()
            .filter(|v| v.document_id == document_id)
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.version_number.cmp(&a.version_number));
        Ok(page(versions, limit, offset))
    }

    async fn delete_version(&self, id: &str) -> Result<()> {
        self.write()?.remove_version(id);
        Ok(())
    }

    async fn get_latest_version(&self, document_id: &str) -> Result<Option<Version>> {
        Ok(self
            .read()?
            .versions
            .values()
            .filter(|v| v.document_id == document_id)
            .max_by_key(|v| v.version_number)
            .cloned())
    }

    async fn store_content(&self, version_id: &str, content: &str, _compress: bool) -> Result<()> {
        let mut state = self.write()?;
        if !state.versions.contains_key(version_id) {
            return Err(Error::storage_msg(format!(
                "content references unknown version {}",
                version_id
            )));
        }
        state
            .contents
            .insert(version_id.to_string(), content.to_string());
        Ok(())
    }

    async fn get_content(&self, version_id: &str) -> Result<Option<String>> {
        Ok(self.read()?.contents.get(version_id).cloned())
    }

    async fn delete_content(&self, version_id: &str) -> Result<()> {
        self.write()?.contents.remove(version_id);
        Ok(())
    }

    async fn create_chunk(&self, chunk: &Chunk, text: Option<&str>) -> Result<()> {
        let mut state = self.write()?;
        state.check_chunk(chunk)?;
        state.insert_chunk(chunk, text);
        Ok(())
    }

    async fn batch_create_chunks(&self, records: &[ChunkRecord]) -> Result<()> {
        let mut state = self.write()?;
        for (i, record) in records.iter().enumerate() {
            state.check_chunk(&record.chunk)?;
            let duplicate = records[..i].iter().any(|r| {
                r.chunk.id == record.chunk.id
                    || (r.chunk.version_id == record.chunk.version_id
                        && r.chunk.chunk_index == record.chunk.chunk_index)
            });
            if duplicate {
                return Err(Error::storage_msg(format!(
                    "duplicate chunk index {} in batch",
                    record.chunk.chunk_index
                )));
            }
        }
        for record in records {
            state.insert_chunk(&record.chunk, record.text.as_deref());
        }
        Ok(())
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        Ok(self.read()?.chunks.get(id).cloned())
    }

    async fn get_chunks_by_version(&self, version_id: &str) -> Result<Vec<Chunk>> {
        let mut chunks: Vec<Chunk> = self
            .read()?
            .chunks
            .values()
            .filter(|c| c.version_id == version_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn store_chunk_content(&self, chunk_id: &str, text: &str, _compress: bool) -> Result<()> {
        let mut state = self.write()?;
        if !state.chunks.contains_key(chunk_id) {
            return Err(Error::storage_msg(format!(
                "chunk content references unknown chunk {}",
                chunk_id
            )));
        }
        state
            .chunk_contents
            .insert(chunk_id.to_string(), text.to_string());
        Ok(())
    }

    async fn get_chunk_content(&self, chunk_id: &str) -> Result<Option<String>> {
        Ok(self.read()?.chunk_contents.get(chunk_id).cloned())
    }

    async fn delete_chunk_content(&self, chunk_id: &str) -> Result<()> {
        self.write()?.chunk_contents.remove(chunk_id);
        Ok(())
    }

    async fn delete_chunks_by_version(&self, version_id: &str) -> Result<u64> {
        Ok(self.write()?.remove_chunks_of(version_id))
    }

    async fn cleanup_by_age(&self, days: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(days);
        let mut state = self.write()?;
        let expired: Vec<String> = state
            .versions
            .values()
            .filter(|v| v.created_at < cutoff)
            .map(|v| v.id.clone())
            .collect();
        for id in &expired {
            state.remove_version(id);
        }
        Ok(expired.len() as u64)
    }

    async fn get_statistics(&self) -> Result<StorageStatistics> {
        let state = self.read()?;
        let total_documents = state.documents.len() as i64;
        let total_versions = state.versions.len() as i64;

        let mut by_type: BTreeMap<String, i64> = BTreeMap::new();
        for doc in state.documents.values() {
            *by_type.entry(doc.file_type.clone()).or_insert(0) += 1;
        }

        let week_ago = Utc::now() - Duration::days(7);
        Ok(StorageStatistics {
            total_documents,
            total_versions,
            total_storage_bytes: state.documents.values().map(|d| d.file_size).sum(),
            average_versions_per_document: if total_documents > 0 {
                total_versions as f64 / total_documents as f64
            } else {
                0.0
            },
            documents_by_file_type: by_type,
            recent_activity_count: state
                .versions
                .values()
                .filter(|v| v.created_at >= week_ago)
                .count() as i64,
            oldest_document_date: state.documents.values().map(|d| d.created_at).min(),
            newest_document_date: state.documents.values().map(|d| d.created_at).max(),
        })
    }
}
