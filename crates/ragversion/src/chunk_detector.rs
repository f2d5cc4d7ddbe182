//! Chunk-level change detection.
//!
//! Splits a version's content with the configured [`Chunker`], compares the
//! result against the previous version's stored chunks by content hash and
//! persists the new version's chunk set. Only `added` chunks need to be
//! re-embedded downstream.

use std::sync::Arc;

use ragversion_core::chunk::Chunker;
use ragversion_core::chunk_diff::{build_chunk_records, classify};
use ragversion_core::hash::HashAlgorithm;
use ragversion_core::models::{ChunkDiff, ChunkRecord, Version};
use ragversion_core::store::Store;
use ragversion_core::Result;

pub struct ChunkChangeDetector {
    store: Arc<dyn Store>,
    chunker: Arc<dyn Chunker>,
    hasher: HashAlgorithm,
}

impl ChunkChangeDetector {
    pub fn new(store: Arc<dyn Store>, chunker: Arc<dyn Chunker>, hasher: HashAlgorithm) -> Self {
        Self {
            store,
            chunker,
            hasher,
        }
    }

    pub fn chunker(&self) -> &Arc<dyn Chunker> {
        &self.chunker
    }

    /// Split `content` into chunk records belonging to `version`.
    pub fn build_chunks(&self, document_id: &str, version: &Version, content: &str) -> Vec<ChunkRecord> {
        let segments = self.chunker.split(content);
        tracing::debug!(
            document_id,
            version = version.version_number,
            chunker = self.chunker.name(),
            segments = segments.len(),
            "split content"
        );
        build_chunk_records(document_id, &version.id, segments, self.hasher, self.chunker.as_ref())
    }

    /// Classify the chunks of `new_content` against `old`'s stored chunks.
    ///
    /// A failure to load the old chunks is logged and treated as an empty
    /// prior set, so every new chunk comes back as added.
    pub async fn diff(
        &self,
        document_id: &str,
        old: Option<&Version>,
        new_content: &str,
        new: &Version,
    ) -> ChunkDiff {
        let old_chunks = match old {
            Some(version) => match self.store.get_chunks_with_content(&version.id).await {
                Ok(chunks) => chunks,
                Err(e) => {
                    tracing::warn!(
                        document_id,
                        version = version.version_number,
                        error = %e,
                        "could not load previous chunks, treating as none"
                    );
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let new_chunks = self.build_chunks(document_id, new, new_content);
        let from_version = old.map(|v| v.version_number).unwrap_or(0);
        classify(document_id, from_version, new.version_number, old_chunks, new_chunks)
    }

    /// Store the current chunk set of `diff` (added, unchanged and reordered)
    /// with its text. Returns the number of chunks written.
    pub async fn persist(&self, diff: &ChunkDiff) -> Result<usize> {
        let records: Vec<ChunkRecord> = diff.current_chunks().into_iter().cloned().collect();
        if !records.is_empty() {
            self.store.batch_create_chunks(&records).await?;
        }
        Ok(records.len())
    }

    /// Chunk and store `content` as the first chunk set of `version`.
    pub async fn create_chunks_for_version(
        &self,
        document_id: &str,
        version: &Version,
        content: &str,
    ) -> Result<Vec<ChunkRecord>> {
        let records = self.build_chunks(document_id, version, content);
        if !records.is_empty() {
            self.store.batch_create_chunks(&records).await?;
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ragversion_core::chunk::{ChunkerSettings, RecursiveChunker};
    use ragversion_core::models::{new_id, ChangeKind, Document, Metadata};
    use ragversion_core::store::memory::InMemoryStore;

    fn version(document_id: &str, number: i64) -> Version {
        Version {
            id: new_id(),
            document_id: document_id.to_string(),
            version_number: number,
            content_hash: format!("h{}", number),
            file_size: Some(1),
            change_kind: if number == 1 {
                ChangeKind::Created
            } else {
                ChangeKind::Modified
            },
            created_at: Utc::now(),
            created_by: None,
            metadata: Metadata::new(),
        }
    }

    async fn seeded_store() -> (Arc<InMemoryStore>, String) {
        let store = Arc::new(InMemoryStore::new());
        store.initialize().await.unwrap();
        let now = Utc::now();
        let doc = Document {
            id: new_id(),
            file_path: "/tmp/doc.txt".into(),
            file_name: "doc.txt".into(),
            file_type: ".txt".into(),
            file_size: 1,
            content_hash: "h1".into(),
            created_at: now,
            updated_at: now,
            version_count: 1,
            current_version: 1,
            metadata: Metadata::new(),
        };
        store.create_document(&doc).await.unwrap();
        (store, doc.id)
    }

    fn small_chunker() -> Arc<dyn Chunker> {
        Arc::new(RecursiveChunker::new(ChunkerSettings::new(5, 0)))
    }

    #[tokio::test]
    async fn test_diff_against_stored_chunks() {
        let (store, doc_id) = seeded_store().await;
        let detector = ChunkChangeDetector::new(store.clone(), small_chunker(), HashAlgorithm::Sha256);

        let v1 = version(&doc_id, 1);
        store.create_version(&v1, None).await.unwrap();
        let initial = detector
            .create_chunks_for_version(&doc_id, &v1, "AAAA BBBB CCCC")
            .await
            .unwrap();
        assert_eq!(initial.len(), 3);

        let v2 = version(&doc_id, 2);
        store.create_version(&v2, None).await.unwrap();
        let diff = detector.diff(&doc_id, Some(&v1), "BBBB CCCC DDDD", &v2).await;
        assert_eq!(diff.from_version, 1);
        assert_eq!(diff.to_version, 2);
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.reordered.len(), 2);
        assert_eq!(diff.added.len(), 1);
        assert!((diff.savings_percentage() - 200.0 / 3.0).abs() < 1e-9);

        assert_eq!(detector.persist(&diff).await.unwrap(), 3);
        let stored = store.get_chunks_with_content(&v2.id).await.unwrap();
        let texts: Vec<_> = stored.iter().map(|c| c.text.clone().unwrap()).collect();
        assert_eq!(texts, vec!["BBBB", "CCCC", "DDDD"]);
    }

    #[tokio::test]
    async fn test_same_content_is_fully_unchanged() {
        let (store, doc_id) = seeded_store().await;
        let detector = ChunkChangeDetector::new(store.clone(), small_chunker(), HashAlgorithm::Sha256);
        let v1 = version(&doc_id, 1);
        store.create_version(&v1, None).await.unwrap();
        detector
            .create_chunks_for_version(&doc_id, &v1, "AAAA BBBB")
            .await
            .unwrap();

        let diff = detector.diff(&doc_id, Some(&v1), "AAAA BBBB", &v1).await;
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
        assert_eq!(diff.savings_percentage(), 100.0);
    }

    #[tokio::test]
    async fn test_unreadable_old_chunks_degrade_to_all_added() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::config::SqliteConfig {
            path: dir.path().join("closed.sqlite"),
            max_connections: 1,
        };
        let store = Arc::new(crate::sqlite_store::SqliteStore::open(&config, false).await.unwrap());
        store.initialize().await.unwrap();
        store.close().await.unwrap();
        let detector = ChunkChangeDetector::new(store, small_chunker(), HashAlgorithm::Sha256);

        let v1 = version("doc", 1);
        let v2 = version("doc", 2);
        let diff = detector.diff("doc", Some(&v1), "AAAA BBBB", &v2).await;
        assert_eq!(diff.added.len(), 2);
        assert!(diff.removed.is_empty());
        assert_eq!(diff.savings_percentage(), 0.0);
    }
}
