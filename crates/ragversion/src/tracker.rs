//! The public entry point.
//!
//! A [`Tracker`] owns one storage handle, the change detectors and the
//! listener set. It is cheap to clone (an `Arc` inside) and safe to share
//! across tasks; directory runs clone it into one task per file.
//!
//! # Directory runs
//!
//! [`Tracker::track_directory`] enumerates matching files, then spawns one
//! task per file onto a `JoinSet`. Each task first takes a permit from a
//! semaphore sized by `max_workers`, so at most that many files are read and
//! stored at once. With `on_error = stop` the first failure closes the
//! semaphore: tasks still waiting for a permit give up, tasks already
//! running finish in the background, and the error is returned.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use ragversion_core::chunk::ChunkerRegistry;
use ragversion_core::models::{
    BatchResult, ChangeEvent, ChunkDiff, ChunkRecord, DiffResult, Document, DocumentFilter,
    DocumentSort, DocumentStatistics, FileProcessingError, Metadata, StorageStatistics,
    TrackResult, Version,
};
use ragversion_core::store::memory::InMemoryStore;
use ragversion_core::store::Store;
use ragversion_core::{Error, Result};

use crate::chunk_detector::ChunkChangeDetector;
use crate::config::{Backend, Config, OnError};
use crate::detector::{normalize_path, ChangeDetector, Detection};
use crate::events::{ChangeListener, ListenerId, ListenerSet};
use crate::reader::ReaderRegistry;
use crate::remote_store::RemoteStore;
use crate::scan::scan_directory;
use crate::sqlite_store::SqliteStore;
use crate::watch::{DirectoryWatcher, WatchOptions};

/// Options for [`Tracker::track_directory`]. Unset fields use the `[batch]`
/// configuration.
#[derive(Debug, Clone)]
pub struct TrackDirectoryOptions {
    /// Glob patterns matched against file names and root-relative paths.
    /// Empty means every file.
    pub patterns: Vec<String>,
    pub exclude: Vec<String>,
    pub recursive: bool,
    pub max_workers: Option<usize>,
    pub on_error: Option<OnError>,
    /// Attached to every file tracked in the run.
    pub metadata: Option<Metadata>,
}

impl Default for TrackDirectoryOptions {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            exclude: Vec::new(),
            recursive: true,
            max_workers: None,
            on_error: None,
            metadata: None,
        }
    }
}

struct Inner {
    config: Config,
    store: Arc<dyn Store>,
    detector: ChangeDetector,
    chunks: Option<ChunkChangeDetector>,
    listeners: ListenerSet,
}

#[derive(Clone)]
pub struct Tracker {
    inner: Arc<Inner>,
}

/// Build the storage backend selected by `[storage] backend`.
pub async fn store_from_config(config: &Config) -> Result<Arc<dyn Store>> {
    let compress = config.content.compress();
    let store: Arc<dyn Store> = match config.storage.backend {
        Backend::Sqlite => Arc::new(SqliteStore::open(&config.storage.sqlite, compress).await?),
        Backend::Remote => Arc::new(RemoteStore::new(&config.storage.remote, compress)?),
        Backend::Memory => Arc::new(InMemoryStore::new()),
    };
    Ok(store)
}

impl Tracker {
    /// Validate `config`, open its backend and initialize the schema.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let store = store_from_config(&config).await?;
        store.initialize().await?;
        Self::with_store(store, config)
    }

    /// Use an already-initialized store with the default readers and chunkers.
    pub fn with_store(store: Arc<dyn Store>, config: Config) -> Result<Self> {
        Self::with_registries(
            store,
            config,
            ReaderRegistry::with_defaults(),
            &ChunkerRegistry::with_defaults(),
        )
    }

    /// Use custom content readers and chunking strategies.
    pub fn with_registries(
        store: Arc<dyn Store>,
        config: Config,
        readers: ReaderRegistry,
        chunkers: &ChunkerRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let detector = ChangeDetector::new(store.clone(), readers, &config.tracking);
        let chunks = config.chunking.enabled.then(|| {
            let chunker = chunkers.build(&config.chunking.strategy, config.chunking.settings());
            ChunkChangeDetector::new(store.clone(), chunker, config.tracking.hash_algorithm)
        });
        let listeners = ListenerSet::new(Duration::from_secs(config.listeners.timeout_secs));

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                store,
                detector,
                chunks,
                listeners,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    pub fn chunk_tracking_enabled(&self) -> bool {
        self.inner.chunks.is_some()
    }

    // ---- lifecycle ----

    pub async fn initialize(&self) -> Result<()> {
        self.inner.store.initialize().await
    }

    pub async fn close(&self) -> Result<()> {
        self.inner.store.close().await
    }

    pub async fn health_check(&self) -> bool {
        self.inner.store.health_check().await
    }

    // ---- listeners ----

    pub fn on_change<L>(&self, listener: L) -> ListenerId
    where
        L: ChangeListener + 'static,
    {
        self.inner.listeners.add(Arc::new(listener))
    }

    /// Returns `false` if `id` was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    // ---- tracking ----

    /// Track one path. A missing path that was tracked before records a
    /// deletion; when chunk tracking is on, the new version's chunks are
    /// stored as well.
    pub async fn track(&self, path: impl AsRef<Path>, metadata: Option<Metadata>) -> Result<TrackResult> {
        let (result, _) = self.track_inner(path.as_ref(), metadata).await?;
        Ok(result)
    }

    /// Like [`track`](Self::track), also returning the chunk diff against
    /// the preceding version. The diff is `None` when chunk tracking is off,
    /// nothing changed, or the change was a deletion.
    pub async fn track_with_chunks(
        &self,
        path: impl AsRef<Path>,
        metadata: Option<Metadata>,
    ) -> Result<(TrackResult, Option<ChunkDiff>)> {
        self.track_inner(path.as_ref(), metadata).await
    }

    async fn track_inner(
        &self,
        path: &Path,
        metadata: Option<Metadata>,
    ) -> Result<(TrackResult, Option<ChunkDiff>)> {
        let path = normalize_path(path)?;
        let key = path.to_string_lossy().to_string();
        let before = self.inner.store.get_document_by_path(&key).await?;
        let was_tracked = before.is_some();

        let Some(detection) = self.inner.detector.detect(&path, metadata).await? else {
            return Ok((
                TrackResult {
                    changed: false,
                    event: None,
                    version_number: before.map(|d| d.current_version),
                    was_tracked,
                },
                None,
            ));
        };

        let diff = self.chunk_detection(&detection).await;
        self.inner.listeners.dispatch(&detection.event).await;

        let version_number = Some(detection.event.version_number);
        Ok((
            TrackResult {
                changed: true,
                event: Some(detection.event),
                version_number,
                was_tracked,
            },
            diff,
        ))
    }

    /// Chunk the content behind `detection` and store the chunk set. Chunk
    /// bookkeeping never fails the tracking call; problems are logged.
    async fn chunk_detection(&self, detection: &Detection) -> Option<ChunkDiff> {
        let chunks = self.inner.chunks.as_ref()?;
        let content = detection.content.as_deref()?;
        let event = &detection.event;

        match self.diff_and_store_chunks(chunks, event, content).await {
            Ok(diff) => diff,
            Err(e) => {
                tracing::warn!(
                    document_id = %event.document_id,
                    version = event.version_number,
                    error = %e,
                    "chunk tracking failed"
                );
                None
            }
        }
    }

    async fn diff_and_store_chunks(
        &self,
        chunks: &ChunkChangeDetector,
        event: &ChangeEvent,
        content: &str,
    ) -> Result<Option<ChunkDiff>> {
        let store = &self.inner.store;
        let Some(new_version) = store.get_version(&event.version_id).await? else {
            return Ok(None);
        };
        let previous = if event.version_number > 1 {
            store
                .get_version_by_number(&event.document_id, event.version_number - 1)
                .await?
        } else {
            None
        };

        let diff = chunks
            .diff(&event.document_id, previous.as_ref(), content, &new_version)
            .await;
        chunks.persist(&diff).await?;
        tracing::debug!(
            document_id = %event.document_id,
            version = event.version_number,
            added = diff.added.len(),
            removed = diff.removed.len(),
            unchanged = diff.unchanged.len(),
            reordered = diff.reordered.len(),
            "stored chunks"
        );
        Ok(Some(diff))
    }

    /// Track every matching file under `dir` with bounded concurrency.
    pub async fn track_directory(
        &self,
        dir: impl AsRef<Path>,
        options: TrackDirectoryOptions,
    ) -> Result<BatchResult> {
        let root = dir.as_ref().to_path_buf();
        let TrackDirectoryOptions {
            patterns,
            exclude,
            recursive,
            max_workers,
            on_error,
            metadata,
        } = options;

        let scan_root = root.clone();
        let files = tokio::task::spawn_blocking(move || {
            scan_directory(&scan_root, &patterns, &exclude, recursive)
        })
        .await
        .map_err(Error::other)??;

        let max_workers = max_workers
            .unwrap_or(self.inner.config.batch.max_workers)
            .max(1);
        let on_error = on_error.unwrap_or(self.inner.config.batch.on_error);
        let mut result = BatchResult::new(files.len());
        tracing::info!(
            path = %root.display(),
            files = files.len(),
            max_workers,
            "tracking directory"
        );

        let semaphore = Arc::new(Semaphore::new(max_workers));
        let mut tasks: JoinSet<(PathBuf, Option<Result<TrackResult>>)> = JoinSet::new();
        for file in files {
            let tracker = self.clone();
            let semaphore = semaphore.clone();
            let metadata = metadata.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (file, None);
                };
                let outcome = tracker.track(&file, metadata).await;
                (file, Some(outcome))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (file, outcome) = joined.map_err(Error::other)?;
            match outcome {
                None => {}
                Some(Ok(tracked)) => {
                    if let Some(event) = tracked.event {
                        result.successful.push(event);
                    }
                }
                Some(Err(e)) => {
                    let file_path = file.to_string_lossy().to_string();
                    tracing::error!(
                        path = %file_path,
                        category = %e.category(),
                        error = %e,
                        "failed to track file"
                    );
                    result.failed.push(FileProcessingError::from_error(file_path, &e));
                    if on_error == OnError::Stop {
                        semaphore.close();
                        tasks.detach_all();
                        return Err(e);
                    }
                }
            }
        }

        result.completed_at = Some(Utc::now());
        tracing::info!(
            path = %root.display(),
            total = result.total_files,
            changed = result.success_count(),
            failed = result.failure_count(),
            unchanged = result.unchanged_count(),
            duration_secs = result.duration_seconds(),
            "directory tracked"
        );
        Ok(result)
    }

    /// Keep tracking `dir` as files change, until the returned watcher is
    /// stopped or dropped.
    pub fn watch(&self, dir: impl AsRef<Path>, options: WatchOptions) -> Result<DirectoryWatcher> {
        DirectoryWatcher::start(self.clone(), dir, options)
    }

    /// Write version `version_number` back to disk (to `target` or the
    /// document's own path) and record it as a `restored` version.
    ///
    /// Listeners are only notified when `notify` is set.
    pub async fn restore_version(
        &self,
        document_id: &str,
        version_number: i64,
        target: Option<&Path>,
        notify: bool,
    ) -> Result<(PathBuf, ChangeEvent)> {
        let (path, detection) = self
            .inner
            .detector
            .restore_version(document_id, version_number, target)
            .await?;
        self.chunk_detection(&detection).await;
        if notify {
            self.inner.listeners.dispatch(&detection.event).await;
        }
        Ok((path, detection.event))
    }

    /// Chunk diff between two stored versions, computed from `to_version`'s
    /// content against `from_version`'s stored chunks.
    pub async fn get_chunk_diff(
        &self,
        document_id: &str,
        from_version: i64,
        to_version: i64,
    ) -> Result<Option<ChunkDiff>> {
        let Some(chunks) = self.inner.chunks.as_ref() else {
            return Ok(None);
        };
        let store = &self.inner.store;
        let from = store.get_version_by_number(document_id, from_version).await?;
        let to = store.get_version_by_number(document_id, to_version).await?;
        let (Some(from), Some(to)) = (from, to) else {
            return Ok(None);
        };
        let Some(content) = store.get_content(&to.id).await? else {
            return Ok(None);
        };
        Ok(Some(chunks.diff(document_id, Some(&from), &content, &to).await))
    }

    // ---- queries ----

    pub async fn get_document(&self, document_id: &str) -> Result<Option<Document>> {
        self.inner.store.get_document(document_id).await
    }

    /// Look a document up by path; the path is normalized first.
    pub async fn get_document_by_path(&self, path: impl AsRef<Path>) -> Result<Option<Document>> {
        let key = normalize_path(path.as_ref())?;
        self.inner
            .store
            .get_document_by_path(&key.to_string_lossy())
            .await
    }

    pub async fn list_documents(
        &self,
        limit: i64,
        offset: i64,
        sort: DocumentSort,
    ) -> Result<Vec<Document>> {
        self.inner.store.list_documents(limit, offset, sort).await
    }

    pub async fn search_documents(&self, filter: &DocumentFilter) -> Result<Vec<Document>> {
        self.inner.store.search_documents(filter).await
    }

    /// The first `limit` documents by `sort`, descending.
    pub async fn top_documents(&self, limit: i64, sort: DocumentSort) -> Result<Vec<Document>> {
        self.inner.store.list_documents(limit, 0, sort).await
    }

    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.inner.store.delete_document(document_id).await
    }

    pub async fn get_version(&self, version_id: &str) -> Result<Option<Version>> {
        self.inner.store.get_version(version_id).await
    }

    pub async fn get_version_by_number(
        &self,
        document_id: &str,
        version_number: i64,
    ) -> Result<Option<Version>> {
        self.inner
            .store
            .get_version_by_number(document_id, version_number)
            .await
    }

    pub async fn list_versions(
        &self,
        document_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Version>> {
        self.inner
            .store
            .list_versions(document_id, limit, offset)
            .await
    }

    pub async fn get_latest_version(&self, document_id: &str) -> Result<Option<Version>> {
        self.inner.store.get_latest_version(document_id).await
    }

    pub async fn get_content(&self, version_id: &str) -> Result<Option<String>> {
        self.inner.store.get_content(version_id).await
    }

    /// Stored chunks of a version with their text, in chunk order.
    pub async fn get_chunks(&self, version_id: &str) -> Result<Vec<ChunkRecord>> {
        self.inner.store.get_chunks_with_content(version_id).await
    }

    pub async fn get_diff(
        &self,
        document_id: &str,
        from_version: i64,
        to_version: i64,
    ) -> Result<Option<DiffResult>> {
        self.inner
            .store
            .compute_diff(document_id, from_version, to_version)
            .await
    }

    pub async fn cleanup_old_versions(&self, document_id: &str, keep_count: usize) -> Result<u64> {
        self.inner
            .store
            .cleanup_old_versions(document_id, keep_count)
            .await
    }

    pub async fn cleanup_by_age(&self, days: i64) -> Result<u64> {
        self.inner.store.cleanup_by_age(days).await
    }

    pub async fn get_statistics(&self) -> Result<StorageStatistics> {
        self.inner.store.get_statistics().await
    }

    pub async fn get_document_statistics(&self, document_id: &str) -> Result<DocumentStatistics> {
        self.inner.store.get_document_statistics(document_id).await
    }
}
