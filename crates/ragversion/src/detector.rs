//! File change detection.
//!
//! [`ChangeDetector`] compares a file's current content hash with the stored
//! [`Document`] for the same normalized path and records what happened:
//!
//! | On disk | Stored document | Result |
//! |---|---|---|
//! | present | none | `created` version 1 |
//! | present, new hash | any | `modified` version n+1 |
//! | present, same hash, last version `deleted` | any | `modified` version n+1 |
//! | present, same hash | live | nothing |
//! | missing | live | `deleted` version n+1 (size 0, hash kept) |
//! | missing | already deleted, or none | nothing |
//!
//! Restores write stored content back to disk and record a `restored` version.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde_json::json;

use ragversion_core::hash::HashAlgorithm;
use ragversion_core::models::{new_id, now, ChangeEvent, ChangeKind, Document, Metadata, Version};
use ragversion_core::store::Store;
use ragversion_core::{Error, Result};

use crate::config::TrackingConfig;
use crate::reader::ReaderRegistry;

/// Metadata key recorded on restored versions.
pub const RESTORED_FROM_KEY: &str = "restored_from_version";

/// A recorded change plus the text it was computed from (`None` for deletions).
#[derive(Debug, Clone)]
pub struct Detection {
    pub event: ChangeEvent,
    pub content: Option<String>,
}

pub struct ChangeDetector {
    store: Arc<dyn Store>,
    readers: ReaderRegistry,
    hasher: HashAlgorithm,
    store_content: bool,
    max_file_size: u64,
}

/// Absolute, lexically cleaned form of `path`. Symlinks are not resolved.
pub fn normalize_path(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let cwd = std::env::current_dir().map_err(|e| Error::io(path, e))?;
        cwd.join(path)
    };

    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    Ok(cleaned)
}

/// Extension tag stored as `file_type`, e.g. `.md`, or `unknown`.
pub fn file_type_tag(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn event_for(doc: &Document, version: &Version, file_path: &str, previous_hash: Option<String>) -> ChangeEvent {
    ChangeEvent {
        document_id: doc.id.clone(),
        version_id: version.id.clone(),
        file_path: file_path.to_string(),
        file_name: doc.file_name.clone(),
        change_kind: version.change_kind,
        version_number: version.version_number,
        content_hash: version.content_hash.clone(),
        previous_hash,
        file_size: version.file_size.unwrap_or(0),
        timestamp: version.created_at,
        metadata: version.metadata.clone(),
    }
}

impl ChangeDetector {
    pub fn new(store: Arc<dyn Store>, readers: ReaderRegistry, tracking: &TrackingConfig) -> Self {
        Self {
            store,
            readers,
            hasher: tracking.hash_algorithm,
            store_content: tracking.store_content,
            max_file_size: tracking.max_file_size_bytes(),
        }
    }

    pub fn hasher(&self) -> HashAlgorithm {
        self.hasher
    }

    /// Reject anything that is not a regular file within the size ceiling.
    /// Returns `Ok(None)` when the path does not exist.
    pub async fn check_file(&self, path: &Path) -> Result<Option<u64>> {
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(path, e)),
        };
        if !meta.is_file() {
            return Err(Error::io(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }
        if meta.len() > self.max_file_size {
            return Err(Error::ContentTooLarge {
                path: path.to_path_buf(),
                size: meta.len(),
                limit: self.max_file_size,
            });
        }
        Ok(Some(meta.len()))
    }

    /// Record whatever changed at `path` since it was last seen.
    pub async fn detect(&self, path: &Path, metadata: Option<Metadata>) -> Result<Option<Detection>> {
        let path = normalize_path(path)?;
        let key = path.to_string_lossy().to_string();

        if self.check_file(&path).await?.is_none() {
            return match self.store.get_document_by_path(&key).await? {
                Some(doc) => self.handle_deletion(doc).await,
                None => {
                    tracing::debug!(path = %key, "untracked path does not exist");
                    Ok(None)
                }
            };
        }

        let read = self.readers.read(&path).await?;
        let content_hash = self.hasher.hash(&read.text);
        let file_size = read.size as i64;

        let Some(doc) = self.store.get_document_by_path(&key).await? else {
            return self
                .handle_creation(&path, key, read.text, content_hash, file_size, metadata)
                .await
                .map(Some);
        };

        if doc.content_hash == content_hash {
            let reappeared = matches!(
                self.store.get_latest_version(&doc.id).await?,
                Some(v) if v.change_kind == ChangeKind::Deleted
            );
            if !reappeared {
                tracing::debug!(path = %key, document_id = %doc.id, "content unchanged");
                return Ok(None);
            }
        }

        self.handle_modification(doc, read.text, content_hash, file_size, metadata)
            .await
            .map(Some)
    }

    async fn handle_creation(
        &self,
        path: &Path,
        key: String,
        content: String,
        content_hash: String,
        file_size: i64,
        metadata: Option<Metadata>,
    ) -> Result<Detection> {
        let now = now();
        let metadata = metadata.unwrap_or_default();
        let doc = Document {
            id: new_id(),
            file_path: key.clone(),
            file_name: file_name_of(path),
            file_type: file_type_tag(path),
            file_size,
            content_hash: content_hash.clone(),
            created_at: now,
            updated_at: now,
            version_count: 1,
            current_version: 1,
            metadata: metadata.clone(),
        };
        let version = Version {
            id: new_id(),
            document_id: doc.id.clone(),
            version_number: 1,
            content_hash,
            file_size: Some(file_size),
            change_kind: ChangeKind::Created,
            created_at: now,
            created_by: None,
            metadata,
        };

        let stored = self.store_content.then_some(content.as_str());
        self.store
            .create_document_with_version(&doc, &version, stored)
            .await?;

        tracing::info!(path = %key, document_id = %doc.id, version = 1, change = "created", "tracked");
        Ok(Detection {
            event: event_for(&doc, &version, &key, None),
            content: Some(content),
        })
    }

    async fn handle_modification(
        &self,
        mut doc: Document,
        content: String,
        content_hash: String,
        file_size: i64,
        metadata: Option<Metadata>,
    ) -> Result<Detection> {
        let now = now();
        let previous_hash = doc.content_hash.clone();
        let number = doc.current_version + 1;
        let metadata = metadata.unwrap_or_default();

        let version = Version {
            id: new_id(),
            document_id: doc.id.clone(),
            version_number: number,
            content_hash: content_hash.clone(),
            file_size: Some(file_size),
            change_kind: ChangeKind::Modified,
            created_at: now,
            created_by: None,
            metadata: metadata.clone(),
        };
        doc.content_hash = content_hash;
        doc.file_size = file_size;
        doc.version_count += 1;
        doc.current_version = number;
        doc.updated_at = now;
        doc.metadata.extend(metadata);
        let stored = self.store_content.then_some(content.as_str());
        self.store.append_version(&doc, &version, stored).await?;

        tracing::info!(path = %doc.file_path, document_id = %doc.id, version = number, change = "modified", "tracked");
        Ok(Detection {
            event: event_for(&doc, &version, &doc.file_path, Some(previous_hash)),
            content: Some(content),
        })
    }

    async fn handle_deletion(&self, mut doc: Document) -> Result<Option<Detection>> {
        if let Some(latest) = self.store.get_latest_version(&doc.id).await? {
            if latest.change_kind == ChangeKind::Deleted {
                tracing::debug!(path = %doc.file_path, document_id = %doc.id, "deletion already recorded");
                return Ok(None);
            }
        }

        let now = now();
        let number = doc.current_version + 1;
        let version = Version {
            id: new_id(),
            document_id: doc.id.clone(),
            version_number: number,
            content_hash: doc.content_hash.clone(),
            file_size: Some(0),
            change_kind: ChangeKind::Deleted,
            created_at: now,
            created_by: None,
            metadata: Metadata::new(),
        };
        doc.version_count += 1;
        doc.current_version = number;
        doc.updated_at = now;
        self.store.append_version(&doc, &version, None).await?;

        tracing::info!(path = %doc.file_path, document_id = %doc.id, version = number, change = "deleted", "tracked");
        let previous_hash = Some(doc.content_hash.clone());
        Ok(Some(Detection {
            event: event_for(&doc, &version, &doc.file_path, previous_hash),
            content: None,
        }))
    }

    /// Write version `version_number` of a document back to disk and record
    /// a `restored` version. Returns the path written.
    pub async fn restore_version(
        &self,
        document_id: &str,
        version_number: i64,
        target: Option<&Path>,
    ) -> Result<(PathBuf, Detection)> {
        let mut doc = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| Error::DocumentNotFound(document_id.to_string()))?;
        let source = self
            .store
            .get_version_by_number(document_id, version_number)
            .await?
            .ok_or_else(|| Error::VersionNotFound {
                document_id: document_id.to_string(),
                version_number,
            })?;
        let content = self
            .store
            .get_content(&source.id)
            .await?
            .ok_or_else(|| Error::ContentMissing {
                document_id: document_id.to_string(),
                version_number,
            })?;

        let restore_path = match target {
            Some(t) => normalize_path(t)?,
            None => PathBuf::from(&doc.file_path),
        };
        self.readers.write(&restore_path, &content).await?;

        let now = now();
        let number = doc.current_version + 1;
        let file_size = source.file_size.unwrap_or(content.len() as i64);
        let mut metadata = Metadata::new();
        metadata.insert(RESTORED_FROM_KEY.to_string(), json!(version_number));

        let version = Version {
            id: new_id(),
            document_id: doc.id.clone(),
            version_number: number,
            content_hash: source.content_hash.clone(),
            file_size: Some(file_size),
            change_kind: ChangeKind::Restored,
            created_at: now,
            created_by: None,
            metadata,
        };
        let previous_hash = doc.content_hash.clone();
        doc.content_hash = source.content_hash;
        doc.file_size = file_size;
        doc.version_count += 1;
        doc.current_version = number;
        doc.updated_at = now;
        let stored = self.store_content.then_some(content.as_str());
        self.store.append_version(&doc, &version, stored).await?;

        let written = restore_path.to_string_lossy().to_string();
        tracing::info!(
            path = %written,
            document_id = %doc.id,
            version = number,
            restored_from = version_number,
            change = "restored",
            "restored"
        );
        Ok((
            restore_path,
            Detection {
                event: event_for(&doc, &version, &written, Some(previous_hash)),
                content: Some(content),
            },
        ))
    }
}
