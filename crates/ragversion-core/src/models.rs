//! Core data models for RAGVersion.
//!
//! These types flow through the whole tracking pipeline:
//!
//! ```text
//! file ──► ChangeDetector ──► Document + Version ──► ChangeEvent
//!                                   │
//!                                   ▼
//!                   Chunker ──► ChunkDiff ──► Chunk (per version)
//! ```
//!
//! Persisted records ([`Document`], [`Version`], [`Chunk`]) carry string
//! UUIDs and UTC timestamps. Transient results ([`ChangeEvent`],
//! [`ChunkDiff`], [`BatchResult`], [`DiffResult`]) are never stored.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, ErrorCategory};

/// Free-form JSON metadata attached to documents, versions, chunks and events.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Generate a fresh record identifier.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current time at millisecond precision, the finest resolution every
/// backend stores.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Kind of change a [`Version`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Restored,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Restored => "restored",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ChangeKind::Created),
            "modified" => Ok(ChangeKind::Modified),
            "deleted" => Ok(ChangeKind::Deleted),
            "restored" => Ok(ChangeKind::Restored),
            other => Err(Error::storage_msg(format!("unknown change kind '{}'", other))),
        }
    }
}

/// A tracked file, identified by its normalized absolute path.
///
/// `current_version` always equals the number of the most recently created
/// [`Version`]. Removing the file on disk does not delete the document; it
/// produces a `deleted` version instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub file_path: String,
    pub file_name: String,
    /// Extension tag including the dot (`.md`), or `unknown`.
    pub file_type: String,
    pub file_size: i64,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version_count: i64,
    pub current_version: i64,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Immutable snapshot of a document at one point in its history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: String,
    pub document_id: String,
    /// 1-indexed, dense and unique per document.
    pub version_number: i64,
    pub content_hash: String,
    pub file_size: Option<i64>,
    #[serde(rename = "change_type")]
    pub change_kind: ChangeKind,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A version together with the text payload to store alongside it.
#[derive(Debug, Clone)]
pub struct VersionRecord {
    pub version: Version,
    pub content: Option<String>,
}

/// A chunk of one version's content.
///
/// Chunk text is stored separately as chunk content, never in `metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub version_id: String,
    /// 0-based position within the version.
    pub chunk_index: i64,
    pub content_hash: String,
    pub token_count: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A chunk paired with its text, as produced by the chunk detector.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub chunk: Chunk,
    pub text: Option<String>,
}

/// Notification emitted once per detected change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub document_id: String,
    pub version_id: String,
    pub file_path: String,
    pub file_name: String,
    #[serde(rename = "change_type")]
    pub change_kind: ChangeKind,
    pub version_number: i64,
    pub content_hash: String,
    pub previous_hash: Option<String>,
    pub file_size: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Outcome of tracking a single path.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackResult {
    /// Whether a new version was recorded.
    pub changed: bool,
    pub event: Option<ChangeEvent>,
    /// Current version number of the document after the call, if it is tracked.
    pub version_number: Option<i64>,
    /// Whether the document existed before the call.
    pub was_tracked: bool,
}

/// Chunk-level comparison between two versions of one document.
///
/// `to_version` is the newer version; chunk lists refer to that version's
/// chunks except `removed`, which lists chunks of `from_version`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkDiff {
    pub document_id: String,
    /// 0 when the new version has no predecessor.
    pub from_version: i64,
    pub to_version: i64,
    pub added: Vec<ChunkRecord>,
    pub removed: Vec<ChunkRecord>,
    pub unchanged: Vec<ChunkRecord>,
    pub reordered: Vec<ChunkRecord>,
}

impl ChunkDiff {
    /// Number of chunks in the new version.
    pub fn total_chunks(&self) -> usize {
        self.added.len() + self.unchanged.len() + self.reordered.len()
    }

    /// Chunks that require re-processing or removal downstream.
    pub fn total_changes(&self) -> usize {
        self.added.len() + self.removed.len()
    }

    /// Share of new-version chunks that can be skipped, 0 to 100.
    pub fn savings_percentage(&self) -> f64 {
        let total = self.total_chunks();
        if total == 0 {
            return 0.0;
        }
        (self.unchanged.len() + self.reordered.len()) as f64 / total as f64 * 100.0
    }

    /// Chunks to persist for the new version, in chunk order.
    pub fn current_chunks(&self) -> Vec<&ChunkRecord> {
        let mut all: Vec<&ChunkRecord> = self
            .added
            .iter()
            .chain(self.unchanged.iter())
            .chain(self.reordered.iter())
            .collect();
        all.sort_by_key(|c| c.chunk.chunk_index);
        all
    }

    pub fn savings(&self) -> SavingsMetrics {
        SavingsMetrics {
            total_chunks: self.total_chunks(),
            unchanged_chunks: self.unchanged.len() + self.reordered.len(),
            changed_chunks: self.total_changes(),
            chunks_to_embed: self.added.len(),
            savings_percentage: self.savings_percentage(),
            added: self.added.len(),
            removed: self.removed.len(),
            reordered: self.reordered.len(),
        }
    }
}

/// Re-processing cost summary derived from a [`ChunkDiff`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SavingsMetrics {
    pub total_chunks: usize,
    /// Unchanged plus reordered.
    pub unchanged_chunks: usize,
    /// Added plus removed.
    pub changed_chunks: usize,
    pub chunks_to_embed: usize,
    pub savings_percentage: f64,
    pub added: usize,
    pub removed: usize,
    pub reordered: usize,
}

/// A file that failed during a batch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileProcessingError {
    pub file_path: String,
    pub error: String,
    /// Category string, see [`ErrorCategory::as_str`].
    pub error_type: String,
    /// Type name of the underlying failure.
    pub cause_type: String,
    pub timestamp: DateTime<Utc>,
}

impl FileProcessingError {
    pub fn from_error(file_path: impl Into<String>, err: &Error) -> Self {
        Self {
            file_path: file_path.into(),
            error: err.to_string(),
            error_type: err.category().as_str().to_string(),
            cause_type: err.cause_type(),
            timestamp: Utc::now(),
        }
    }

    pub fn category_is(&self, category: ErrorCategory) -> bool {
        self.error_type == category.as_str()
    }
}

/// Outcome of a directory-wide tracking run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub successful: Vec<ChangeEvent>,
    pub failed: Vec<FileProcessingError>,
    pub total_files: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchResult {
    pub fn new(total_files: usize) -> Self {
        Self {
            successful: Vec::new(),
            failed: Vec::new(),
            total_files,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn success_count(&self) -> usize {
        self.successful.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    /// Files that were processed but had nothing to record.
    pub fn unchanged_count(&self) -> usize {
        self.total_files
            .saturating_sub(self.success_count() + self.failure_count())
    }

    /// Percentage of files that produced a change, 0 when the run was empty.
    pub fn success_rate(&self) -> f64 {
        if self.total_files == 0 {
            return 0.0;
        }
        self.success_count() as f64 / self.total_files as f64 * 100.0
    }

    pub fn duration_seconds(&self) -> f64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Line-level diff between two versions' stored content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffResult {
    pub document_id: String,
    pub from_version: i64,
    pub to_version: i64,
    pub diff_text: String,
    pub additions: usize,
    pub deletions: usize,
    pub from_hash: String,
    pub to_hash: String,
}

/// Backend-wide totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageStatistics {
    pub total_documents: i64,
    pub total_versions: i64,
    pub total_storage_bytes: i64,
    pub average_versions_per_document: f64,
    pub documents_by_file_type: BTreeMap<String, i64>,
    /// Versions created in the last seven days.
    pub recent_activity_count: i64,
    pub oldest_document_date: Option<DateTime<Utc>>,
    pub newest_document_date: Option<DateTime<Utc>>,
}

/// How often a document changes, bucketed by average days between versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeFrequency {
    High,
    Medium,
    Low,
}

impl ChangeFrequency {
    /// `< 1` day is high, `< 7` days is medium, anything else is low.
    pub fn from_average_days(days: f64) -> Self {
        if days < 1.0 {
            ChangeFrequency::High
        } else if days < 7.0 {
            ChangeFrequency::Medium
        } else {
            ChangeFrequency::Low
        }
    }
}

/// Per-document history summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentStatistics {
    pub document_id: String,
    pub file_name: String,
    pub file_path: String,
    pub total_versions: i64,
    pub versions_by_change_type: BTreeMap<String, i64>,
    pub total_size_bytes: i64,
    pub first_tracked: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub average_days_between_changes: f64,
    pub change_frequency: ChangeFrequency,
}

impl DocumentStatistics {
    pub fn from_versions(document: &Document, versions: &[Version]) -> Self {
        let mut by_kind = BTreeMap::new();
        for v in versions {
            *by_kind.entry(v.change_kind.as_str().to_string()).or_insert(0) += 1;
        }

        let total = versions.len() as i64;
        let average_days = if total > 1 {
            let secs = (document.updated_at - document.created_at).num_milliseconds() as f64 / 1000.0;
            secs / 86_400.0 / (total - 1) as f64
        } else {
            0.0
        };

        Self {
            document_id: document.id.clone(),
            file_name: document.file_name.clone(),
            file_path: document.file_path.clone(),
            total_versions: total,
            versions_by_change_type: by_kind,
            total_size_bytes: document.file_size,
            first_tracked: document.created_at,
            last_updated: document.updated_at,
            average_days_between_changes: average_days,
            change_frequency: ChangeFrequency::from_average_days(average_days),
        }
    }
}

/// Sort key for document listings. Always descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocumentSort {
    #[default]
    UpdatedAt,
    CreatedAt,
    FileName,
    FileSize,
    VersionCount,
}

impl DocumentSort {
    /// Parse a user-supplied key. Unknown keys fall back to `updated_at` so
    /// raw input never reaches query text.
    pub fn parse_lenient(key: &str) -> Self {
        match key {
            "created_at" => DocumentSort::CreatedAt,
            "file_name" => DocumentSort::FileName,
            "file_size" => DocumentSort::FileSize,
            "version_count" => DocumentSort::VersionCount,
            _ => DocumentSort::UpdatedAt,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            DocumentSort::UpdatedAt => "updated_at",
            DocumentSort::CreatedAt => "created_at",
            DocumentSort::FileName => "file_name",
            DocumentSort::FileSize => "file_size",
            DocumentSort::VersionCount => "version_count",
        }
    }
}

/// Filter for [`Store::search_documents`](crate::store::Store::search_documents).
///
/// Every metadata entry must match exactly (JSON equality on the top-level key).
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub metadata: Metadata,
    pub file_type: Option<String>,
}

impl DocumentFilter {
    pub fn matches(&self, doc: &Document) -> bool {
        if let Some(ft) = &self.file_type {
            if &doc.file_type != ft {
                return false;
            }
        }
        self.metadata
            .iter()
            .all(|(k, v)| doc.metadata.get(k) == Some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(index: i64, hash: &str) -> ChunkRecord {
        ChunkRecord {
            chunk: Chunk {
                id: new_id(),
                document_id: "d".into(),
                version_id: "v".into(),
                chunk_index: index,
                content_hash: hash.into(),
                token_count: 1,
                created_at: Utc::now(),
                metadata: Metadata::new(),
            },
            text: None,
        }
    }

    fn doc(created: DateTime<Utc>, updated: DateTime<Utc>) -> Document {
        Document {
            id: "doc".into(),
            file_path: "/tmp/a.txt".into(),
            file_name: "a.txt".into(),
            file_type: ".txt".into(),
            file_size: 5,
            content_hash: "h".into(),
            created_at: created,
            updated_at: updated,
            version_count: 1,
            current_version: 1,
            metadata: Metadata::new(),
        }
    }

    fn version(n: i64, kind: ChangeKind) -> Version {
        Version {
            id: new_id(),
            document_id: "doc".into(),
            version_number: n,
            content_hash: "h".into(),
            file_size: Some(5),
            change_kind: kind,
            created_at: Utc::now(),
            created_by: None,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn test_empty_diff_has_zero_savings() {
        let diff = ChunkDiff::default();
        assert_eq!(diff.total_chunks(), 0);
        assert_eq!(diff.savings_percentage(), 0.0);
    }

    #[test]
    fn test_savings_counts_reordered_as_saved() {
        let diff = ChunkDiff {
            added: vec![record(2, "d")],
            removed: vec![record(0, "a")],
            reordered: vec![record(0, "b"), record(1, "c")],
            ..Default::default()
        };
        let metrics = diff.savings();
        assert_eq!(metrics.total_chunks, 3);
        assert_eq!(metrics.unchanged_chunks, 2);
        assert_eq!(metrics.changed_chunks, 2);
        assert_eq!(metrics.chunks_to_embed, 1);
        assert!((metrics.savings_percentage - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_current_chunks_sorted_by_index() {
        let diff = ChunkDiff {
            added: vec![record(2, "d")],
            reordered: vec![record(0, "b"), record(1, "c")],
            ..Default::default()
        };
        let idx: Vec<i64> = diff.current_chunks().iter().map(|c| c.chunk.chunk_index).collect();
        assert_eq!(idx, vec![0, 1, 2]);
    }

    #[test]
    fn test_batch_result_rates() {
        let mut result = BatchResult::new(0);
        assert_eq!(result.success_rate(), 0.0);

        result.total_files = 4;
        result.failed.push(FileProcessingError::from_error(
            "x",
            &Error::DocumentNotFound("x".into()),
        ));
        assert_eq!(result.failure_count(), 1);
        assert_eq!(result.unchanged_count(), 3);
        assert_eq!(result.success_rate(), 0.0);
        assert!(result.failed[0].category_is(ErrorCategory::NotFound));
    }

    #[test]
    fn test_change_kind_serde_lowercase() {
        let json = serde_json::to_string(&ChangeKind::Restored).unwrap();
        assert_eq!(json, "\"restored\"");
        assert_eq!("modified".parse::<ChangeKind>().unwrap(), ChangeKind::Modified);
        assert!("bogus".parse::<ChangeKind>().is_err());
    }

    #[test]
    fn test_document_sort_fallback() {
        assert_eq!(DocumentSort::parse_lenient("file_size"), DocumentSort::FileSize);
        assert_eq!(
            DocumentSort::parse_lenient("name; DROP TABLE documents"),
            DocumentSort::UpdatedAt
        );
        assert_eq!(DocumentSort::default().column(), "updated_at");
    }

    #[test]
    fn test_document_statistics_frequency() {
        let created = Utc::now() - Duration::days(10);
        let d = doc(created, created + Duration::days(10));
        let versions = vec![
            version(1, ChangeKind::Created),
            version(2, ChangeKind::Modified),
            version(3, ChangeKind::Modified),
        ];
        let stats = DocumentStatistics::from_versions(&d, &versions);
        assert_eq!(stats.total_versions, 3);
        assert_eq!(stats.versions_by_change_type.get("modified"), Some(&2));
        assert!((stats.average_days_between_changes - 5.0).abs() < 1e-6);
        assert_eq!(stats.change_frequency, ChangeFrequency::Medium);
    }

    #[test]
    fn test_single_version_is_high_frequency() {
        let now = Utc::now();
        let stats = DocumentStatistics::from_versions(&doc(now, now), &[version(1, ChangeKind::Created)]);
        assert_eq!(stats.average_days_between_changes, 0.0);
        assert_eq!(stats.change_frequency, ChangeFrequency::High);
    }

    #[test]
    fn test_filter_matches_metadata_and_type() {
        let mut d = doc(Utc::now(), Utc::now());
        d.metadata.insert("team".into(), serde_json::json!("docs"));
        let mut filter = DocumentFilter::default();
        assert!(filter.matches(&d));
        filter.metadata.insert("team".into(), serde_json::json!("docs"));
        filter.file_type = Some(".txt".into());
        assert!(filter.matches(&d));
        filter.file_type = Some(".md".into());
        assert!(!filter.matches(&d));
    }
}
