//! Hash-based chunk classification.
//!
//! Compares the chunk set of an older version against freshly built chunks
//! for a newer one. Chunks are matched purely by content hash:
//!
//! - hash absent from the old set → **added**
//! - hash present at the same `chunk_index` → **unchanged**
//! - hash present at a different `chunk_index` → **reordered**
//! - old hash absent from the new set → **removed**
//!
//! When the same hash occurs more than once in a set, the last occurrence
//! wins for both lookup and position.

use std::collections::{HashMap, HashSet};

use crate::chunk::Chunker;
use crate::hash::HashAlgorithm;
use crate::models::{new_id, now, Chunk, ChunkDiff, ChunkRecord, Metadata};

/// Build chunk records for `segments`, indexed in order from 0.
pub fn build_chunk_records(
    document_id: &str,
    version_id: &str,
    segments: Vec<String>,
    algorithm: HashAlgorithm,
    chunker: &dyn Chunker,
) -> Vec<ChunkRecord> {
    let now = now();
    segments
        .into_iter()
        .enumerate()
        .map(|(index, text)| ChunkRecord {
            chunk: Chunk {
                id: new_id(),
                document_id: document_id.to_string(),
                version_id: version_id.to_string(),
                chunk_index: index as i64,
                content_hash: algorithm.hash(&text),
                token_count: chunker.estimate_tokens(&text) as i64,
                created_at: now,
                metadata: Metadata::new(),
            },
            text: Some(text),
        })
        .collect()
}

/// Classify `new` against `old`.
pub fn classify(
    document_id: &str,
    from_version: i64,
    to_version: i64,
    old: Vec<ChunkRecord>,
    new: Vec<ChunkRecord>,
) -> ChunkDiff {
    let old_positions: HashMap<&str, i64> = old
        .iter()
        .map(|c| (c.chunk.content_hash.as_str(), c.chunk.chunk_index))
        .collect();
    let new_hashes: HashSet<String> = new.iter().map(|c| c.chunk.content_hash.clone()).collect();

    let mut diff = ChunkDiff {
        document_id: document_id.to_string(),
        from_version,
        to_version,
        ..Default::default()
    };

    for record in new {
        match old_positions.get(record.chunk.content_hash.as_str()) {
            None => diff.added.push(record),
            Some(&pos) if pos == record.chunk.chunk_index => diff.unchanged.push(record),
            Some(_) => diff.reordered.push(record),
        }
    }

    diff.removed = old
        .into_iter()
        .filter(|c| !new_hashes.contains(&c.chunk.content_hash))
        .collect();

    diff
}
