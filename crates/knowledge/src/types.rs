//! Repository, report and result types shared across the pipelines.

use crate::ingest::IngestionState;
use crate::store::{ChunkMetadata, StoreHit};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A repository known to the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    /// URL or local path as given by the caller
    pub identifier: String,

    /// Vector store namespace owning this repository's chunks
    pub namespace: String,

    pub checkout_path: PathBuf,

    /// Commit of the last successful ingestion, when the source is a git tree
    pub last_commit: Option<String>,

    pub state: IngestionState,

    /// Whether an indexed snapshot exists and can be queried
    pub has_snapshot: bool,

    pub indexed_at: Option<DateTime<Utc>>,
}

impl Repository {
    pub fn new(identifier: String, namespace: String, checkout_path: PathBuf) -> Self {
        Self {
            identifier,
            namespace,
            checkout_path,
            last_commit: None,
            state: IngestionState::NotIngested,
            has_snapshot: false,
            indexed_at: None,
        }
    }
}

/// Summary of one ingestion attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub repository: String,
    pub namespace: String,
    pub commit: Option<String>,
    pub state: IngestionState,
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_removed: usize,
    pub files_skipped: usize,
    /// Files whose parse failed and were windowed instead
    pub parse_fallbacks: usize,
    pub chunks_written: usize,
    pub chunks_deleted: usize,
    /// The previous attempt died mid-run and was recorded as failed first
    #[serde(default)]
    pub recovered_interrupted: bool,
    pub duration_secs: f64,
}

impl IngestReport {
    pub fn new(repository: &Repository) -> Self {
        Self {
            repository: repository.identifier.clone(),
            namespace: repository.namespace.clone(),
            commit: repository.last_commit.clone(),
            state: repository.state.clone(),
            files_scanned: 0,
            files_indexed: 0,
            files_unchanged: 0,
            files_removed: 0,
            files_skipped: 0,
            parse_fallbacks: 0,
            chunks_written: 0,
            chunks_deleted: 0,
            recovered_interrupted: false,
            duration_secs: 0.0,
        }
    }

    /// True when the attempt touched nothing in the store.
    pub fn is_noop(&self) -> bool {
        self.files_indexed == 0 && self.files_removed == 0 && self.chunks_deleted == 0
    }
}

/// A chunk as read back from the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl StoredChunk {
    /// `path:start-end`, as shown in citations.
    pub fn location(&self) -> String {
        format!(
            "{}:{}-{}",
            self.metadata.path, self.metadata.start_line, self.metadata.end_line
        )
    }

    pub fn overlaps(&self, other: &StoredChunk) -> bool {
        self.metadata.path == other.metadata.path
            && self.metadata.start_line <= other.metadata.end_line
            && other.metadata.start_line <= self.metadata.end_line
    }
}

impl From<StoreHit> for StoredChunk {
    fn from(hit: StoreHit) -> Self {
        Self {
            id: hit.id,
            text: hit.text,
            metadata: hit.metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk: StoredChunk,
    /// `1 - cosine distance`
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub chunk: StoredChunk,
    pub similarity: f32,
    pub rerank_score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(path: &str, start: usize, end: usize) -> StoredChunk {
        StoredChunk {
            id: format!("{}-{}", path, start),
            text: String::new(),
            metadata: ChunkMetadata {
                path: path.to_string(),
                start_line: start,
                end_line: end,
                start_byte: 0,
                end_byte: 0,
                language: "rust".to_string(),
                symbol: None,
                content_hash: String::new(),
            },
        }
    }

    #[test]
    fn test_overlap_requires_same_path() {
        assert!(chunk("a.rs", 1, 40).overlaps(&chunk("a.rs", 31, 70)));
        assert!(chunk("a.rs", 1, 40).overlaps(&chunk("a.rs", 40, 41)));
        assert!(!chunk("a.rs", 1, 40).overlaps(&chunk("a.rs", 41, 80)));
        assert!(!chunk("a.rs", 1, 40).overlaps(&chunk("b.rs", 1, 40)));
    }

    #[test]
    fn test_location() {
        assert_eq!(chunk("src/auth.js", 4, 12).location(), "src/auth.js:4-12");
    }

    #[test]
    fn test_new_repository_has_no_snapshot() {
        let repo = Repository::new("./demo".into(), "demo-0123".into(), PathBuf::from("./demo"));
        assert_eq!(repo.state, IngestionState::NotIngested);
        assert!(!repo.has_snapshot);
    }
}
