//! Vector store abstraction.
//!
//! Records are partitioned by namespace (one per repository). All backends
//! rank by cosine distance, `1 - cosine similarity`, so smaller is closer.

pub mod memory;
pub mod sqlite;

#[cfg(feature = "lancedb")]
pub mod lancedb;

pub use memory::InMemoryVectorStore;
pub use sqlite::SqliteVectorStore;

#[cfg(feature = "lancedb")]
pub use self::lancedb::LanceDbVectorStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vector has {got} dimensions, store expects {expected}")]
    Dimension { expected: usize, got: usize },

    #[error("backend error: {0}")]
    Backend(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Fixed-field metadata stored next to every vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
    pub language: String,
    pub symbol: Option<String>,
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreHit {
    pub id: String,
    pub distance: f32,
    pub metadata: ChunkMetadata,
    pub text: String,
}

/// Optional query restrictions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    pub language: Option<String>,
    pub path_prefix: Option<String>,
}

impl SearchFilter {
    pub fn language(language: impl Into<String>) -> Self {
        Self {
            language: Some(language.into()),
            path_prefix: None,
        }
    }

    pub fn path_prefix(prefix: impl Into<String>) -> Self {
        Self {
            language: None,
            path_prefix: Some(prefix.into()),
        }
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        self.language
            .as_deref()
            .map_or(true, |lang| metadata.language == lang)
            && self
                .path_prefix
                .as_deref()
                .map_or(true, |prefix| metadata.path.starts_with(prefix))
    }
}

/// Trait for vector store backends.
///
/// `upsert` is keyed by record id and idempotent. `query` returns at most
/// `k` hits ordered by ascending distance, ties broken by path, start line
/// and id so that results are reproducible.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn backend_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<(), StoreError>;

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<StoreHit>, StoreError>;

    /// Remove records by id, returning how many existed.
    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<usize, StoreError>;

    async fn count(&self, namespace: &str) -> Result<usize, StoreError>;
}

pub(crate) fn check_dimensions(expected: usize, vector: &[f32]) -> Result<(), StoreError> {
    if vector.len() != expected {
        return Err(StoreError::Dimension {
            expected,
            got: vector.len(),
        });
    }
    Ok(())
}

/// Total order used by every backend for query results.
pub(crate) fn compare_hits(a: &StoreHit, b: &StoreHit) -> Ordering {
    a.distance
        .partial_cmp(&b.distance)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.metadata.path.cmp(&b.metadata.path))
        .then_with(|| a.metadata.start_line.cmp(&b.metadata.start_line))
        .then_with(|| a.id.cmp(&b.id))
}

/// Calculate cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// `1 - cosine_similarity`; a zero vector is at distance 1 from everything.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}
