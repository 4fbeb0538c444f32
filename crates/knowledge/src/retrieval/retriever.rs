//! First-stage retrieval: nearest neighbours with a relaxable similarity floor.

use crate::config::RetrievalConfig;
use crate::embeddings::EmbeddingGenerator;
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::store::{SearchFilter, VectorStore};
use crate::types::{RetrievalResult, StoredChunk};
use std::cmp::Ordering;
use std::sync::Arc;

/// Candidates for one query.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    /// Similarity descending, then path and start line ascending
    pub results: Vec<RetrievalResult>,
    /// The floor was lowered because too few candidates passed it
    pub floor_relaxed: bool,
}

pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedder: EmbeddingGenerator,
    config: RetrievalConfig,
}

pub(crate) fn compare_similarity(a: &RetrievalResult, b: &RetrievalResult) -> Ordering {
    b.similarity
        .partial_cmp(&a.similarity)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.chunk.metadata.path.cmp(&b.chunk.metadata.path))
        .then_with(|| a.chunk.metadata.start_line.cmp(&b.chunk.metadata.start_line))
}

impl Retriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: EmbeddingGenerator,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub fn candidates(&self) -> usize {
        self.config.candidates
    }

    /// Fetch up to `n` candidates for `query` from `namespace`.
    pub async fn retrieve(
        &self,
        repository: &str,
        namespace: &str,
        query: &str,
        n: usize,
        filter: Option<&SearchFilter>,
    ) -> KnowledgeResult<Retrieval> {
        let vector = self
            .embedder
            .embed_query(query)
            .await
            .map_err(|e| KnowledgeError::Retrieval {
                repository: repository.to_string(),
                reason: format!("query embedding failed: {}", e),
            })?;

        let hits = self
            .store
            .query(namespace, &vector, n, filter)
            .await
            .map_err(|e| KnowledgeError::store(repository, e))?;

        let mut candidates: Vec<RetrievalResult> = hits
            .into_iter()
            .map(|hit| RetrievalResult {
                similarity: 1.0 - hit.distance,
                chunk: StoredChunk::from(hit),
            })
            .collect();
        candidates.sort_by(compare_similarity);

        let candidates = dedup_overlapping(candidates);
        let retrieval = self.apply_floor(candidates);

        tracing::debug!(
            "Retrieved {} candidates for '{}' (floor relaxed: {})",
            retrieval.results.len(),
            repository,
            retrieval.floor_relaxed
        );
        Ok(retrieval)
    }

    /// Expects `candidates` sorted by similarity, best first.
    fn apply_floor(&self, candidates: Vec<RetrievalResult>) -> Retrieval {
        let passing = |floor: f32| candidates.iter().take_while(|r| r.similarity >= floor).count();

        let strict = passing(self.config.similarity_floor);
        if strict >= self.config.min_useful {
            return Retrieval {
                results: candidates.into_iter().take(strict).collect(),
                floor_relaxed: false,
            };
        }

        let relaxed = passing(self.config.relaxed_floor);
        let keep = relaxed.max(self.config.min_useful.min(candidates.len()));
        // A small namespace where every candidate cleared the floor is not a relaxation.
        let floor_relaxed = keep > strict;
        if floor_relaxed {
            tracing::debug!(
                "Only {} candidates above {:.2}; relaxing floor to {:.2}",
                strict,
                self.config.similarity_floor,
                self.config.relaxed_floor
            );
        }
        Retrieval {
            results: candidates.into_iter().take(keep).collect(),
            floor_relaxed,
        }
    }
}

/// Drop results that overlap a better result from the same file.
fn dedup_overlapping(sorted: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
    let mut kept: Vec<RetrievalResult> = Vec::with_capacity(sorted.len());
    for candidate in sorted {
        if !kept.iter().any(|k| k.chunk.overlaps(&candidate.chunk)) {
            kept.push(candidate);
        }
    }
    kept
}
