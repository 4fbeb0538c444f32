//! Answer types returned by the query path.

use crate::types::RankedResult;
use serde::{Deserialize, Serialize};

/// Marker text used when the language model could not be reached.
pub const GENERATION_UNAVAILABLE: &str =
    "Answer generation is unavailable. The most relevant source locations are listed below.";

/// Marker text used when no retrieved chunk fits the context budget.
pub const CONTEXT_EXCEEDED: &str =
    "The retrieved sources are too large for the context budget. The most relevant source locations are listed below.";

/// How the answer text was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Generated,
    /// The model failed twice; `text` only points at the citations
    GenerationUnavailable,
    /// Every ranked chunk was dropped to fit the token budget; the model was not called
    ContextExceeded,
    /// The repository has no chunks in the store
    NotIndexed,
}

impl AnswerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generated => "generated",
            Self::GenerationUnavailable => "generation_unavailable",
            Self::ContextExceeded => "context_exceeded",
            Self::NotIndexed => "not_indexed",
        }
    }
}

/// Parts of the query path that degraded while producing an answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Degradations {
    /// Reranking failed and similarity order was used
    pub rerank_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_error: Option<String>,
    /// Too few candidates passed the similarity floor
    pub floor_relaxed: bool,
    /// Ranked chunks left out to stay within the token budget
    pub dropped_for_budget: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_error: Option<String>,
}

impl Degradations {
    pub fn any(&self) -> bool {
        self.rerank_fallback
            || self.floor_relaxed
            || self.dropped_for_budget > 0
            || self.generation_error.is_some()
    }

    /// One human-readable line per degradation.
    pub fn notes(&self) -> Vec<String> {
        let mut notes = Vec::new();
        if self.rerank_fallback {
            match &self.rerank_error {
                Some(reason) => notes.push(format!(
                    "reranking unavailable ({}), results are in similarity order",
                    reason
                )),
                None => notes.push("reranking unavailable, results are in similarity order".into()),
            }
        }
        if self.floor_relaxed {
            notes.push("few strong matches, similarity floor was relaxed".into());
        }
        if self.dropped_for_budget > 0 {
            notes.push(format!(
                "{} ranked chunk(s) left out to fit the context budget",
                self.dropped_for_budget
            ));
        }
        if let Some(reason) = &self.generation_error {
            notes.push(format!("answer generation failed: {}", reason));
        }
        notes
    }
}

/// Answer to a question about one repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub repository: String,
    pub question: String,
    pub text: String,
    /// Chunks given to the model, in rank order
    pub citations: Vec<RankedResult>,
    pub status: AnswerStatus,
    pub degradations: Degradations,
}

impl Answer {
    /// Explicit result for a repository with nothing in the store.
    pub fn not_indexed(repository: &str, question: &str) -> Self {
        Self {
            repository: repository.to_string(),
            question: question.to_string(),
            text: format!(
                "Repository '{}' is not indexed. Run `repomind ingest {}` first.",
                repository, repository
            ),
            citations: Vec::new(),
            status: AnswerStatus::NotIndexed,
            degradations: Degradations::default(),
        }
    }

    pub fn is_generated(&self) -> bool {
        self.status == AnswerStatus::Generated
    }

    /// `path:start-end` of every citation, in rank order.
    pub fn citation_locations(&self) -> Vec<String> {
        self.citations.iter().map(|c| c.chunk.location()).collect()
    }
}
