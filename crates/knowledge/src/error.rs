//! Error kinds for the ingestion and query pipelines.

use crate::store::StoreError;
use repomind_core::AppError;
use thiserror::Error;

/// Errors surfaced by the knowledge pipeline.
///
/// Every variant names the repository it concerns and, where one applies,
/// the file being processed.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("failed to fetch repository '{repository}': {reason}")]
    Clone { repository: String, reason: String },

    #[error("failed to parse '{path}' in '{repository}': {reason}")]
    Parse {
        repository: String,
        path: String,
        reason: String,
    },

    #[error("embedding failed for '{repository}'{}: {reason}", at_file(.path))]
    Embedding {
        repository: String,
        path: Option<String>,
        reason: String,
    },

    #[error("vector store error for '{repository}'{}: {source}", at_file(.path))]
    Store {
        repository: String,
        path: Option<String>,
        #[source]
        source: StoreError,
    },

    #[error("retrieval failed for '{repository}': {reason}")]
    Retrieval { repository: String, reason: String },

    #[error("rerank failed for '{repository}': {reason}")]
    Rerank { repository: String, reason: String },

    #[error("answer synthesis failed for '{repository}': {reason}")]
    Synthesis { repository: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("manifest error for '{repository}': {reason}")]
    Manifest { repository: String, reason: String },
}

fn at_file(path: &Option<String>) -> String {
    match path {
        Some(path) => format!(" (file '{}')", path),
        None => String::new(),
    }
}

impl KnowledgeError {
    pub fn store(repository: impl Into<String>, source: StoreError) -> Self {
        Self::Store {
            repository: repository.into(),
            path: None,
            source,
        }
    }

    pub fn store_at(
        repository: impl Into<String>,
        path: impl Into<String>,
        source: StoreError,
    ) -> Self {
        Self::Store {
            repository: repository.into(),
            path: Some(path.into()),
            source,
        }
    }

    pub fn manifest(repository: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Manifest {
            repository: repository.into(),
            reason: reason.to_string(),
        }
    }

    /// Short label used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Clone { .. } => "clone",
            Self::Parse { .. } => "parse",
            Self::Embedding { .. } => "embedding",
            Self::Store { .. } => "store",
            Self::Retrieval { .. } => "retrieval",
            Self::Rerank { .. } => "rerank",
            Self::Synthesis { .. } => "synthesis",
            Self::Config(_) => "config",
            Self::InvalidInput(_) => "invalid-input",
            Self::Manifest { .. } => "manifest",
        }
    }
}

impl From<KnowledgeError> for AppError {
    fn from(err: KnowledgeError) -> Self {
        AppError::Knowledge(err.to_string())
    }
}

/// Result alias for the knowledge pipeline.
pub type KnowledgeResult<T> = Result<T, KnowledgeError>;
