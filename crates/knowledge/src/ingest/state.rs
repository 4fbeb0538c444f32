use serde::{Deserialize, Serialize};
use std::fmt;

/// Ingestion lifecycle of one repository.
///
/// ```text
/// NotIngested -> Cloning -> Discovering -> ChunkingAndEmbedding -> Indexed
///                   ^                              ^                  |
///                   |                              +------------------+  (incremental)
///                Failed <------------- any state but Failed ----------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionState {
    NotIngested,
    Cloning,
    Discovering,
    ChunkingAndEmbedding,
    Indexed,
    Failed { reason: String },
}

impl IngestionState {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotIngested => "not_ingested",
            Self::Cloning => "cloning",
            Self::Discovering => "discovering",
            Self::ChunkingAndEmbedding => "chunking_and_embedding",
            Self::Indexed => "indexed",
            Self::Failed { .. } => "failed",
        }
    }

    /// Rebuild a state from its persisted columns.
    pub fn from_parts(state: &str, failure: Option<String>) -> Option<Self> {
        Some(match state {
            "not_ingested" => Self::NotIngested,
            "cloning" => Self::Cloning,
            "discovering" => Self::Discovering,
            "chunking_and_embedding" => Self::ChunkingAndEmbedding,
            "indexed" => Self::Indexed,
            "failed" => Self::Failed {
                reason: failure.unwrap_or_default(),
            },
            _ => return None,
        })
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Failed { reason } => Some(reason),
            _ => None,
        }
    }

    /// An attempt is running (or died while running).
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            Self::Cloning | Self::Discovering | Self::ChunkingAndEmbedding
        )
    }

    pub fn can_transition_to(&self, next: &IngestionState) -> bool {
        use IngestionState::*;
        match (self, next) {
            (Failed { .. }, Failed { .. }) => false,
            (_, Failed { .. }) => true,
            (NotIngested, Cloning)
            | (Failed { .. }, Cloning)
            | (Cloning, Discovering)
            | (Discovering, ChunkingAndEmbedding)
            | (ChunkingAndEmbedding, Indexed)
            | (Indexed, ChunkingAndEmbedding) => true,
            _ => false,
        }
    }
}

impl fmt::Display for IngestionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { reason } => write!(f, "failed ({})", reason),
            other => f.write_str(other.as_str()),
        }
    }
}
