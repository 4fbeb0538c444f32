//! Pipeline configuration and on-disk layout.
//!
//! Tuning lives in `.repomind/knowledge.yaml`; a default file is written the
//! first time a workspace is used.

use crate::embeddings::EmbeddingConfig;
use repomind_core::config::DATA_DIR_NAME;
use repomind_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Complete knowledge pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeConfig {
    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub rerank: RerankConfig,

    #[serde(default)]
    pub synthesis: SynthesisConfig,
}

/// Chunk sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkingConfig {
    /// Lines per fallback window
    #[serde(default = "default_window_lines")]
    pub window_lines: usize,

    /// Lines shared by consecutive windows
    #[serde(default = "default_overlap_lines")]
    pub overlap_lines: usize,

    /// Definitions longer than this are windowed
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,

    /// Module-level material below this many non-whitespace chars is dropped
    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,
}

fn default_window_lines() -> usize {
    40
}

fn default_overlap_lines() -> usize {
    10
}

fn default_max_chunk_chars() -> usize {
    3000
}

fn default_min_chunk_chars() -> usize {
    40
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_lines: default_window_lines(),
            overlap_lines: default_overlap_lines(),
            max_chunk_chars: default_max_chunk_chars(),
            min_chunk_chars: default_min_chunk_chars(),
        }
    }
}

/// Vector store backend selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// "sqlite", "memory" or "lancedb"
    #[serde(default = "default_backend")]
    pub backend: String,
}

fn default_backend() -> String {
    "sqlite".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
        }
    }
}

/// Ingestion pipeline sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestConfig {
    /// Chunking workers; unset means available parallelism
    #[serde(default)]
    pub workers: Option<usize>,

    /// Messages buffered between chunking and embedding
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Files above this size are skipped
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

fn default_queue_capacity() -> usize {
    256
}

fn default_max_file_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: None,
            queue_capacity: default_queue_capacity(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

impl IngestConfig {
    /// Worker count with the parallelism fallback applied.
    pub fn effective_workers(&self) -> usize {
        self.workers
            .filter(|w| *w > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4)
            })
    }
}

/// First-stage retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalConfig {
    /// Candidates fetched from the store (N)
    #[serde(default = "default_candidates")]
    pub candidates: usize,

    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f32,

    #[serde(default)]
    pub relaxed_floor: f32,

    /// Below this many passing results the floor is relaxed
    #[serde(default = "default_min_useful")]
    pub min_useful: usize,
}

fn default_candidates() -> usize {
    30
}

fn default_similarity_floor() -> f32 {
    0.25
}

fn default_min_useful() -> usize {
    3
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidates: default_candidates(),
            similarity_floor: default_similarity_floor(),
            relaxed_floor: 0.0,
            min_useful: default_min_useful(),
        }
    }
}

/// Second-stage relevance scoring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RerankConfig {
    /// "lexical" or "http"
    #[serde(default = "default_rerank_model")]
    pub model: String,

    /// Cross-encoder endpoint for the "http" model
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Results kept after reranking (K)
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_rerank_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_rerank_model() -> String {
    "lexical".to_string()
}

fn default_top_k() -> usize {
    5
}

fn default_rerank_timeout_secs() -> u64 {
    10
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            model: default_rerank_model(),
            endpoint: None,
            top_k: default_top_k(),
            timeout_secs: default_rerank_timeout_secs(),
        }
    }
}

/// Answer generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SynthesisConfig {
    /// Context budget in estimated tokens
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_token_budget() -> usize {
    3000
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            timeout_secs: default_llm_timeout_secs(),
            retry_backoff_ms: default_retry_backoff_ms(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl KnowledgeConfig {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        let c = &self.chunking;
        if c.window_lines == 0 {
            return Err(AppError::Config("chunking.window_lines must be > 0".into()));
        }
        if c.overlap_lines >= c.window_lines {
            return Err(AppError::Config(format!(
                "chunking.overlap_lines ({}) must be smaller than window_lines ({})",
                c.overlap_lines, c.window_lines
            )));
        }
        if self.embedding.dimensions == 0 || self.embedding.batch_size == 0 {
            return Err(AppError::Config(
                "embedding.dimensions and embedding.batch_size must be > 0".into(),
            ));
        }
        if self.ingest.queue_capacity == 0 {
            return Err(AppError::Config("ingest.queue_capacity must be > 0".into()));
        }
        if self.rerank.top_k == 0 || self.rerank.top_k >= self.retrieval.candidates {
            return Err(AppError::Config(format!(
                "rerank.top_k ({}) must be positive and smaller than retrieval.candidates ({})",
                self.rerank.top_k, self.retrieval.candidates
            )));
        }
        if self.retrieval.relaxed_floor > self.retrieval.similarity_floor {
            return Err(AppError::Config(
                "retrieval.relaxed_floor must not exceed similarity_floor".into(),
            ));
        }
        Ok(())
    }
}

/// Load `knowledge.yaml`, writing the defaults when it does not exist yet.
pub fn load_config(workspace: &Path) -> AppResult<KnowledgeConfig> {
    let config_path = get_config_path(workspace);

    let config = if config_path.exists() {
        let content = fs::read_to_string(&config_path).map_err(|e| {
            AppError::Knowledge(format!("Failed to read config at {:?}: {}", config_path, e))
        })?;

        let config: KnowledgeConfig = serde_yaml::from_str(&content).map_err(|e| {
            AppError::Knowledge(format!("Failed to parse config at {:?}: {}", config_path, e))
        })?;

        tracing::debug!("Loaded knowledge config from {:?}", config_path);
        config
    } else {
        let config = KnowledgeConfig::default();
        save_config(workspace, &config)?;
        tracing::debug!("Wrote default knowledge config to {:?}", config_path);
        config
    };

    config.validate()?;
    Ok(config)
}

/// Save `knowledge.yaml`.
pub fn save_config(workspace: &Path, config: &KnowledgeConfig) -> AppResult<()> {
    let config_path = get_config_path(workspace);

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            AppError::Knowledge(format!("Failed to create config directory: {}", e))
        })?;
    }

    let yaml = serde_yaml::to_string(config)
        .map_err(|e| AppError::Knowledge(format!("Failed to serialize config: {}", e)))?;

    fs::write(&config_path, yaml).map_err(|e| {
        AppError::Knowledge(format!("Failed to write config to {:?}: {}", config_path, e))
    })?;

    Ok(())
}

/// `<workspace>/.repomind`
pub fn get_data_dir(workspace: &Path) -> PathBuf {
    workspace.join(DATA_DIR_NAME)
}

pub fn get_config_path(workspace: &Path) -> PathBuf {
    get_data_dir(workspace).join("knowledge.yaml")
}

/// SQLite file holding the manifest and the default vector store.
pub fn get_index_path(workspace: &Path) -> PathBuf {
    get_data_dir(workspace).join("index.db")
}

/// Directory holding clones of remote repositories.
pub fn get_repos_dir(workspace: &Path) -> PathBuf {
    get_data_dir(workspace).join("repos")
}

pub fn get_lancedb_path(workspace: &Path) -> PathBuf {
    get_data_dir(workspace).join("lancedb")
}
