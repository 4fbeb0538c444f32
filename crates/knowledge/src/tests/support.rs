//! Test doubles and fixtures shared by the pipeline tests.

use crate::config::KnowledgeConfig;
use crate::embeddings::providers::TrigramProvider;
use crate::embeddings::EmbeddingProvider;
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::ingest::{Checkout, GitSource, SourceProvider};
use crate::retrieval::RelevanceModel;
use crate::store::{InMemoryVectorStore, SearchFilter, StoreError, StoreHit, VectorRecord, VectorStore};
use crate::{RepoMind, RepoMindBuilder};
use repomind_core::{AppError, AppResult};
use repomind_llm::{LlmClient, LlmRequest, LlmResponse, LlmUsage};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const AUTH_JS: &str = r#"// Session handling for the web API.

const sessions = new Map();

function login(username, password) {
  if (!checkPassword(username, password)) {
    throw new Error("authentication failed for " + username);
  }
  const token = createToken(username);
  sessions.set(token, username);
  return token;
}

function logout(token) {
  sessions.delete(token);
}
"#;

pub const UTILS_PY: &str = r#"import re


def slugify(title):
    """Lowercase a title and join its words with dashes."""
    words = re.findall(r"[a-z0-9]+", title.lower())
    return "-".join(words)


def word_count(text):
    """Number of whitespace separated words."""
    return len(text.split())
"#;

/// Two-file sample repository in a fresh temporary directory.
pub fn sample_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "auth.js", AUTH_JS);
    write(dir.path(), "utils.py", UTILS_PY);
    dir
}

pub fn write(root: &Path, path: &str, contents: &str) {
    let target = root.join(path);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(target, contents).unwrap();
}

pub fn identifier(dir: &TempDir) -> String {
    dir.path().to_string_lossy().to_string()
}

/// Defaults with the waits shortened.
pub fn test_config() -> KnowledgeConfig {
    let mut config = KnowledgeConfig::default();
    config.synthesis.retry_backoff_ms = 1;
    config.ingest.workers = Some(2);
    config
}

pub fn builder(llm: Arc<dyn LlmClient>) -> RepoMindBuilder {
    RepoMind::builder(test_config()).llm(llm, "test-model")
}

/// Answers every request with the same text and remembers the prompts.
pub struct ScriptedLlm {
    answer: String,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: answer.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedLlm {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        Ok(LlmResponse {
            content: self.answer.clone(),
            model: request.model.clone(),
            usage: LlmUsage::new(100, 20),
        })
    }
}

/// Fails every call.
#[derive(Default)]
pub struct FailingLlm {
    pub calls: AtomicUsize,
}

#[async_trait::async_trait]
impl LlmClient for FailingLlm {
    fn provider_name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _request: &LlmRequest) -> AppResult<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AppError::Llm("connection refused".into()))
    }
}

pub struct FailingRelevance;

#[async_trait::async_trait]
impl RelevanceModel for FailingRelevance {
    fn name(&self) -> &str {
        "failing"
    }

    async fn score(&self, _query: &str, _passages: &[String]) -> AppResult<Vec<f32>> {
        Err(AppError::Other("model server unavailable".into()))
    }
}

/// In-memory store that counts writes.
pub struct CountingStore {
    inner: InMemoryVectorStore,
    pub upserted: AtomicUsize,
    pub deleted: AtomicUsize,
}

impl CountingStore {
    pub fn new(dimensions: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryVectorStore::new(dimensions),
            upserted: AtomicUsize::new(0),
            deleted: AtomicUsize::new(0),
        })
    }

    /// Records upserted plus ids deleted so far.
    pub fn writes(&self) -> usize {
        self.upserted.load(Ordering::SeqCst) + self.deleted.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl VectorStore for CountingStore {
    fn backend_name(&self) -> &str {
        "counting"
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<(), StoreError> {
        self.upserted.fetch_add(records.len(), Ordering::SeqCst);
        self.inner.upsert(namespace, records).await
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<StoreHit>, StoreError> {
        self.inner.query(namespace, vector, k, filter).await
    }

    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<usize, StoreError> {
        self.deleted.fetch_add(ids.len(), Ordering::SeqCst);
        self.inner.delete(namespace, ids).await
    }

    async fn count(&self, namespace: &str) -> Result<usize, StoreError> {
        self.inner.count(namespace).await
    }
}

/// Local git source that can be switched into failing.
#[derive(Default)]
pub struct FlakySource {
    inner: GitSource,
    pub failing: AtomicBool,
}

#[async_trait::async_trait]
impl SourceProvider for FlakySource {
    async fn fetch(&self, identifier: &str, checkout_dir: &Path) -> KnowledgeResult<Checkout> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(KnowledgeError::Clone {
                repository: identifier.to_string(),
                reason: "remote hung up unexpectedly".into(),
            });
        }
        self.inner.fetch(identifier, checkout_dir).await
    }
}

/// Trigram embeddings, except that batches containing `marker` fail while
/// `failing` is set.
#[derive(Debug)]
pub struct PickyEmbedder {
    inner: TrigramProvider,
    marker: String,
    pub failing: AtomicBool,
    pub rejected: AtomicUsize,
}

impl PickyEmbedder {
    pub fn new(marker: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: TrigramProvider::new(384),
            marker: marker.to_string(),
            failing: AtomicBool::new(true),
            rejected: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for PickyEmbedder {
    fn provider_name(&self) -> &str {
        "picky"
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if self.failing.load(Ordering::SeqCst) && texts.iter().any(|t| t.contains(&self.marker)) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(AppError::Other("embedding server returned 503".into()));
        }
        self.inner.embed_batch(texts).await
    }
}

/// Local git source that holds each fetch open for a moment and tracks how
/// many fetches overlap.
#[derive(Default)]
pub struct SlowSource {
    inner: GitSource,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

#[async_trait::async_trait]
impl SourceProvider for SlowSource {
    async fn fetch(&self, identifier: &str, checkout_dir: &Path) -> KnowledgeResult<Checkout> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let result = self.inner.fetch(identifier, checkout_dir).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
