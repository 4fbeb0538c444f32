//! Code-aware question answering over git repositories.
//!
//! Repositories are chunked along syntax boundaries, embedded into a vector
//! store under a per-repository namespace and queried through a
//! retrieve, rerank and synthesize pipeline. [`RepoMind`] ties the pieces
//! together.

pub mod chunk;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod progress;
pub mod rag;
pub mod retrieval;
pub mod store;
mod tokens;
pub mod types;

#[cfg(test)]
mod tests;

pub use config::KnowledgeConfig;
pub use error::{KnowledgeError, KnowledgeResult};
pub use ingest::{IngestOptions, IngestionState};
pub use progress::{ProgressCallback, ProgressEvent, ProgressReporter};
pub use rag::{Answer, AnswerStatus, Degradations};
pub use store::SearchFilter;
pub use types::{IngestReport, RankedResult, Repository, RetrievalResult, StoredChunk};

use chunk::Chunker;
use embeddings::{EmbeddingGenerator, EmbeddingProvider};
use ingest::{canonical_identifier, namespace_for, GitSource, Ingestor, Manifest, SourceProvider};
use rag::Synthesizer;
use repomind_core::AppConfig;
use repomind_llm::LlmClient;
use retrieval::{RelevanceModel, Reranker, Retriever};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use store::{InMemoryVectorStore, SqliteVectorStore, VectorStore};

/// Ingestion and query entry point for any number of repositories.
pub struct RepoMind {
    manifest: Arc<Manifest>,
    store: Arc<dyn VectorStore>,
    ingestor: Ingestor,
    retriever: Retriever,
    reranker: Reranker,
    synthesizer: Synthesizer,
}

impl std::fmt::Debug for RepoMind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoMind")
            .field("store", &self.store.backend_name())
            .field("model", &self.synthesizer.model())
            .finish_non_exhaustive()
    }
}

impl RepoMind {
    pub fn builder(config: KnowledgeConfig) -> RepoMindBuilder {
        RepoMindBuilder::new(config)
    }

    /// Open the state kept under `<workspace>/.repomind/`, using the
    /// language model selected by `app`.
    pub async fn from_workspace(workspace: &Path, app: &AppConfig) -> KnowledgeResult<Self> {
        let config = config::load_config(workspace).map_err(config_error)?;
        let index_path = config::get_index_path(workspace);

        let provider = embeddings::create_provider(&config.embedding).map_err(config_error)?;
        let dimensions = provider.dimensions();
        let store = open_store(workspace, &config.store.backend, dimensions).await?;
        let manifest = Manifest::open(&index_path)?;

        let api_key = app.resolve_api_key(&app.provider);
        let llm = repomind_llm::create_client(
            &app.provider,
            app.endpoint.as_deref(),
            api_key.as_deref(),
        )
        .map_err(config_error)?;

        tracing::info!(
            "Opened workspace {:?} (store: {}, embeddings: {}, llm: {}/{})",
            workspace,
            store.backend_name(),
            provider.model_name(),
            app.provider,
            app.model
        );

        Self::builder(config)
            .manifest(Arc::new(manifest))
            .store(store)
            .embedding_provider(provider)
            .llm(llm, app.model.clone())
            .repos_dir(config::get_repos_dir(workspace))
            .build()
    }

    /// Ingest or refresh a repository with default options.
    pub async fn ingest(&self, identifier: &str) -> KnowledgeResult<IngestReport> {
        self.ingest_with(identifier, &IngestOptions::default(), &ProgressReporter::noop())
            .await
    }

    pub async fn ingest_with(
        &self,
        identifier: &str,
        options: &IngestOptions,
        progress: &ProgressReporter,
    ) -> KnowledgeResult<IngestReport> {
        self.ingestor.ingest(identifier, options, progress).await
    }

    /// Answer a question about an ingested repository.
    pub async fn query(&self, identifier: &str, question: &str) -> KnowledgeResult<Answer> {
        self.query_with(identifier, question, None).await
    }

    /// Like [`RepoMind::query`], restricted to chunks matching `filter`.
    pub async fn query_with(
        &self,
        identifier: &str,
        question: &str,
        filter: Option<&SearchFilter>,
    ) -> KnowledgeResult<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(KnowledgeError::InvalidInput("question is empty".into()));
        }

        let identifier = canonical_identifier(identifier);
        let namespace = self.namespace(&identifier)?;

        let indexed = self
            .store
            .count(&namespace)
            .await
            .map_err(|e| KnowledgeError::store(&identifier, e))?;
        if indexed == 0 {
            tracing::info!("Query against {} which has no indexed chunks", identifier);
            return Ok(Answer::not_indexed(&identifier, question));
        }

        let retrieval = self
            .retriever
            .retrieve(
                &identifier,
                &namespace,
                question,
                self.retriever.candidates(),
                filter,
            )
            .await?;
        let candidates = retrieval.results.len();

        let ranking = self.reranker.rerank(question, retrieval.results).await;
        if ranking.fallback {
            tracing::warn!(
                "Reranking fell back to similarity order for {}: {}",
                identifier,
                ranking.fallback_reason.as_deref().unwrap_or("unknown")
            );
        }

        let mut answer = self
            .synthesizer
            .synthesize(&identifier, question, ranking.results)
            .await?;
        answer.degradations.rerank_fallback = ranking.fallback;
        answer.degradations.rerank_error = ranking.fallback_reason;
        answer.degradations.floor_relaxed = retrieval.floor_relaxed;

        tracing::info!(
            "Answered query on {} from {} candidates, {} cited ({})",
            identifier,
            candidates,
            answer.citations.len(),
            answer.status.as_str()
        );
        Ok(answer)
    }

    /// Manifest record for a repository, if it was ever ingested.
    pub fn status(&self, identifier: &str) -> KnowledgeResult<Option<Repository>> {
        self.manifest
            .load_repository(&canonical_identifier(identifier))
    }

    /// Number of chunks stored for a repository.
    pub async fn chunk_count(&self, identifier: &str) -> KnowledgeResult<usize> {
        let identifier = canonical_identifier(identifier);
        let namespace = self.namespace(&identifier)?;
        self.store
            .count(&namespace)
            .await
            .map_err(|e| KnowledgeError::store(&identifier, e))
    }

    fn namespace(&self, identifier: &str) -> KnowledgeResult<String> {
        match self.manifest.load_repository(identifier)? {
            Some(repo) => Ok(repo.namespace),
            None => namespace_for(identifier),
        }
    }
}

fn config_error(err: repomind_core::AppError) -> KnowledgeError {
    match err {
        repomind_core::AppError::Config(message) => KnowledgeError::Config(message),
        other => KnowledgeError::Config(other.to_string()),
    }
}

async fn open_store(
    workspace: &Path,
    backend: &str,
    dimensions: usize,
) -> KnowledgeResult<Arc<dyn VectorStore>> {
    let opened: Arc<dyn VectorStore> = match backend {
        "sqlite" => {
            let path = config::get_index_path(workspace);
            Arc::new(
                SqliteVectorStore::open(&path, dimensions)
                    .map_err(|e| KnowledgeError::store_at("*", path.display().to_string(), e))?,
            )
        }
        "memory" => Arc::new(InMemoryVectorStore::new(dimensions)),
        #[cfg(feature = "lancedb")]
        "lancedb" => {
            let path = config::get_lancedb_path(workspace);
            Arc::new(
                store::LanceDbVectorStore::open(&path, dimensions)
                    .await
                    .map_err(|e| KnowledgeError::store_at("*", path.display().to_string(), e))?,
            )
        }
        #[cfg(not(feature = "lancedb"))]
        "lancedb" => {
            return Err(KnowledgeError::Config(
                "store.backend 'lancedb' requires building with the 'lancedb' feature".into(),
            ))
        }
        other => {
            return Err(KnowledgeError::Config(format!(
                "Unknown store backend '{}'. Supported: sqlite, memory, lancedb",
                other
            )))
        }
    };
    Ok(opened)
}

/// Assembles a [`RepoMind`] from explicit backends.
///
/// Only the language model is mandatory. Everything else defaults to the
/// local, in-process implementation selected by the configuration: an
/// in-memory manifest and store, the configured embedding provider and
/// relevance model, and `git` as the source.
pub struct RepoMindBuilder {
    config: KnowledgeConfig,
    manifest: Option<Arc<Manifest>>,
    store: Option<Arc<dyn VectorStore>>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    relevance: Option<Arc<dyn RelevanceModel>>,
    source: Option<Arc<dyn SourceProvider>>,
    llm: Option<(Arc<dyn LlmClient>, String)>,
    repos_dir: Option<PathBuf>,
}

impl RepoMindBuilder {
    pub fn new(config: KnowledgeConfig) -> Self {
        Self {
            config,
            manifest: None,
            store: None,
            embedding_provider: None,
            relevance: None,
            source: None,
            llm: None,
            repos_dir: None,
        }
    }

    pub fn manifest(mut self, manifest: Arc<Manifest>) -> Self {
        self.manifest = Some(manifest);
        self
    }

    pub fn store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    pub fn relevance_model(mut self, model: Arc<dyn RelevanceModel>) -> Self {
        self.relevance = Some(model);
        self
    }

    pub fn source(mut self, source: Arc<dyn SourceProvider>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn llm(mut self, client: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        self.llm = Some((client, model.into()));
        self
    }

    /// Directory remote repositories are cloned into.
    pub fn repos_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.repos_dir = Some(dir.into());
        self
    }

    /// Validate the configuration and wire the pipelines.
    ///
    /// Fails when the embedding dimension differs from the store's.
    pub fn build(self) -> KnowledgeResult<RepoMind> {
        let config = self.config;
        config.validate().map_err(config_error)?;

        let (llm, model) = self.llm.ok_or_else(|| {
            KnowledgeError::Config("a language model client is required".into())
        })?;

        let provider = match self.embedding_provider {
            Some(provider) => provider,
            None => embeddings::create_provider(&config.embedding).map_err(config_error)?,
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryVectorStore::new(provider.dimensions())));

        if provider.dimensions() != store.dimensions() {
            return Err(KnowledgeError::Config(format!(
                "embedding model '{}' produces {}-dimensional vectors but the {} store holds {}",
                provider.model_name(),
                provider.dimensions(),
                store.backend_name(),
                store.dimensions()
            )));
        }

        let manifest = match self.manifest {
            Some(manifest) => manifest,
            None => Arc::new(Manifest::open_in_memory()?),
        };
        let relevance = match self.relevance {
            Some(model) => model,
            None => retrieval::create_relevance_model(&config.rerank)?,
        };
        let source = self
            .source
            .unwrap_or_else(|| Arc::new(GitSource::new()));
        let repos_dir = self
            .repos_dir
            .unwrap_or_else(|| std::env::temp_dir().join("repomind").join("repos"));

        let embedder = EmbeddingGenerator::new(provider, &config.embedding);

        let ingestor = Ingestor::new(
            manifest.clone(),
            store.clone(),
            embedder.clone(),
            Chunker::new(config.chunking.clone()),
            source,
            config.ingest.clone(),
            repos_dir,
        );
        let retriever = Retriever::new(store.clone(), embedder, config.retrieval.clone());
        let reranker = Reranker::new(relevance, &config.rerank);
        let synthesizer = Synthesizer::new(llm, model, &config.synthesis)?;

        Ok(RepoMind {
            manifest,
            store,
            ingestor,
            retriever,
            reranker,
            synthesizer,
        })
    }
}
