//! Ingestion orchestration.
//!
//! Changed files flow through a bounded pipeline: a dispatcher hands files to
//! semaphore-limited chunk workers on the blocking pool, workers push chunks
//! into an mpsc channel, and the ingest future embeds them in batches and
//! commits each file to the store once all its chunks have vectors.

use super::discovery::{content_hash, decode_text, discover, DiscoveredFile};
use super::manifest::{FileEntry, Manifest};
use super::source::{canonical_identifier, local_source, namespace_for, Checkout, SourceProvider};
use super::state::IngestionState;
use crate::chunk::{Chunk, Chunker};
use crate::config::IngestConfig;
use crate::embeddings::EmbeddingGenerator;
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::progress::ProgressReporter;
use crate::store::{ChunkMetadata, VectorRecord, VectorStore};
use crate::types::{IngestReport, Repository};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

/// Per-call ingestion switches.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Discard an existing clone and fetch from scratch
    pub force_clone: bool,
}

enum ChunkMessage {
    Chunk(Chunk),
    FileDone(FileDone),
    FileFailed { path: String, reason: String },
}

struct FileDone {
    path: String,
    /// Hash of the bytes that were actually chunked
    content_hash: String,
    chunk_count: usize,
    fallback: Option<String>,
}

#[derive(Default)]
struct FileBuffer {
    queued: usize,
    records: Vec<VectorRecord>,
    done: Option<FileDone>,
}

pub struct Ingestor {
    manifest: Arc<Manifest>,
    store: Arc<dyn VectorStore>,
    embedder: EmbeddingGenerator,
    chunker: Arc<Chunker>,
    source: Arc<dyn SourceProvider>,
    config: IngestConfig,
    repos_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("store", &self.store.backend_name())
            .field("repos_dir", &self.repos_dir)
            .finish_non_exhaustive()
    }
}

impl Ingestor {
    pub fn new(
        manifest: Arc<Manifest>,
        store: Arc<dyn VectorStore>,
        embedder: EmbeddingGenerator,
        chunker: Chunker,
        source: Arc<dyn SourceProvider>,
        config: IngestConfig,
        repos_dir: PathBuf,
    ) -> Self {
        Self {
            manifest,
            store,
            embedder,
            chunker: Arc::new(chunker),
            source,
            config,
            repos_dir,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn repo_lock(&self, identifier: &str) -> KnowledgeResult<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self.locks.lock().map_err(|e| {
            KnowledgeError::manifest(identifier, format!("lock table poisoned: {}", e))
        })?;
        Ok(locks
            .entry(identifier.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }

    /// Ingest or incrementally refresh one repository.
    ///
    /// Attempts for the same repository are serialized; distinct
    /// repositories run independently.
    pub async fn ingest(
        &self,
        identifier: &str,
        options: &IngestOptions,
        progress: &ProgressReporter,
    ) -> KnowledgeResult<IngestReport> {
        let identifier = canonical_identifier(identifier);
        let namespace = namespace_for(&identifier)?;

        let lock = self.repo_lock(&identifier)?;
        let _guard = lock.lock().await;

        let mut repo = match self.manifest.load_repository(&identifier)? {
            Some(repo) => repo,
            None => Repository::new(
                identifier.clone(),
                namespace.clone(),
                self.repos_dir.join(&namespace),
            ),
        };

        let interrupted = repo.state.is_in_progress();
        if interrupted {
            tracing::warn!(
                "{} was left in state '{}' by an earlier run",
                identifier,
                repo.state
            );
            self.transition(&mut repo, IngestionState::failed("interrupted"))?;
        }

        let started = Instant::now();
        match self.attempt(&mut repo, options, progress).await {
            Ok(mut report) => {
                report.duration_secs = started.elapsed().as_secs_f64();
                report.recovered_interrupted = interrupted;
                tracing::info!(
                    "Ingested {}: {} indexed, {} unchanged, {} removed, {} chunks written in {:.2}s",
                    identifier,
                    report.files_indexed,
                    report.files_unchanged,
                    report.files_removed,
                    report.chunks_written,
                    report.duration_secs
                );
                Ok(report)
            }
            Err(err) => {
                tracing::error!("Ingestion of {} failed ({}): {}", identifier, err.kind(), err);
                if let Err(save_err) =
                    self.transition(&mut repo, IngestionState::failed(err.to_string()))
                {
                    tracing::error!("Could not record failure for {}: {}", identifier, save_err);
                }
                Err(err)
            }
        }
    }

    async fn attempt(
        &self,
        repo: &mut Repository,
        options: &IngestOptions,
        progress: &ProgressReporter,
    ) -> KnowledgeResult<IngestReport> {
        // An indexed repository stays queryable (and Indexed) while it is refreshed.
        let refreshing = repo.state == IngestionState::Indexed;
        if !refreshing {
            self.transition(repo, IngestionState::Cloning)?;
        }

        progress.clone_started(&repo.identifier);
        let checkout = self.fetch(repo, options).await?;
        repo.checkout_path = checkout.root.clone();

        if !refreshing {
            self.transition(repo, IngestionState::Discovering)?;
        }
        let root = checkout.root.clone();
        let max_file_bytes = self.config.max_file_bytes;
        let discovery = tokio::task::spawn_blocking(move || discover(&root, max_file_bytes))
            .await
            .map_err(|e| KnowledgeError::InvalidInput(format!("discovery task failed: {}", e)))?;
        progress.discover(
            discovery.files.len() as u64,
            &checkout.root.to_string_lossy(),
        );

        let previous = self.manifest.file_entries(&repo.namespace)?;
        let changed: Vec<DiscoveredFile> = discovery
            .files
            .iter()
            .filter(|file| match previous.get(&file.path) {
                Some(entry) => entry.pending || entry.content_hash != file.content_hash,
                None => true,
            })
            .cloned()
            .collect();
        let present: HashSet<&str> = discovery.files.iter().map(|f| f.path.as_str()).collect();
        let removed: Vec<(&String, &FileEntry)> = previous
            .iter()
            .filter(|(path, _)| !present.contains(path.as_str()))
            .collect();

        let mut report = IngestReport::new(repo);
        report.files_scanned = discovery.files.len();
        report.files_skipped = discovery.skipped;
        report.files_unchanged = discovery.files.len() - changed.len();

        tracing::info!(
            "{}: {} files scanned, {} changed, {} removed",
            repo.identifier,
            discovery.files.len(),
            changed.len(),
            removed.len()
        );

        if refreshing && changed.is_empty() && removed.is_empty() {
            repo.last_commit = checkout.commit.clone();
            self.manifest.save_repository(repo)?;
            report.commit = checkout.commit;
            report.state = repo.state.clone();
            return Ok(report);
        }

        self.transition(repo, IngestionState::ChunkingAndEmbedding)?;

        for (path, entry) in removed {
            let deleted = self
                .store
                .delete(&repo.namespace, &entry.chunk_ids)
                .await
                .map_err(|e| KnowledgeError::store_at(&repo.identifier, path, e))?;
            self.manifest.remove_file(&repo.namespace, path)?;
            tracing::debug!("Removed {} ({} chunks)", path, deleted);
            report.files_removed += 1;
            report.chunks_deleted += deleted;
        }

        self.index_files(repo, changed, &previous, progress, &mut report)
            .await?;

        self.transition(repo, IngestionState::Indexed)?;
        repo.has_snapshot = true;
        repo.last_commit = checkout.commit.clone();
        repo.indexed_at = Some(Utc::now());
        self.manifest.save_repository(repo)?;

        report.commit = checkout.commit;
        report.state = repo.state.clone();
        Ok(report)
    }

    async fn fetch(
        &self,
        repo: &Repository,
        options: &IngestOptions,
    ) -> KnowledgeResult<Checkout> {
        let checkout_dir = self.repos_dir.join(&repo.namespace);
        if options.force_clone && local_source(&repo.identifier).is_none() && checkout_dir.exists()
        {
            tracing::info!("Discarding existing clone at {}", checkout_dir.display());
            tokio::fs::remove_dir_all(&checkout_dir)
                .await
                .map_err(|e| KnowledgeError::Clone {
                    repository: repo.identifier.clone(),
                    reason: format!("Failed to remove existing clone: {}", e),
                })?;
        }
        self.source.fetch(&repo.identifier, &checkout_dir).await
    }

    async fn index_files(
        &self,
        repo: &Repository,
        files: Vec<DiscoveredFile>,
        previous: &HashMap<String, FileEntry>,
        progress: &ProgressReporter,
        report: &mut IngestReport,
    ) -> KnowledgeResult<()> {
        let total_files = files.len();
        if total_files == 0 {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::channel::<ChunkMessage>(self.config.queue_capacity.max(1));

        // Dropping `tasks` (early return or a dropped future) aborts the dispatcher.
        let mut tasks = JoinSet::new();
        tasks.spawn(dispatch(
            files,
            Arc::clone(&self.chunker),
            Arc::new(Semaphore::new(self.config.effective_workers())),
            tx,
        ));

        let mut writer = BatchWriter {
            ingestor: self,
            repo,
            previous,
            progress,
            report,
            buffers: HashMap::new(),
            batch: Vec::with_capacity(self.embedder.batch_size()),
            files_done: 0,
            chunks_created: 0,
            chunks_embedded: 0,
            total_files,
        };

        while let Some(message) = rx.recv().await {
            writer.handle(message).await?;
        }
        writer.flush().await?;
        writer.finish();

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("Chunk dispatcher ended abnormally: {}", e);
            }
        }
        Ok(())
    }

    fn transition(&self, repo: &mut Repository, next: IngestionState) -> KnowledgeResult<()> {
        if !repo.state.can_transition_to(&next) {
            return Err(KnowledgeError::manifest(
                &repo.identifier,
                format!("illegal state transition {} -> {}", repo.state, next),
            ));
        }
        tracing::debug!("{}: {} -> {}", repo.identifier, repo.state, next);
        repo.state = next;
        self.manifest.save_repository(repo)
    }
}

/// Feed files to chunk workers, at most one per semaphore permit.
async fn dispatch(
    files: Vec<DiscoveredFile>,
    chunker: Arc<Chunker>,
    semaphore: Arc<Semaphore>,
    tx: mpsc::Sender<ChunkMessage>,
) {
    let mut workers = JoinSet::new();
    for file in files {
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let chunker = Arc::clone(&chunker);
        let tx = tx.clone();
        workers.spawn_blocking(move || {
            let _permit = permit;
            chunk_file(&chunker, file, &tx);
        });
    }
    drop(tx);

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::warn!("Chunk worker panicked: {}", e);
        }
    }
}

/// Read and chunk one file, streaming chunks into the channel.
fn chunk_file(chunker: &Chunker, file: DiscoveredFile, tx: &mpsc::Sender<ChunkMessage>) {
    let failed = |reason: String| ChunkMessage::FileFailed {
        path: file.path.clone(),
        reason,
    };

    let bytes = match std::fs::read(&file.absolute) {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = tx.blocking_send(failed(e.to_string()));
            return;
        }
    };
    let hash = content_hash(&bytes);
    let Some(text) = decode_text(bytes) else {
        let _ = tx.blocking_send(failed("not valid UTF-8 text".to_string()));
        return;
    };

    let mut chunks = chunker.chunk(file.path.clone(), text, file.language);
    let mut count = 0;
    for chunk in chunks.by_ref() {
        if tx.blocking_send(ChunkMessage::Chunk(chunk)).is_err() {
            // Receiver gone: the ingestion was aborted.
            return;
        }
        count += 1;
    }

    let _ = tx.blocking_send(ChunkMessage::FileDone(FileDone {
        path: file.path.clone(),
        content_hash: hash,
        chunk_count: count,
        fallback: chunks.parse_fallback().map(|e| e.to_string()),
    }));
}

fn to_record(chunk: Chunk, vector: Vec<f32>) -> VectorRecord {
    let metadata = ChunkMetadata {
        path: chunk.path,
        start_line: chunk.line_range.0,
        end_line: chunk.line_range.1,
        start_byte: chunk.byte_range.start,
        end_byte: chunk.byte_range.end,
        language: chunk.language.as_str().to_string(),
        symbol: chunk.symbol,
        content_hash: format!("{:x}", Sha256::digest(chunk.text.as_bytes())),
    };
    VectorRecord {
        id: chunk.id,
        vector,
        metadata,
        text: chunk.text,
    }
}

/// Consumer side of the pipeline.
struct BatchWriter<'a> {
    ingestor: &'a Ingestor,
    repo: &'a Repository,
    previous: &'a HashMap<String, FileEntry>,
    progress: &'a ProgressReporter,
    report: &'a mut IngestReport,
    buffers: HashMap<String, FileBuffer>,
    batch: Vec<Chunk>,
    files_done: usize,
    chunks_created: usize,
    chunks_embedded: usize,
    total_files: usize,
}

impl BatchWriter<'_> {
    async fn handle(&mut self, message: ChunkMessage) -> KnowledgeResult<()> {
        match message {
            ChunkMessage::Chunk(chunk) => {
                self.chunks_created += 1;
                self.buffers.entry(chunk.path.clone()).or_default().queued += 1;
                self.batch.push(chunk);
                if self.batch.len() >= self.ingestor.embedder.batch_size() {
                    self.flush().await?;
                }
            }
            ChunkMessage::FileDone(done) => {
                self.files_done += 1;
                self.progress.chunk(
                    self.files_done as u64,
                    Some(self.total_files as u64),
                    self.chunks_created as u64,
                );
                let path = done.path.clone();
                self.buffers.entry(path).or_default().done = Some(done);
                self.commit_ready().await?;
            }
            ChunkMessage::FileFailed { path, reason } => {
                tracing::warn!("Skipping {}: {}", path, reason);
                self.files_done += 1;
                self.buffers.remove(&path);
                self.report.files_skipped += 1;
            }
        }
        Ok(())
    }

    /// Embed whatever is batched and commit the files that became complete.
    async fn flush(&mut self) -> KnowledgeResult<()> {
        if !self.batch.is_empty() {
            let chunks = std::mem::take(&mut self.batch);
            let texts: Vec<String> = chunks.iter().map(Chunk::embedding_text).collect();
            let vectors = self.ingestor.embedder.embed(&texts).await.map_err(|e| {
                KnowledgeError::Embedding {
                    repository: self.repo.identifier.clone(),
                    path: chunks.first().map(|c| c.path.clone()),
                    reason: e.to_string(),
                }
            })?;

            self.chunks_embedded += chunks.len();
            self.progress.embed(
                self.chunks_embedded as u64,
                self.ingestor.embedder.model_name(),
            );

            for (chunk, vector) in chunks.into_iter().zip(vectors) {
                self.buffers
                    .entry(chunk.path.clone())
                    .or_default()
                    .records
                    .push(to_record(chunk, vector));
            }
        }
        self.commit_ready().await
    }

    async fn commit_ready(&mut self) -> KnowledgeResult<()> {
        let ready: Vec<String> = self
            .buffers
            .iter()
            .filter(|(_, b)| b.done.is_some() && b.records.len() == b.queued)
            .map(|(path, _)| path.clone())
            .collect();

        for path in ready {
            if let Some(buffer) = self.buffers.remove(&path) {
                self.commit_file(buffer).await?;
            }
        }
        Ok(())
    }

    /// Replace one file's chunks. The manifest entry stays pending (holding
    /// old and new ids) until the store reflects the new content.
    async fn commit_file(&mut self, buffer: FileBuffer) -> KnowledgeResult<()> {
        let Some(done) = buffer.done else {
            return Ok(());
        };
        let namespace = &self.repo.namespace;
        let manifest = &self.ingestor.manifest;
        let store = &self.ingestor.store;
        let store_error = |e| KnowledgeError::store_at(&self.repo.identifier, &done.path, e);

        let new_ids: Vec<String> = buffer.records.iter().map(|r| r.id.clone()).collect();
        manifest.begin_file(namespace, &done.path, &done.content_hash, &new_ids)?;

        let keep: HashSet<&str> = new_ids.iter().map(String::as_str).collect();
        let stale: Vec<String> = self
            .previous
            .get(&done.path)
            .map(|entry| {
                entry
                    .chunk_ids
                    .iter()
                    .filter(|id| !keep.contains(id.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let deleted = store
            .delete(namespace, &stale)
            .await
            .map_err(store_error)?;
        let written = buffer.records.len();
        store
            .upsert(namespace, buffer.records)
            .await
            .map_err(store_error)?;
        manifest.commit_file(namespace, &done.path, &done.content_hash, &new_ids)?;

        if let Some(reason) = &done.fallback {
            tracing::warn!("{} was windowed after a parse failure: {}", done.path, reason);
            self.report.parse_fallbacks += 1;
        }
        self.report.files_indexed += 1;
        self.report.chunks_written += written;
        self.report.chunks_deleted += deleted;
        self.progress.index(
            self.report.files_indexed as u64,
            Some(self.total_files as u64),
            store.backend_name(),
        );
        tracing::debug!(
            "Indexed {} ({} chunks, {} stale removed)",
            done.path,
            written,
            deleted
        );
        Ok(())
    }

    fn finish(&mut self) {
        for path in self.buffers.keys() {
            tracing::warn!("{} was not fully chunked and stays pending", path);
            self.report.files_skipped += 1;
        }
        self.buffers.clear();
    }
}
