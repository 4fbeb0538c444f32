//! Query-path fallbacks, construction checks and on-disk workspaces.

use super::support::*;
use crate::config::{RerankConfig, RetrievalConfig};
use crate::embeddings::providers::TrigramProvider;
use crate::embeddings::{EmbeddingConfig, EmbeddingGenerator};
use crate::ingest::{canonical_identifier, namespace_for};
use crate::retrieval::{LexicalRelevance, Reranker, Retriever};
use crate::store::InMemoryVectorStore;
use crate::{AnswerStatus, KnowledgeError, RepoMind};
use repomind_core::AppConfig;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[tokio::test]
async fn test_rerank_failure_falls_back_to_similarity_order() {
    let repo = sample_repo();
    let mind = builder(ScriptedLlm::new("ok"))
        .relevance_model(Arc::new(FailingRelevance))
        .build()
        .unwrap();
    mind.ingest(&identifier(&repo)).await.unwrap();

    let answer = mind
        .query(&identifier(&repo), "How is authentication implemented?")
        .await
        .unwrap();

    assert!(answer.degradations.rerank_fallback);
    assert!(answer
        .degradations
        .rerank_error
        .as_deref()
        .unwrap()
        .contains("model server unavailable"));
    assert_eq!(answer.status, AnswerStatus::Generated);
    assert!(!answer.citations.is_empty());
    for pair in answer.citations.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
        assert_eq!(pair[0].rerank_score, pair[0].similarity);
    }
}

#[tokio::test]
async fn test_llm_failing_twice_still_cites_chunks() {
    let repo = sample_repo();
    let llm = Arc::new(FailingLlm::default());
    let mind = builder(llm.clone()).build().unwrap();
    mind.ingest(&identifier(&repo)).await.unwrap();

    let answer = mind
        .query(&identifier(&repo), "How is authentication implemented?")
        .await
        .unwrap();

    assert_eq!(answer.status, AnswerStatus::GenerationUnavailable);
    assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    assert!(!answer.citations.is_empty());
    assert!(answer.text.contains("auth.js"));
    assert!(answer
        .degradations
        .generation_error
        .as_deref()
        .unwrap()
        .contains("connection refused"));
}

#[tokio::test]
async fn test_tight_budget_drops_whole_chunks() {
    let repo = sample_repo();
    let mut config = test_config();
    config.synthesis.token_budget = 1;
    let llm = ScriptedLlm::new("unused");
    let mind = RepoMind::builder(config)
        .llm(llm.clone(), "test-model")
        .build()
        .unwrap();
    mind.ingest(&identifier(&repo)).await.unwrap();

    let answer = mind
        .query(&identifier(&repo), "How is authentication implemented?")
        .await
        .unwrap();

    assert!(answer.citations.is_empty());
    assert!(answer.degradations.dropped_for_budget > 0);
    assert_eq!(answer.status, AnswerStatus::ContextExceeded);
    assert!(answer.text.starts_with(crate::rag::CONTEXT_EXCEEDED));
    assert!(answer.text.contains("auth.js"));
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn test_long_line_data_file_does_not_crowd_out_login() {
    let repo = sample_repo();
    let entries: Vec<String> = (0..1500)
        .map(|i| format!("\"metric_{}\": {}", i, i * 7))
        .collect();
    let json = format!("{{{}}}", entries.join(", "));
    assert!(json.len() > 20_000);
    write(repo.path(), "metrics.json", &json);

    let llm = ScriptedLlm::new("See `login` in `auth.js`.");
    let mind = builder(llm.clone()).build().unwrap();
    mind.ingest(&identifier(&repo)).await.unwrap();

    let answer = mind
        .query(&identifier(&repo), "How is authentication implemented?")
        .await
        .unwrap();

    assert_eq!(answer.status, AnswerStatus::Generated);
    assert_eq!(llm.calls(), 1);
    assert!(answer
        .citations
        .iter()
        .any(|c| c.chunk.metadata.symbol.as_deref() == Some("login")));
    let max_chars = test_config().chunking.max_chunk_chars;
    for citation in &answer.citations {
        assert!(citation.chunk.text.chars().count() <= max_chars);
    }
}

#[tokio::test]
async fn test_top_k_outscores_every_excluded_candidate() {
    let repo = sample_repo();
    let store = Arc::new(InMemoryVectorStore::new(384));
    let mind = builder(ScriptedLlm::new("ok"))
        .store(store.clone())
        .build()
        .unwrap();
    mind.ingest(&identifier(&repo)).await.unwrap();

    let id = canonical_identifier(&identifier(&repo));
    let namespace = namespace_for(&id).unwrap();
    let embedder = EmbeddingGenerator::new(
        Arc::new(TrigramProvider::new(384)),
        &EmbeddingConfig::default(),
    );
    let retriever = Retriever::new(store, embedder, RetrievalConfig::default());
    let query = "How are titles turned into slugs?";
    let candidates = retriever
        .retrieve(&id, &namespace, query, 30, None)
        .await
        .unwrap()
        .results;
    assert!(candidates.len() > 2);

    let rerank_config = |top_k| RerankConfig {
        top_k,
        ..RerankConfig::default()
    };
    let model = Arc::new(LexicalRelevance::default());
    let all = Reranker::new(model.clone(), &rerank_config(candidates.len()))
        .rerank(query, candidates.clone())
        .await;
    let top = Reranker::new(model, &rerank_config(2))
        .rerank(query, candidates)
        .await;

    assert!(!top.fallback);
    assert_eq!(top.results.len(), 2);
    let kept: Vec<&str> = top.results.iter().map(|r| r.chunk.id.as_str()).collect();
    let worst_kept = top
        .results
        .iter()
        .map(|r| r.rerank_score)
        .fold(f32::INFINITY, f32::min);
    for excluded in all.results.iter().filter(|r| !kept.contains(&r.chunk.id.as_str())) {
        assert!(worst_kept >= excluded.rerank_score);
    }
    assert_eq!(top.results[0].chunk.metadata.symbol.as_deref(), Some("slugify"));
}

#[tokio::test]
async fn test_dimension_mismatch_rejected_at_construction() {
    let err = builder(ScriptedLlm::new("ok"))
        .store(Arc::new(InMemoryVectorStore::new(768)))
        .build()
        .unwrap_err();

    assert_eq!(err.kind(), "config");
    let message = err.to_string();
    assert!(message.contains("384"));
    assert!(message.contains("768"));
}

#[tokio::test]
async fn test_missing_llm_and_invalid_config_are_rejected() {
    let err = RepoMind::builder(test_config()).build().unwrap_err();
    assert!(matches!(err, KnowledgeError::Config(_)));

    let mut config = test_config();
    config.rerank.top_k = config.retrieval.candidates;
    let err = RepoMind::builder(config)
        .llm(ScriptedLlm::new("ok"), "m")
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("rerank.top_k"));
}

#[tokio::test]
async fn test_empty_question_is_invalid() {
    let repo = sample_repo();
    let mind = builder(ScriptedLlm::new("ok")).build().unwrap();

    let err = mind.query(&identifier(&repo), "   ").await.unwrap_err();
    assert!(matches!(err, KnowledgeError::InvalidInput(_)));
}

#[tokio::test]
async fn test_language_filter_restricts_citations() {
    let repo = sample_repo();
    let mind = builder(ScriptedLlm::new("ok")).build().unwrap();
    mind.ingest(&identifier(&repo)).await.unwrap();

    let filter = crate::SearchFilter::language("python");
    let answer = mind
        .query_with(&identifier(&repo), "How is authentication implemented?", Some(&filter))
        .await
        .unwrap();

    assert!(!answer.citations.is_empty());
    assert!(answer
        .citations
        .iter()
        .all(|c| c.chunk.metadata.path == "utils.py"));
}

#[tokio::test]
async fn test_workspace_index_survives_reopen() {
    let workspace = tempfile::TempDir::new().unwrap();
    let repo = sample_repo();
    let app = AppConfig {
        workspace: workspace.path().to_path_buf(),
        ..AppConfig::default()
    };

    let count = {
        let mind = RepoMind::from_workspace(workspace.path(), &app).await.unwrap();
        mind.ingest(&identifier(&repo)).await.unwrap();
        mind.chunk_count(&identifier(&repo)).await.unwrap()
    };
    assert!(count > 0);
    assert!(crate::config::get_config_path(workspace.path()).exists());
    assert!(crate::config::get_index_path(workspace.path()).exists());

    let reopened = RepoMind::from_workspace(workspace.path(), &app).await.unwrap();
    assert_eq!(reopened.chunk_count(&identifier(&repo)).await.unwrap(), count);
    let status = reopened.status(&identifier(&repo)).unwrap().unwrap();
    assert!(status.has_snapshot);
    assert!(status.indexed_at.is_some());

    let report = reopened.ingest(&identifier(&repo)).await.unwrap();
    assert!(report.is_noop());
}

#[cfg(not(feature = "lancedb"))]
#[tokio::test]
async fn test_lancedb_backend_requires_feature() {
    let workspace = tempfile::TempDir::new().unwrap();
    let mut config = crate::KnowledgeConfig::default();
    config.store.backend = "lancedb".to_string();
    crate::config::save_config(workspace.path(), &config).unwrap();

    let err = RepoMind::from_workspace(workspace.path(), &AppConfig::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("lancedb"));
}
