//! Second-stage relevance scoring over the retrieved candidates.

use crate::config::RerankConfig;
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::tokens::{compound_words, identifier_tokens};
use crate::types::{RankedResult, RetrievalResult};
use async_trait::async_trait;
use repomind_core::{AppError, AppResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Scores (query, passage) pairs jointly. Higher is more relevant; only the
/// order of the scores is relied on.
#[async_trait]
pub trait RelevanceModel: Send + Sync {
    fn name(&self) -> &str;

    async fn score(&self, query: &str, passages: &[String]) -> AppResult<Vec<f32>>;
}

/// Build the relevance model named in the configuration.
pub fn create_relevance_model(config: &RerankConfig) -> KnowledgeResult<Arc<dyn RelevanceModel>> {
    match config.model.as_str() {
        "lexical" => Ok(Arc::new(LexicalRelevance::default())),
        "http" => {
            let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                KnowledgeError::Config("rerank.endpoint is required for the http model".into())
            })?;
            Ok(Arc::new(HttpCrossEncoder::new(endpoint, config.timeout_secs)?))
        }
        other => Err(KnowledgeError::Config(format!(
            "Unknown rerank model: {}",
            other
        ))),
    }
}

/// BM25 over the candidate set.
///
/// Terms are identifier-aware tokens, so `validateToken` matches a question
/// about "token validation". A document term sharing a long prefix with a
/// query term (`authenticate` / `authentication`) counts as half an
/// occurrence. Scores are squashed into `[0, 1)`.
#[derive(Debug, Clone)]
pub struct LexicalRelevance {
    k1: f32,
    b: f32,
}

impl Default for LexicalRelevance {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

const PARTIAL_WEIGHT: f32 = 0.5;

fn partial_match(a: &str, b: &str) -> bool {
    let common = a
        .chars()
        .zip(b.chars())
        .take_while(|(x, y)| x == y)
        .count();
    let shorter = a.chars().count().min(b.chars().count());
    common >= 4 && (common as f32) >= 0.7 * shorter as f32
}

impl LexicalRelevance {
    fn term_frequency(term: &str, doc: &HashMap<String, usize>) -> f32 {
        doc.iter()
            .map(|(token, count)| {
                if token == term {
                    *count as f32
                } else if partial_match(token, term) {
                    *count as f32 * PARTIAL_WEIGHT
                } else {
                    0.0
                }
            })
            .sum()
    }

    fn score_all(&self, query: &str, passages: &[String]) -> Vec<f32> {
        let mut seen = HashSet::new();
        let terms: Vec<String> = identifier_tokens(query)
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();

        let docs: Vec<(HashMap<String, usize>, usize)> = passages
            .iter()
            .map(|p| {
                let tokens: Vec<String> = identifier_tokens(p)
                    .into_iter()
                    .chain(compound_words(p))
                    .collect();
                let len = tokens.len();
                let mut counts = HashMap::new();
                for token in tokens {
                    *counts.entry(token).or_insert(0) += 1;
                }
                (counts, len)
            })
            .collect();

        if terms.is_empty() || docs.is_empty() {
            return vec![0.0; passages.len()];
        }

        let n = docs.len() as f32;
        let avgdl = (docs.iter().map(|(_, len)| *len).sum::<usize>() as f32 / n).max(1.0);

        let idf: Vec<f32> = terms
            .iter()
            .map(|term| {
                let df = docs
                    .iter()
                    .filter(|(doc, _)| Self::term_frequency(term, doc) > 0.0)
                    .count() as f32;
                (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
            })
            .collect();

        docs.iter()
            .map(|(doc, len)| {
                let norm = self.k1 * (1.0 - self.b + self.b * *len as f32 / avgdl);
                let raw: f32 = terms
                    .iter()
                    .zip(&idf)
                    .map(|(term, idf)| {
                        let tf = Self::term_frequency(term, doc);
                        idf * tf * (self.k1 + 1.0) / (tf + norm)
                    })
                    .sum();
                raw / (raw + 1.0)
            })
            .collect()
    }
}

#[async_trait]
impl RelevanceModel for LexicalRelevance {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn score(&self, query: &str, passages: &[String]) -> AppResult<Vec<f32>> {
        Ok(self.score_all(query, passages))
    }
}

/// Cross-encoder served by a text-embeddings-inference style `/rerank` API.
#[derive(Debug, Clone)]
pub struct HttpCrossEncoder {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [String],
    raw_scores: bool,
}

#[derive(Debug, Deserialize)]
struct RerankHit {
    index: usize,
    score: f32,
}

impl HttpCrossEncoder {
    pub fn new(endpoint: &str, timeout_secs: u64) -> KnowledgeResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|e| KnowledgeError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn scores_in_order(hits: Vec<RerankHit>, expected: usize) -> AppResult<Vec<f32>> {
        let mut scores = vec![None; expected];
        for hit in hits {
            let slot = scores.get_mut(hit.index).ok_or_else(|| {
                AppError::Other(format!("rerank index {} out of range", hit.index))
            })?;
            *slot = Some(hit.score);
        }
        scores
            .into_iter()
            .enumerate()
            .map(|(i, s)| s.ok_or_else(|| AppError::Other(format!("no score for passage {}", i))))
            .collect()
    }
}

#[async_trait]
impl RelevanceModel for HttpCrossEncoder {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self, query, passages), fields(passages = passages.len()))]
    async fn score(&self, query: &str, passages: &[String]) -> AppResult<Vec<f32>> {
        let url = format!("{}/rerank", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&RerankRequest {
                query,
                texts: passages,
                raw_scores: true,
            })
            .send()
            .await
            .map_err(|e| AppError::Other(format!("Failed to reach reranker: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Other(format!(
                "Reranker returned {}: {}",
                status, body
            )));
        }

        let hits: Vec<RerankHit> = response
            .json()
            .await
            .map_err(|e| AppError::Other(format!("Failed to parse rerank response: {}", e)))?;
        Self::scores_in_order(hits, passages.len())
    }
}

/// Reranked top-K.
#[derive(Debug, Clone, Default)]
pub struct Ranking {
    pub results: Vec<RankedResult>,
    /// Similarity ordering was used because the model failed
    pub fallback: bool,
    pub fallback_reason: Option<String>,
}

pub(crate) fn compare_ranked(a: &RankedResult, b: &RankedResult) -> Ordering {
    b.rerank_score
        .partial_cmp(&a.rerank_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.chunk.metadata.path.cmp(&b.chunk.metadata.path))
        .then_with(|| a.chunk.metadata.start_line.cmp(&b.chunk.metadata.start_line))
}

pub struct Reranker {
    model: Arc<dyn RelevanceModel>,
    top_k: usize,
    timeout: Duration,
}

impl Reranker {
    pub fn new(model: Arc<dyn RelevanceModel>, config: &RerankConfig) -> Self {
        Self {
            model,
            top_k: config.top_k,
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Score every candidate and keep the best `top_k`. Never fails: model
    /// errors degrade to similarity order with `fallback` set.
    pub async fn rerank(&self, query: &str, candidates: Vec<RetrievalResult>) -> Ranking {
        if candidates.is_empty() {
            return Ranking::default();
        }

        let passages: Vec<String> = candidates.iter().map(passage_text).collect();
        let outcome = tokio::time::timeout(self.timeout, self.model.score(query, &passages)).await;

        let reason = match outcome {
            Err(_) => format!("timed out after {:?}", self.timeout),
            Ok(Err(e)) => e.to_string(),
            Ok(Ok(scores)) if scores.len() != candidates.len() => format!(
                "expected {} scores, got {}",
                candidates.len(),
                scores.len()
            ),
            Ok(Ok(scores)) if scores.iter().any(|s| !s.is_finite()) => {
                "non-finite score".to_string()
            }
            Ok(Ok(scores)) => {
                let results = candidates
                    .into_iter()
                    .zip(scores)
                    .map(|(c, score)| RankedResult {
                        chunk: c.chunk,
                        similarity: c.similarity,
                        rerank_score: score,
                    })
                    .collect();
                return Ranking {
                    results: self.top(results),
                    fallback: false,
                    fallback_reason: None,
                };
            }
        };

        tracing::warn!(
            "Reranker '{}' failed, falling back to similarity order: {}",
            self.model.name(),
            reason
        );
        let results = candidates
            .into_iter()
            .map(|c| RankedResult {
                rerank_score: c.similarity,
                similarity: c.similarity,
                chunk: c.chunk,
            })
            .collect();
        Ranking {
            results: self.top(results),
            fallback: true,
            fallback_reason: Some(reason),
        }
    }

    fn top(&self, mut results: Vec<RankedResult>) -> Vec<RankedResult> {
        results.sort_by(compare_ranked);
        results.truncate(self.top_k);
        results
    }
}

/// What the relevance model sees for one candidate.
fn passage_text(candidate: &RetrievalResult) -> String {
    let meta = &candidate.chunk.metadata;
    match &meta.symbol {
        Some(symbol) => format!("{} {}\n{}", meta.path, symbol, candidate.chunk.text),
        None => format!("{}\n{}", meta.path, candidate.chunk.text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ChunkMetadata;
    use crate::types::StoredChunk;

    fn candidate(path: &str, line: usize, text: &str, similarity: f32) -> RetrievalResult {
        RetrievalResult {
            chunk: StoredChunk {
                id: format!("{}:{}", path, line),
                text: text.to_string(),
                metadata: ChunkMetadata {
                    path: path.to_string(),
                    start_line: line,
                    end_line: line + 5,
                    start_byte: 0,
                    end_byte: text.len(),
                    language: "javascript".to_string(),
                    symbol: None,
                    content_hash: String::new(),
                },
            },
            similarity,
        }
    }

    struct FixedScores(Vec<f32>);

    #[async_trait]
    impl RelevanceModel for FixedScores {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn score(&self, _query: &str, _passages: &[String]) -> AppResult<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    #[async_trait]
    impl RelevanceModel for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        async fn score(&self, _query: &str, _passages: &[String]) -> AppResult<Vec<f32>> {
            Err(AppError::Other("model unavailable".to_string()))
        }
    }

    struct Slow;

    #[async_trait]
    impl RelevanceModel for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        async fn score(&self, _query: &str, passages: &[String]) -> AppResult<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![1.0; passages.len()])
        }
    }

    fn config(top_k: usize) -> RerankConfig {
        RerankConfig {
            top_k,
            timeout_secs: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_partial_match() {
        assert!(partial_match("authentication", "authenticate"));
        assert!(partial_match("implemented", "implement"));
        assert!(!partial_match("handler", "handshake"));
        assert!(!partial_match("login", "logout"));
    }

    #[test]
    fn test_lexical_prefers_matching_passage() {
        let model = LexicalRelevance::default();
        let scores = model.score_all(
            "How is authentication implemented?",
            &[
                "def slugify(title):\n    return title.lower()".to_string(),
                "function login(user, password) {\n  // Authenticate the user against the hash"
                    .to_string(),
            ],
        );
        assert!(scores[1] > scores[0]);
        assert!(scores.iter().all(|s| (0.0..1.0).contains(s)));
    }

    #[test]
    fn test_lexical_without_query_terms() {
        let model = LexicalRelevance::default();
        assert_eq!(model.score_all("how is it", &["fn a() {}".to_string()]), vec![0.0]);
    }

    #[tokio::test]
    async fn test_top_k_dominates_excluded() {
        let candidates = vec![
            candidate("a.js", 1, "a", 0.9),
            candidate("b.js", 1, "b", 0.8),
            candidate("c.js", 1, "c", 0.7),
            candidate("d.js", 1, "d", 0.6),
        ];
        let model = Arc::new(FixedScores(vec![0.1, 0.7, 0.7, 0.9]));
        let ranking = Reranker::new(model, &config(3))
            .rerank("q", candidates)
            .await;

        assert!(!ranking.fallback);
        let order: Vec<&str> = ranking
            .results
            .iter()
            .map(|r| r.chunk.metadata.path.as_str())
            .collect();
        // Tie on 0.7 broken by similarity.
        assert_eq!(order, vec!["d.js", "b.js", "c.js"]);
        assert!(ranking.results.iter().all(|r| r.rerank_score >= 0.1));
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_similarity() {
        let candidates = vec![
            candidate("b.js", 1, "b", 0.5),
            candidate("a.js", 1, "a", 0.9),
        ];
        let ranking = Reranker::new(Arc::new(Broken), &config(5))
            .rerank("q", candidates)
            .await;

        assert!(ranking.fallback);
        assert!(ranking.fallback_reason.unwrap().contains("model unavailable"));
        assert_eq!(ranking.results[0].chunk.metadata.path, "a.js");
        assert_eq!(ranking.results[0].rerank_score, 0.9);
    }

    #[tokio::test]
    async fn test_wrong_score_count_falls_back() {
        let ranking = Reranker::new(Arc::new(FixedScores(vec![1.0])), &config(5))
            .rerank(
                "q",
                vec![candidate("a.js", 1, "a", 0.4), candidate("b.js", 1, "b", 0.3)],
            )
            .await;
        assert!(ranking.fallback);
        assert_eq!(ranking.results.len(), 2);
    }

    #[tokio::test]
    async fn test_timeout_falls_back() {
        let ranking = Reranker::new(Arc::new(Slow), &config(5))
            .rerank("q", vec![candidate("a.js", 1, "a", 0.4)])
            .await;
        assert!(ranking.fallback);
        assert!(ranking.fallback_reason.unwrap().contains("timed out"));
    }

    #[test]
    fn test_cross_encoder_scores_reordered_by_index() {
        let hits = vec![
            RerankHit { index: 1, score: 0.2 },
            RerankHit { index: 0, score: 0.9 },
        ];
        assert_eq!(HttpCrossEncoder::scores_in_order(hits, 2).unwrap(), vec![0.9, 0.2]);
        assert!(HttpCrossEncoder::scores_in_order(vec![], 1).is_err());
    }

    #[test]
    fn test_unknown_model_rejected() {
        let config = RerankConfig {
            model: "magic".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            create_relevance_model(&config),
            Err(KnowledgeError::Config(_))
        ));
        let http = RerankConfig {
            model: "http".to_string(),
            ..Default::default()
        };
        assert!(create_relevance_model(&http).is_err());
    }
}
