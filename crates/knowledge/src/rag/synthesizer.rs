//! Answer synthesis: budgeted context, one language-model call, one retry.

use super::prompt::{estimate_tokens, PromptTemplates, NOT_FOUND_SENTENCE};
use super::types::{Answer, AnswerStatus, Degradations, CONTEXT_EXCEEDED, GENERATION_UNAVAILABLE};
use crate::config::SynthesisConfig;
use crate::error::KnowledgeResult;
use crate::types::RankedResult;
use repomind_llm::{LlmClient, LlmRequest};
use std::sync::Arc;
use std::time::Duration;

const MAX_ATTEMPTS: usize = 2;

pub struct Synthesizer {
    llm: Arc<dyn LlmClient>,
    model: String,
    templates: PromptTemplates,
    token_budget: usize,
    timeout: Duration,
    backoff: Duration,
    temperature: f32,
    max_tokens: u32,
}

impl Synthesizer {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
        config: &SynthesisConfig,
    ) -> KnowledgeResult<Self> {
        Ok(Self {
            llm,
            model: model.into(),
            templates: PromptTemplates::new()?,
            token_budget: config.token_budget,
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            backoff: Duration::from_millis(config.retry_backoff_ms),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Answer `question` from `ranked`, which must already be in rank order.
    ///
    /// Only template rendering can fail. Model errors produce a
    /// `GenerationUnavailable` answer that still carries the citations.
    /// The system prompt and question are charged to the token budget
    /// before any source block.
    pub async fn synthesize(
        &self,
        repository: &str,
        question: &str,
        ranked: Vec<RankedResult>,
    ) -> KnowledgeResult<Answer> {
        let system = self.templates.system(repository)?;
        let reserved = self.prompt_overhead(&system, repository, question)?;
        let available = self.token_budget.saturating_sub(reserved);

        let mut blocks = Vec::with_capacity(ranked.len());
        for (i, result) in ranked.iter().enumerate() {
            blocks.push(self.templates.source_block(repository, i + 1, result)?);
        }

        let keep = fit_budget(&blocks, available);
        let dropped = ranked.len() - keep;
        if dropped > 0 {
            tracing::info!(
                "Dropped {} of {} ranked chunks to fit the {}-token context budget ({} reserved for instructions and question)",
                dropped,
                ranked.len(),
                self.token_budget,
                reserved
            );
        }
        blocks.truncate(keep);
        let mut citations = ranked;
        let overflow = citations.split_off(keep);

        let mut answer = Answer {
            repository: repository.to_string(),
            question: question.to_string(),
            text: String::new(),
            citations,
            status: AnswerStatus::Generated,
            degradations: Degradations {
                dropped_for_budget: dropped,
                ..Degradations::default()
            },
        };

        if answer.citations.is_empty() {
            if overflow.is_empty() {
                answer.text = NOT_FOUND_SENTENCE.to_string();
            } else {
                tracing::warn!(
                    "No ranked chunk for '{}' fits in {} tokens; skipping generation",
                    repository,
                    available
                );
                answer.status = AnswerStatus::ContextExceeded;
                answer.text = listed_locations(CONTEXT_EXCEEDED, &overflow);
            }
            return Ok(answer);
        }

        let request = LlmRequest::new(
            self.templates.question(repository, question, &blocks)?,
            self.model.clone(),
        )
        .with_system(system)
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens);

        match self.generate(&request).await {
            Ok(text) => answer.text = text,
            Err(reason) => {
                tracing::warn!(
                    "Answer generation unavailable for '{}': {}",
                    repository,
                    reason
                );
                answer.text = listed_locations(GENERATION_UNAVAILABLE, &answer.citations);
                answer.status = AnswerStatus::GenerationUnavailable;
                answer.degradations.generation_error = Some(reason);
            }
        }
        Ok(answer)
    }

    /// Estimated tokens taken by everything in the prompt except source blocks.
    fn prompt_overhead(
        &self,
        system: &str,
        repository: &str,
        question: &str,
    ) -> KnowledgeResult<usize> {
        let framing = self.templates.question(repository, question, &[])?;
        Ok(estimate_tokens(system) + estimate_tokens(&framing))
    }

    /// Returns the last failure reason once every attempt has failed.
    async fn generate(&self, request: &LlmRequest) -> Result<String, String> {
        let mut last_error = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                tracing::warn!(
                    "LLM call failed ({}), retrying in {:?}",
                    last_error,
                    self.backoff
                );
                tokio::time::sleep(self.backoff).await;
            }

            match tokio::time::timeout(self.timeout, self.llm.complete(request)).await {
                Ok(Ok(response)) if !response.content.trim().is_empty() => {
                    tracing::debug!(
                        "LLM answered with {} tokens ({} prompt)",
                        response.usage.completion_tokens,
                        response.usage.prompt_tokens
                    );
                    return Ok(response.content.trim().to_string());
                }
                Ok(Ok(_)) => last_error = "empty response".to_string(),
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = format!("timed out after {:?}", self.timeout),
            }
        }

        Err(last_error)
    }
}

/// Number of leading blocks that fit `budget`; lower ranks go first.
fn fit_budget(blocks: &[String], budget: usize) -> usize {
    let mut total: usize = blocks.iter().map(|b| estimate_tokens(b)).sum();
    let mut keep = blocks.len();
    while keep > 0 && total > budget {
        keep -= 1;
        total -= estimate_tokens(&blocks[keep]);
    }
    keep
}

fn listed_locations(marker: &str, results: &[RankedResult]) -> String {
    let mut text = String::from(marker);
    for citation in results {
        text.push_str("\n- ");
        text.push_str(&citation.chunk.location());
        if let Some(symbol) = &citation.chunk.metadata.symbol {
            text.push_str(&format!(" ({})", symbol));
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ChunkMetadata;
    use crate::types::StoredChunk;
    use repomind_core::{AppError, AppResult};
    use repomind_llm::{LlmResponse, LlmUsage};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays queued outcomes, recording every prompt it was sent.
    struct ScriptedLlm {
        outcomes: Mutex<VecDeque<AppResult<String>>>,
        prompts: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl ScriptedLlm {
        fn new(outcomes: Vec<AppResult<String>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                prompts: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            })
        }

        fn calls(&self) -> usize {
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
            tokio::time::sleep(self.delay).await;
            let next = self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AppError::Llm("script exhausted".into())));
            next.map(|content| LlmResponse {
                content,
                model: request.model.clone(),
                usage: LlmUsage::new(10, 5),
            })
        }
    }

    fn ranked(rank: usize, chars: usize) -> RankedResult {
        let path = format!("src/file{}.rs", rank);
        RankedResult {
            chunk: StoredChunk {
                id: format!("chunk-{}", rank),
                text: "x".repeat(chars),
                metadata: ChunkMetadata {
                    path,
                    start_line: 1,
                    end_line: 10,
                    start_byte: 0,
                    end_byte: chars,
                    language: "rust".into(),
                    symbol: Some(format!("f{}", rank)),
                    content_hash: String::new(),
                },
            },
            similarity: 0.9 - rank as f32 * 0.1,
            rerank_score: 0.9 - rank as f32 * 0.1,
        }
    }

    fn synthesizer(llm: Arc<ScriptedLlm>, token_budget: usize) -> Synthesizer {
        let config = SynthesisConfig {
            token_budget,
            retry_backoff_ms: 1,
            ..SynthesisConfig::default()
        };
        Synthesizer::new(llm, "test-model", &config).unwrap()
    }

    #[tokio::test]
    async fn test_generated_answer_cites_all_chunks() {
        let llm = ScriptedLlm::new(vec![Ok("  Login lives in `src/file0.rs`.  ".into())]);
        let synth = synthesizer(llm.clone(), 3000);

        let answer = synth
            .synthesize("repo", "where is login?", vec![ranked(0, 100), ranked(1, 100)])
            .await
            .unwrap();

        assert_eq!(answer.status, AnswerStatus::Generated);
        assert_eq!(answer.text, "Login lives in `src/file0.rs`.");
        assert_eq!(answer.citations.len(), 2);
        assert_eq!(llm.calls(), 1);

        let prompt = llm.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("where is login?"));
        assert!(prompt.contains("### [1] src/file0.rs (lines 1-10) `f0`"));
        assert!(prompt.contains("### [2] src/file1.rs"));
    }

    fn overhead(synth: &Synthesizer, question: &str) -> usize {
        let system = synth.templates.system("repo").unwrap();
        synth.prompt_overhead(&system, "repo", question).unwrap()
    }

    #[tokio::test]
    async fn test_budget_drops_lowest_ranks_whole() {
        let llm = ScriptedLlm::new(vec![Ok("ok".into())]);
        let mut synth = synthesizer(llm.clone(), 0);
        // Each block is a little over 100 tokens
        synth.token_budget = overhead(&synth, "q") + 250;

        let ranked = vec![ranked(0, 400), ranked(1, 400), ranked(2, 400), ranked(3, 400)];
        let answer = synth.synthesize("repo", "q", ranked).await.unwrap();

        assert_eq!(answer.citations.len(), 2);
        assert_eq!(answer.degradations.dropped_for_budget, 2);
        assert_eq!(answer.citations[0].chunk.id, "chunk-0");
        assert_eq!(answer.citations[1].chunk.id, "chunk-1");

        let prompt = llm.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains(&"x".repeat(400)));
        assert!(!prompt.contains("src/file2.rs"));
    }

    #[tokio::test]
    async fn test_retry_once_then_succeed() {
        let llm = ScriptedLlm::new(vec![
            Err(AppError::Llm("503".into())),
            Ok("second time".into()),
        ]);
        let synth = synthesizer(llm.clone(), 3000);

        let answer = synth.synthesize("repo", "q", vec![ranked(0, 10)]).await.unwrap();
        assert_eq!(answer.status, AnswerStatus::Generated);
        assert_eq!(answer.text, "second time");
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_two_failures_give_citation_only_answer() {
        let llm = ScriptedLlm::new(vec![
            Err(AppError::Llm("connection refused".into())),
            Ok("   ".into()),
        ]);
        let synth = synthesizer(llm.clone(), 3000);

        let answer = synth
            .synthesize("repo", "q", vec![ranked(0, 10), ranked(1, 10)])
            .await
            .unwrap();

        assert_eq!(answer.status, AnswerStatus::GenerationUnavailable);
        assert_eq!(answer.citations.len(), 2);
        assert!(answer.text.starts_with(GENERATION_UNAVAILABLE));
        assert!(answer.text.contains("src/file0.rs:1-10 (f0)"));
        assert_eq!(
            answer.degradations.generation_error.as_deref(),
            Some("empty response")
        );
        assert_eq!(llm.calls(), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let llm = Arc::new(ScriptedLlm {
            outcomes: Mutex::new(vec![Ok("late".into()), Ok("late".into())].into()),
            prompts: Mutex::new(Vec::new()),
            delay: Duration::from_millis(200),
        });
        let mut synth = synthesizer(llm.clone(), 3000);
        synth.timeout = Duration::from_millis(20);

        let answer = synth.synthesize("repo", "q", vec![ranked(0, 10)]).await.unwrap();
        assert_eq!(answer.status, AnswerStatus::GenerationUnavailable);
        assert!(answer
            .degradations
            .generation_error
            .unwrap()
            .starts_with("timed out"));
    }

    #[tokio::test]
    async fn test_nothing_to_cite_skips_the_model() {
        let llm = ScriptedLlm::new(vec![]);
        let synth = synthesizer(llm.clone(), 3000);

        let answer = synth.synthesize("repo", "q", Vec::new()).await.unwrap();
        assert_eq!(answer.text, NOT_FOUND_SENTENCE);
        assert_eq!(llm.calls(), 0);
    }

    #[test]
    fn test_fit_budget() {
        let blocks = vec!["a".repeat(40), "b".repeat(40), "c".repeat(40)];
        assert_eq!(fit_budget(&blocks, 30), 3);
        assert_eq!(fit_budget(&blocks, 29), 2);
        assert_eq!(fit_budget(&blocks, 9), 0);
        assert_eq!(fit_budget(&[], 0), 0);
    }

    #[tokio::test]
    async fn test_long_question_is_charged_to_the_budget() {
        let llm = ScriptedLlm::new(vec![Ok("ok".into()), Ok("ok".into())]);
        let mut synth = synthesizer(llm.clone(), 0);
        synth.token_budget = overhead(&synth, "q") + 250;

        let short = synth
            .synthesize("repo", "q", vec![ranked(0, 400), ranked(1, 400)])
            .await
            .unwrap();
        assert_eq!(short.citations.len(), 2);

        let long_question = "why ".repeat(200);
        let long = synth
            .synthesize("repo", &long_question, vec![ranked(0, 400), ranked(1, 400)])
            .await
            .unwrap();
        assert_eq!(long.citations.len(), 0);
        assert_eq!(long.degradations.dropped_for_budget, 2);
    }

    #[tokio::test]
    async fn test_oversized_top_chunk_reports_context_exceeded() {
        let llm = ScriptedLlm::new(vec![Ok("unused".into())]);
        let synth = synthesizer(llm.clone(), 3000);

        let answer = synth
            .synthesize("repo", "q", vec![ranked(0, 24_000), ranked(1, 100)])
            .await
            .unwrap();

        assert_eq!(answer.status, AnswerStatus::ContextExceeded);
        assert!(answer.citations.is_empty());
        assert_eq!(answer.degradations.dropped_for_budget, 2);
        assert!(answer.text.starts_with(CONTEXT_EXCEEDED));
        assert!(answer.text.contains("src/file0.rs:1-10 (f0)"));
        assert_ne!(answer.text, NOT_FOUND_SENTENCE);
        assert_eq!(llm.calls(), 0);
    }
}
