//! Prompt templates for answer generation.

use crate::error::{KnowledgeError, KnowledgeResult};
use crate::types::RankedResult;
use handlebars::Handlebars;
use serde::Serialize;

/// Sentence the model must use when the context does not answer the question.
pub const NOT_FOUND_SENTENCE: &str = "I cannot find that logic in the retrieved files.";

const SYSTEM_TEMPLATE: &str = "You are a senior engineer answering questions about the \
{{repository}} codebase using only the source excerpts provided.

Instructions:
- Cite the file name (and line range when useful) for every claim, e.g. `src/auth.js:12-30`
- Show code in Markdown fenced blocks tagged with the language
- Keep the tone concise and technical; no filler
- Do not invent functions, files or behaviour that the excerpts do not show
- If the excerpts do not contain the answer, reply exactly: \"{{not_found}}\"";

const SOURCE_TEMPLATE: &str = "### [{{rank}}] {{path}} (lines {{start_line}}-{{end_line}})\
{{#if symbol}} `{{symbol}}`{{/if}}
```{{language}}
{{text}}
```";

const QUESTION_TEMPLATE: &str = "Question:
{{question}}

Retrieved source excerpts, most relevant first:

{{#if sources}}{{sources}}{{else}}(no excerpts were retrieved){{/if}}";

#[derive(Serialize)]
struct SourceVars<'a> {
    rank: usize,
    path: &'a str,
    start_line: usize,
    end_line: usize,
    symbol: Option<&'a str>,
    language: &'a str,
    text: &'a str,
}

/// Compiled templates, registered once per synthesizer.
pub struct PromptTemplates {
    registry: Handlebars<'static>,
}

impl PromptTemplates {
    pub fn new() -> KnowledgeResult<Self> {
        let mut registry = Handlebars::new();

        // Plain text, not HTML
        registry.register_escape_fn(handlebars::no_escape);
        registry.set_strict_mode(true);

        for (name, template) in [
            ("system", SYSTEM_TEMPLATE),
            ("source", SOURCE_TEMPLATE),
            ("question", QUESTION_TEMPLATE),
        ] {
            registry
                .register_template_string(name, template)
                .map_err(|e| {
                    KnowledgeError::Config(format!("Failed to register {} template: {}", name, e))
                })?;
        }

        Ok(Self { registry })
    }

    pub fn system(&self, repository: &str) -> KnowledgeResult<String> {
        let vars = serde_json::json!({
            "repository": repository,
            "not_found": NOT_FOUND_SENTENCE,
        });
        self.render("system", &vars, repository)
    }

    /// One source block; `rank` is 1-based.
    pub fn source_block(
        &self,
        repository: &str,
        rank: usize,
        result: &RankedResult,
    ) -> KnowledgeResult<String> {
        let meta = &result.chunk.metadata;
        let vars = SourceVars {
            rank,
            path: &meta.path,
            start_line: meta.start_line,
            end_line: meta.end_line,
            symbol: meta.symbol.as_deref(),
            language: &meta.language,
            text: result.chunk.text.trim_end_matches('\n'),
        };
        self.render("source", &vars, repository)
    }

    pub fn question(
        &self,
        repository: &str,
        question: &str,
        blocks: &[String],
    ) -> KnowledgeResult<String> {
        let vars = serde_json::json!({
            "question": question,
            "sources": blocks.join("\n\n"),
        });
        self.render("question", &vars, repository)
    }

    fn render<T: Serialize>(
        &self,
        name: &str,
        vars: &T,
        repository: &str,
    ) -> KnowledgeResult<String> {
        self.registry
            .render(name, vars)
            .map_err(|e| KnowledgeError::Synthesis {
                repository: repository.to_string(),
                reason: format!("Failed to render {} prompt: {}", name, e),
            })
    }
}

/// Token estimate for a rendered block: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}
