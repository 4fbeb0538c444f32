//! Answer generation over reranked chunks.

mod prompt;
mod synthesizer;
mod types;

pub use prompt::{estimate_tokens, PromptTemplates, NOT_FOUND_SENTENCE};
pub use synthesizer::Synthesizer;
pub use types::{Answer, AnswerStatus, Degradations, CONTEXT_EXCEEDED, GENERATION_UNAVAILABLE};
