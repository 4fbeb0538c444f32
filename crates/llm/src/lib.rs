//! Language-model integration for RepoMind.
//!
//! A provider-agnostic `LlmClient` trait with one implementation per backend:
//! - **Ollama**: local runtime (default)
//! - **OpenAI-compatible**: OpenAI, Groq and other `/chat/completions` hosts
//!
//! # Example
//! ```no_run
//! use repomind_llm::{create_client, LlmRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = create_client("ollama", None, None)?;
//! let request = LlmRequest::new("Hello, world!", "llama3.2");
//! let response = client.complete(&request).await?;
//! println!("{}", response.content);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod factory;
pub mod providers;
pub mod types;

pub use client::{LlmClient, LlmRequest, LlmResponse, LlmUsage};
pub use factory::create_client;
pub use providers::{OllamaClient, OpenAiCompatibleClient};
pub use types::ProviderType;
