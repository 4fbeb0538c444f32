//! LLM provider factory.
//!
//! Maps a provider name from configuration onto a concrete `LlmClient`.

use crate::client::LlmClient;
use crate::providers::ollama::DEFAULT_OLLAMA_URL;
use crate::providers::openai::{GROQ_URL, OPENAI_URL};
use crate::providers::{OllamaClient, OpenAiCompatibleClient};
use crate::types::ProviderType;
use repomind_core::{AppError, AppResult};
use std::sync::Arc;

/// Create an LLM client based on the provider name.
///
/// * `provider` - "ollama", "openai" or "groq"
/// * `endpoint` - optional base URL override
/// * `api_key` - required by hosted providers
pub fn create_client(
    provider: &str,
    endpoint: Option<&str>,
    api_key: Option<&str>,
) -> AppResult<Arc<dyn LlmClient>> {
    let provider_type = ProviderType::parse(provider)
        .ok_or_else(|| AppError::Config(format!("Unknown provider: {}", provider)))?;

    if provider_type.requires_api_key() && api_key.is_none() {
        return Err(AppError::Config(format!(
            "{} provider requires an API key",
            provider_type.as_str()
        )));
    }

    let client: Arc<dyn LlmClient> = match provider_type {
        ProviderType::Ollama => Arc::new(OllamaClient::with_base_url(
            endpoint.unwrap_or(DEFAULT_OLLAMA_URL),
        )),
        ProviderType::OpenAi => Arc::new(OpenAiCompatibleClient::new(
            "openai",
            endpoint.unwrap_or(OPENAI_URL),
            api_key.unwrap_or_default(),
        )),
        ProviderType::Groq => Arc::new(OpenAiCompatibleClient::new(
            "groq",
            endpoint.unwrap_or(GROQ_URL),
            api_key.unwrap_or_default(),
        )),
    };

    tracing::debug!("Created LLM client for provider '{}'", client.provider_name());
    Ok(client)
}
