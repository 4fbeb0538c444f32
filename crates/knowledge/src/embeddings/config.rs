//! Embedding configuration.

use repomind_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Embedding model selection and call policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    /// Provider name: "trigram" or "ollama"
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model identifier (provider-specific)
    #[serde(default = "default_model")]
    pub model: String,

    /// Embedding vector dimensions
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Texts per provider call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Base URL for HTTP providers
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Per-call timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after the first failed call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay; doubled on each further retry
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_provider() -> String {
    "trigram".to_string()
}

fn default_model() -> String {
    "trigram-v2".to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_batch_size() -> usize {
    32
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dimensions: default_dimensions(),
            batch_size: default_batch_size(),
            endpoint: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

impl EmbeddingConfig {
    /// Validate that another config is consistent with this one.
    ///
    /// Vectors produced under different provider/model/dimension settings are
    /// not comparable, so an index built with one cannot be queried with the
    /// other.
    pub fn validate_consistency(&self, other: &Self) -> AppResult<()> {
        if self.provider != other.provider {
            return Err(AppError::Config(format!(
                "Embedding provider mismatch: expected '{}', got '{}'",
                self.provider, other.provider
            )));
        }

        if self.model != other.model {
            return Err(AppError::Config(format!(
                "Embedding model mismatch: expected '{}', got '{}'",
                self.model, other.model
            )));
        }

        if self.dimensions != other.dimensions {
            return Err(AppError::Config(format!(
                "Dimension mismatch: expected {}, got {}",
                self.dimensions, other.dimensions
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EmbeddingConfig::default();
        assert_eq!(config.provider, "trigram");
        assert_eq!(config.dimensions, 384);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_backoff_ms, 100);
    }

    #[test]
    fn test_partial_yaml() {
        let config: EmbeddingConfig =
            serde_yaml::from_str("provider: ollama\nmodel: nomic-embed-text\ndimensions: 768\n")
                .unwrap();
        assert_eq!(config.provider, "ollama");
        assert_eq!(config.dimensions, 768);
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_validate_consistency_dimension_mismatch() {
        let config1 = EmbeddingConfig::default();
        let config2 = EmbeddingConfig {
            dimensions: 768,
            ..config1.clone()
        };

        let err = config1.validate_consistency(&config2).unwrap_err();
        assert!(err.to_string().contains("Dimension mismatch"));
        assert!(config1.validate_consistency(&config1.clone()).is_ok());
    }
}
