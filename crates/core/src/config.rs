//! Application configuration for RepoMind.
//!
//! Sources, lowest precedence first:
//! - built-in defaults
//! - `<workspace>/.repomind/config.yaml` (or the file named by `REPOMIND_CONFIG`)
//! - environment variables
//! - command-line flags (`with_overrides`)
//!
//! All persistent state lives under the workspace's `.repomind/` directory.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Name of the per-workspace state directory.
pub const DATA_DIR_NAME: &str = ".repomind";

/// Provider names accepted by `validate`.
pub const KNOWN_PROVIDERS: [&str; 3] = ["ollama", "openai", "groq"];

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Workspace root (contains `.repomind/`)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Active LLM provider ("ollama", "openai", "groq")
    pub provider: String,

    /// Model identifier for answer generation
    pub model: String,

    /// Endpoint override for the active provider
    pub endpoint: Option<String>,

    /// API key from `REPOMIND_API_KEY`
    pub api_key: Option<String>,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,

    /// Provider table from config.yaml
    pub llm: Option<LlmConfig>,
}

/// `llm:` section of config.yaml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(rename = "activeProvider")]
    pub active_provider: String,

    pub providers: HashMap<String, ProviderConfig>,
}

/// Provider-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProviderConfig {
    /// OpenAI chat-completions compatible API (OpenAI, Groq, ...)
    OpenAiCompatible {
        #[serde(rename = "apiKeyEnv")]
        api_key_env: String,
        model: String,
        endpoint: Option<String>,
    },
    /// Local Ollama runtime
    Ollama {
        endpoint: String,
        model: String,
        timeout: Option<u64>,
    },
}

impl ProviderConfig {
    pub fn model(&self) -> &str {
        match self {
            Self::OpenAiCompatible { model, .. } | Self::Ollama { model, .. } => model,
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Self::OpenAiCompatible { endpoint, .. } => endpoint.as_deref(),
            Self::Ollama { endpoint, .. } => Some(endpoint),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
    llm: Option<LlmConfig>,
    logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    color: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            provider: "ollama".to_string(),
            model: "llama3.2".to_string(),
            endpoint: None,
            api_key: None,
            log_level: None,
            verbose: false,
            no_color: false,
            llm: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config file and environment.
    ///
    /// Environment variables:
    /// - `REPOMIND_WORKSPACE`: workspace path
    /// - `REPOMIND_CONFIG`: config file path
    /// - `REPOMIND_PROVIDER`: LLM provider
    /// - `REPOMIND_MODEL`: model identifier
    /// - `REPOMIND_API_KEY`: API key for the active provider
    /// - `RUST_LOG`: log filter
    /// - `NO_COLOR`: disable colored output
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(workspace) = std::env::var("REPOMIND_WORKSPACE") {
            config.workspace = PathBuf::from(workspace);
        }

        if let Ok(config_file) = std::env::var("REPOMIND_CONFIG") {
            config.config_file = Some(PathBuf::from(config_file));
        }

        if !config.workspace.exists() {
            return Err(AppError::Config(format!(
                "Workspace directory does not exist: {:?}",
                config.workspace
            )));
        }

        let config_path = config
            .config_file
            .clone()
            .unwrap_or_else(|| config.data_dir().join("config.yaml"));

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        if let Ok(provider) = std::env::var("REPOMIND_PROVIDER") {
            config.provider = provider;
        }

        if let Ok(model) = std::env::var("REPOMIND_MODEL") {
            config.model = model;
        }

        config.api_key = std::env::var("REPOMIND_API_KEY").ok();

        if let Ok(level) = std::env::var("RUST_LOG") {
            config.log_level = Some(level);
        }

        if std::env::var_os("NO_COLOR").is_some() {
            config.no_color = true;
        }

        Ok(config)
    }

    /// Merge a YAML config file into a copy of this config.
    pub fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config_file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;

        let mut result = self.clone();

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
        }

        if let Some(llm) = config_file.llm {
            result.provider = llm.active_provider.clone();

            if let Some(provider_config) = llm.providers.get(&llm.active_provider) {
                result.model = provider_config.model().to_string();
                result.endpoint = provider_config.endpoint().map(str::to_string);
            }

            result.llm = Some(llm);
        }

        Ok(result)
    }

    /// Apply CLI overrides; flags win over environment and file.
    #[allow(clippy::too_many_arguments)]
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        config_file: Option<PathBuf>,
        provider: Option<String>,
        model: Option<String>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
        }

        if let Some(provider) = provider {
            // A different provider invalidates the endpoint picked from the file.
            if provider != self.provider {
                self.endpoint = self
                    .get_provider_config(&provider)
                    .and_then(|p| p.endpoint().map(str::to_string));
            }
            self.provider = provider;
        }

        if let Some(model) = model {
            self.model = model;
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Path to the `.repomind` directory.
    pub fn data_dir(&self) -> PathBuf {
        self.workspace.join(DATA_DIR_NAME)
    }

    /// Ensure the `.repomind` directory exists.
    pub fn ensure_data_dir(&self) -> AppResult<PathBuf> {
        let data_dir = self.data_dir();
        std::fs::create_dir_all(&data_dir).map_err(|e| {
            AppError::Config(format!("Failed to create {:?}: {}", data_dir, e))
        })?;
        Ok(data_dir)
    }

    /// Configuration entry for a provider, if the config file declared one.
    pub fn get_provider_config(&self, provider: &str) -> Option<ProviderConfig> {
        self.llm
            .as_ref()
            .and_then(|llm| llm.providers.get(provider).cloned())
    }

    /// Resolve the API key: `REPOMIND_API_KEY` first, then the provider's `apiKeyEnv`.
    pub fn resolve_api_key(&self, provider: &str) -> Option<String> {
        if let Some(ref key) = self.api_key {
            return Some(key.clone());
        }

        match self.get_provider_config(provider) {
            Some(ProviderConfig::OpenAiCompatible { api_key_env, .. }) => {
                std::env::var(&api_key_env).ok()
            }
            _ if provider == "groq" => std::env::var("GROQ_API_KEY").ok(),
            _ if provider == "openai" => std::env::var("OPENAI_API_KEY").ok(),
            _ => None,
        }
    }

    /// Validate configuration for the active provider.
    pub fn validate(&self) -> AppResult<()> {
        let provider = self.provider.as_str();

        if !KNOWN_PROVIDERS.contains(&provider) {
            return Err(AppError::Config(format!(
                "Unknown provider: {}. Supported: {}",
                provider,
                KNOWN_PROVIDERS.join(", ")
            )));
        }

        if provider != "ollama" && self.resolve_api_key(provider).is_none() {
            return Err(AppError::Config(format!(
                "No API key found for provider '{}'. Set REPOMIND_API_KEY or the provider's apiKeyEnv",
                provider
            )));
        }

        Ok(())
    }
}
