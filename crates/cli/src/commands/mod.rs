//! Command handlers for the RepoMind CLI.

pub mod ask;
pub mod ingest;
pub mod status;

pub use ask::AskCommand;
pub use ingest::IngestCommand;
pub use status::StatusCommand;

use repomind_core::{config::AppConfig, AppError, AppResult};
use repomind_knowledge::RepoMind;
use serde::Serialize;

/// Open the workspace's index with the configured language model.
pub(crate) async fn open(config: &AppConfig) -> AppResult<RepoMind> {
    Ok(RepoMind::from_workspace(&config.workspace, config).await?)
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> AppResult<()> {
    let output = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::Serialization(format!("JSON serialization failed: {}", e)))?;
    println!("{}", output);
    Ok(())
}
