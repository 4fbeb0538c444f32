//! Status command handler.

use clap::Args;
use repomind_core::{config::AppConfig, AppResult};

/// Show ingestion state and chunk count for a repository
#[derive(Args, Debug)]
pub struct StatusCommand {
    /// Git URL or local directory, as given to `ingest`
    pub repo: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatusCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing status command for '{}'", self.repo);

        let mind = super::open(config).await?;
        let repository = mind.status(&self.repo)?;
        let chunks = mind.chunk_count(&self.repo).await?;

        if self.json {
            let output = serde_json::json!({
                "repository": self.repo,
                "status": repository,
                "chunks": chunks,
            });
            return super::print_json(&output);
        }

        let Some(repository) = repository else {
            println!("{}: not ingested", self.repo);
            return Ok(());
        };

        println!("Repository: {}", repository.identifier);
        println!("  State: {}", repository.state);
        println!("  Namespace: {}", repository.namespace);
        println!("  Checkout: {}", repository.checkout_path.display());
        println!(
            "  Commit: {}",
            repository.last_commit.as_deref().unwrap_or("(not a git work tree)")
        );
        println!("  Chunks: {}", chunks);
        if let Some(indexed_at) = repository.indexed_at {
            println!("  Last indexed: {}", indexed_at.to_rfc3339());
        }
        if !repository.has_snapshot {
            println!("  No queryable snapshot yet");
        }

        Ok(())
    }
}
