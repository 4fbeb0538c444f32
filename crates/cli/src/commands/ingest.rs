//! Ingest command handler.

use clap::Args;
use repomind_core::{config::AppConfig, AppResult};
use repomind_knowledge::{IngestOptions, ProgressEvent, ProgressReporter};
use std::sync::Arc;

/// Clone (or refresh) a repository and index its code
#[derive(Args, Debug)]
pub struct IngestCommand {
    /// Git URL or local directory
    pub repo: String,

    /// Discard an existing clone and fetch from scratch
    #[arg(long)]
    pub force_clone: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl IngestCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ingest command for '{}'", self.repo);

        let mind = super::open(config).await?;

        // Progress lines go to stderr so stdout carries only the report.
        let progress = ProgressReporter::new(Arc::new(|event: ProgressEvent| {
            eprintln!("{}", event.format_simple());
        }));
        let options = IngestOptions {
            force_clone: self.force_clone,
        };

        let report = mind.ingest_with(&self.repo, &options, &progress).await?;

        if self.json {
            return super::print_json(&report);
        }

        println!("Repository: {}", report.repository);
        println!("  State: {}", report.state);
        if let Some(commit) = &report.commit {
            println!("  Commit: {}", commit);
        }
        println!(
            "  Files: {} scanned, {} indexed, {} unchanged, {} removed, {} skipped",
            report.files_scanned,
            report.files_indexed,
            report.files_unchanged,
            report.files_removed,
            report.files_skipped
        );
        if report.parse_fallbacks > 0 {
            println!("  Parse fallbacks: {}", report.parse_fallbacks);
        }
        if report.recovered_interrupted {
            println!("  Note: the previous ingestion was interrupted and has been redone");
        }
        println!(
            "  Chunks: {} written, {} deleted",
            report.chunks_written, report.chunks_deleted
        );
        println!("  Duration: {:.2}s", report.duration_secs);

        Ok(())
    }
}
