//! Ask command handler.

use clap::Args;
use repomind_core::{config::AppConfig, AppResult};
use repomind_knowledge::{AnswerStatus, SearchFilter};

/// Ask a question about an ingested repository
#[derive(Args, Debug)]
pub struct AskCommand {
    /// Git URL or local directory, as given to `ingest`
    pub repo: String,

    /// The question to ask
    pub question: String,

    /// Only consider chunks in this language (e.g. rust, python)
    #[arg(long)]
    pub language: Option<String>,

    /// Only consider files under this path prefix
    #[arg(long)]
    pub path: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl AskCommand {
    fn filter(&self) -> Option<SearchFilter> {
        if self.language.is_none() && self.path.is_none() {
            return None;
        }
        Some(SearchFilter {
            language: self.language.clone(),
            path_prefix: self.path.clone(),
        })
    }

    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ask command for '{}'", self.repo);

        let mind = super::open(config).await?;
        let filter = self.filter();
        let answer = mind
            .query_with(&self.repo, &self.question, filter.as_ref())
            .await?;

        if self.json {
            return super::print_json(&answer);
        }

        println!("{}", answer.text);
        if answer.status == AnswerStatus::NotIndexed {
            return Ok(());
        }

        println!();
        if answer.citations.is_empty() {
            println!("Sources: (none)");
        } else {
            println!("Sources:");
            for citation in &answer.citations {
                match &citation.chunk.metadata.symbol {
                    Some(symbol) => println!("- {} ({})", citation.chunk.location(), symbol),
                    None => println!("- {}", citation.chunk.location()),
                }
            }
        }

        let notes = answer.degradations.notes();
        if !notes.is_empty() {
            println!();
            for note in notes {
                println!("Note: {}", note);
            }
        }

        Ok(())
    }
}
