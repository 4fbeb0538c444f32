//! Repository sources: local directories and shallow git clones.

use crate::error::{KnowledgeError, KnowledgeResult};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// A materialized working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub root: PathBuf,
    /// `HEAD` commit when the tree is a git work tree
    pub commit: Option<String>,
}

/// Capability to obtain a working tree for a repository identifier.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Fetch or refresh `identifier`. Remote sources are materialized under
    /// `checkout_dir`; local directories are used in place.
    async fn fetch(&self, identifier: &str, checkout_dir: &Path) -> KnowledgeResult<Checkout>;
}

/// Git-backed source using the system `git` binary.
#[derive(Debug, Clone, Default)]
pub struct GitSource;

impl GitSource {
    pub fn new() -> Self {
        Self
    }

    async fn clone_fresh(&self, identifier: &str, checkout_dir: &Path) -> Result<(), String> {
        if let Some(parent) = checkout_dir.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
        }

        let target = checkout_dir.to_string_lossy().to_string();
        tracing::info!("Cloning {} into {}", identifier, target);
        if let Err(e) = git(&["clone", "--depth", "1", "--", identifier, &target], None).await {
            // Leave nothing half-cloned behind.
            let _ = tokio::fs::remove_dir_all(checkout_dir).await;
            return Err(e);
        }
        Ok(())
    }

    async fn refresh(&self, checkout_dir: &Path) -> Result<(), String> {
        tracing::info!("Refreshing existing clone at {}", checkout_dir.display());
        git(&["fetch", "--depth", "1", "origin"], Some(checkout_dir)).await?;
        git(&["reset", "--hard", "FETCH_HEAD"], Some(checkout_dir)).await?;
        Ok(())
    }

    async fn is_valid_clone(&self, checkout_dir: &Path) -> bool {
        checkout_dir.join(".git").exists()
            && git(&["rev-parse", "--is-inside-work-tree"], Some(checkout_dir))
                .await
                .is_ok()
    }
}

#[async_trait]
impl SourceProvider for GitSource {
    async fn fetch(&self, identifier: &str, checkout_dir: &Path) -> KnowledgeResult<Checkout> {
        let clone_error = |reason: String| KnowledgeError::Clone {
            repository: identifier.to_string(),
            reason,
        };

        if let Some(local) = local_source(identifier) {
            let commit = if local.join(".git").exists() {
                head_commit(&local).await
            } else {
                None
            };
            tracing::debug!("Using local directory {} in place", local.display());
            return Ok(Checkout {
                root: local,
                commit,
            });
        }

        if identifier.starts_with('-') {
            return Err(clone_error(format!(
                "'{}' is not a repository URL or path",
                identifier
            )));
        }

        if checkout_dir.exists() {
            if self.is_valid_clone(checkout_dir).await {
                self.refresh(checkout_dir).await.map_err(clone_error)?;
            } else {
                tracing::warn!(
                    "{} is not a valid git clone, re-cloning",
                    checkout_dir.display()
                );
                tokio::fs::remove_dir_all(checkout_dir)
                    .await
                    .map_err(|e| clone_error(format!("Failed to remove stale checkout: {}", e)))?;
                self.clone_fresh(identifier, checkout_dir)
                    .await
                    .map_err(clone_error)?;
            }
        } else {
            self.clone_fresh(identifier, checkout_dir)
                .await
                .map_err(clone_error)?;
        }

        Ok(Checkout {
            root: checkout_dir.to_path_buf(),
            commit: head_commit(checkout_dir).await,
        })
    }
}

/// The canonical directory when `identifier` names an existing local directory.
pub fn local_source(identifier: &str) -> Option<PathBuf> {
    let path = Path::new(identifier);
    if path.is_dir() {
        path.canonicalize().ok()
    } else {
        None
    }
}

/// Normalized form used as the manifest key: local directories become
/// absolute paths, anything else loses surrounding whitespace and trailing
/// slashes.
pub fn canonical_identifier(identifier: &str) -> String {
    let trimmed = identifier.trim();
    match local_source(trimmed) {
        Some(path) => path.to_string_lossy().to_string(),
        None => trimmed.trim_end_matches('/').to_string(),
    }
}

/// Display name of a repository URL or path.
///
/// Handles `https://host/owner/repo(.git)`, `git@host:owner/repo.git` and
/// plain paths.
pub fn extract_repo_name(identifier: &str) -> KnowledgeResult<String> {
    let without_query = identifier
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim();

    let path = match without_query.strip_prefix("git@") {
        Some(rest) => rest.split_once(':').map_or(rest, |(_, path)| path),
        None => without_query,
    };

    let last = path
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let name = last.strip_suffix(".git").unwrap_or(last);

    let name: String = name
        .chars()
        .map(|c| if "<>:\"|?*".contains(c) { '_' } else { c })
        .collect();

    if name.is_empty() {
        return Err(KnowledgeError::InvalidInput(format!(
            "cannot derive a repository name from '{}'",
            identifier
        )));
    }
    Ok(name)
}

/// Vector store namespace: the sanitized name plus a short identifier hash,
/// so same-named repositories from different owners never collide.
pub fn namespace_for(identifier: &str) -> KnowledgeResult<String> {
    let name: String = extract_repo_name(identifier)?
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let digest = format!("{:x}", Sha256::digest(identifier.as_bytes()));
    Ok(format!("{}-{}", name, &digest[..12]))
}

async fn head_commit(dir: &Path) -> Option<String> {
    match git(&["rev-parse", "HEAD"], Some(dir)).await {
        Ok(commit) => Some(commit),
        Err(e) => {
            tracing::warn!("Could not resolve HEAD in {}: {}", dir.display(), e);
            None
        }
    }
}

/// Run git and return trimmed stdout, or stderr on failure.
async fn git(args: &[&str], cwd: Option<&Path>) -> Result<String, String> {
    let mut command = Command::new("git");
    command
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let output = command
        .output()
        .await
        .map_err(|e| format!("failed to run git: {}", e))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}
