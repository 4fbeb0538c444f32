//! Working-tree scan: which files are indexed, and their content hashes.

use crate::chunk::{Language, SUPPORTED_EXTENSIONS};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

const SKIP_DIRS: &[&str] = &[
    ".git", ".svn", ".hg", "__pycache__", "node_modules", ".venv", "venv", "env", "dist",
    "build", ".pytest_cache", ".mypy_cache", ".idea", ".vscode", ".vs", "target", "bin", "obj",
    ".gradle", ".next", ".nuxt", "vendor", "bower_components",
];

const SKIP_FILES: &[&str] = &[
    "package-lock.json", "yarn.lock", "pnpm-lock.yaml", "composer.lock", "poetry.lock",
    "Pipfile.lock", "go.sum", "Cargo.lock", "requirements.txt", "requirements-dev.txt",
    "tsconfig.json", "jsconfig.json",
];

const BINARY_SNIFF_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Relative to the checkout root, `/`-separated
    pub path: String,
    pub absolute: PathBuf,
    pub language: Language,
    /// SHA-256 of the file bytes, hex
    pub content_hash: String,
}

#[derive(Debug, Default)]
pub struct Discovery {
    /// Sorted by path
    pub files: Vec<DiscoveredFile>,
    /// Denylisted, oversized, binary or unreadable files
    pub skipped: usize,
}

pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Decode file bytes, rejecting anything that looks binary.
pub fn decode_text(bytes: Vec<u8>) -> Option<String> {
    let head = &bytes[..bytes.len().min(BINARY_SNIFF_BYTES)];
    if head.contains(&0) {
        return None;
    }
    String::from_utf8(bytes).ok()
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIP_DIRS.contains(&name))
}

fn is_denylisted(name: &str) -> bool {
    SKIP_FILES.contains(&name)
        || name.ends_with(".lock")
        || name.ends_with(".min.js")
        || name.ends_with(".min.css")
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    Some(parts.join("/"))
}

/// Walk `root` and hash every indexable file. Blocking; run it on the
/// blocking pool.
pub fn discover(root: &Path, max_file_bytes: u64) -> Discovery {
    let mut discovery = Discovery::default();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_hidden(e) && !is_skipped_dir(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Failed to read directory entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if is_denylisted(&name) {
            discovery.skipped += 1;
            continue;
        }
        if !has_supported_extension(entry.path()) {
            continue;
        }
        let Some(language) = Language::from_path(entry.path()) else {
            continue;
        };

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size > max_file_bytes {
            tracing::debug!("Skipping large file {:?} ({} bytes)", entry.path(), size);
            discovery.skipped += 1;
            continue;
        }

        let bytes = match std::fs::read(entry.path()) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Failed to read {:?}: {}", entry.path(), e);
                discovery.skipped += 1;
                continue;
            }
        };
        let hash = content_hash(&bytes);
        if decode_text(bytes).is_none() {
            tracing::debug!("Skipping binary file {:?}", entry.path());
            discovery.skipped += 1;
            continue;
        }

        let Some(path) = relative_path(root, entry.path()) else {
            continue;
        };
        discovery.files.push(DiscoveredFile {
            path,
            absolute: entry.path().to_path_buf(),
            language,
            content_hash: hash,
        });
    }

    discovery.files.sort_by(|a, b| a.path.cmp(&b.path));
    discovery
}
