//! Persistent ingestion manifest.
//!
//! Records each repository's state and, per file, the content hash and chunk
//! ids last committed to the vector store. A `pending` entry belongs to a
//! file whose store update may have been interrupted; its `chunk_ids` then
//! cover both the old and the new chunks.

use super::IngestionState;
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::types::Repository;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS repositories (
    identifier TEXT PRIMARY KEY,
    namespace TEXT NOT NULL,
    checkout_path TEXT NOT NULL,
    last_commit TEXT,
    state TEXT NOT NULL,
    failure TEXT,
    indexed_at TEXT,
    has_snapshot INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS files (
    namespace TEXT NOT NULL,
    path TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    chunk_ids TEXT NOT NULL,
    pending INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (namespace, path)
);
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub content_hash: String,
    pub chunk_ids: Vec<String>,
    pub pending: bool,
}

pub struct Manifest {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Manifest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manifest").finish_non_exhaustive()
    }
}

impl Manifest {
    pub fn open(db_path: &Path) -> KnowledgeResult<Self> {
        let err = |e: &dyn std::fmt::Display| KnowledgeError::manifest("manifest", e);

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| err(&e))?;
        }
        let conn = Connection::open(db_path).map_err(|e| err(&e))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| err(&e))?;
        let _mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(|e| err(&e))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> KnowledgeResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| KnowledgeError::manifest("manifest", e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> KnowledgeResult<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| KnowledgeError::manifest("manifest", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self, repository: &str) -> KnowledgeResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| KnowledgeError::manifest(repository, format!("lock poisoned: {}", e)))
    }

    pub fn load_repository(&self, identifier: &str) -> KnowledgeResult<Option<Repository>> {
        let conn = self.lock(identifier)?;
        let row = conn
            .query_row(
                "SELECT namespace, checkout_path, last_commit, state, failure, indexed_at, has_snapshot
                 FROM repositories WHERE identifier = ?1",
                params![identifier],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| KnowledgeError::manifest(identifier, e))?;

        let Some((namespace, checkout, commit, state, failure, indexed_at, snapshot)) = row else {
            return Ok(None);
        };

        let state = IngestionState::from_parts(&state, failure).ok_or_else(|| {
            KnowledgeError::manifest(identifier, format!("unknown state '{}'", state))
        })?;
        let indexed_at = indexed_at
            .map(|ts| {
                DateTime::parse_from_rfc3339(&ts)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| KnowledgeError::manifest(identifier, e))
            })
            .transpose()?;

        Ok(Some(Repository {
            identifier: identifier.to_string(),
            namespace,
            checkout_path: PathBuf::from(checkout),
            last_commit: commit,
            state,
            has_snapshot: snapshot != 0,
            indexed_at,
        }))
    }

    pub fn save_repository(&self, repository: &Repository) -> KnowledgeResult<()> {
        let conn = self.lock(&repository.identifier)?;
        conn.execute(
            "INSERT OR REPLACE INTO repositories
             (identifier, namespace, checkout_path, last_commit, state, failure, indexed_at, has_snapshot)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                repository.identifier,
                repository.namespace,
                repository.checkout_path.to_string_lossy().to_string(),
                repository.last_commit,
                repository.state.as_str(),
                repository.state.failure_reason(),
                repository.indexed_at.map(|t| t.to_rfc3339()),
                repository.has_snapshot as i64,
            ],
        )
        .map_err(|e| KnowledgeError::manifest(&repository.identifier, e))?;
        Ok(())
    }

    pub fn file_entries(&self, namespace: &str) -> KnowledgeResult<HashMap<String, FileEntry>> {
        let conn = self.lock(namespace)?;
        let mut stmt = conn
            .prepare("SELECT path, content_hash, chunk_ids, pending FROM files WHERE namespace = ?1")
            .map_err(|e| KnowledgeError::manifest(namespace, e))?;

        let rows = stmt
            .query_map(params![namespace], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .map_err(|e| KnowledgeError::manifest(namespace, e))?;

        let mut entries = HashMap::new();
        for row in rows {
            let (path, content_hash, ids, pending) =
                row.map_err(|e| KnowledgeError::manifest(namespace, e))?;
            let chunk_ids: Vec<String> = serde_json::from_str(&ids)
                .map_err(|e| KnowledgeError::manifest(namespace, format!("{}: {}", path, e)))?;
            entries.insert(
                path,
                FileEntry {
                    content_hash,
                    chunk_ids,
                    pending: pending != 0,
                },
            );
        }
        Ok(entries)
    }

    /// Mark `path` as being rewritten. The recorded ids become the union of
    /// what was committed before and `new_ids`.
    pub fn begin_file(
        &self,
        namespace: &str,
        path: &str,
        content_hash: &str,
        new_ids: &[String],
    ) -> KnowledgeResult<()> {
        let conn = self.lock(namespace)?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT chunk_ids FROM files WHERE namespace = ?1 AND path = ?2",
                params![namespace, path],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| KnowledgeError::manifest(namespace, e))?;

        let mut ids: BTreeSet<String> = match existing {
            Some(json) => serde_json::from_str::<Vec<String>>(&json)
                .map_err(|e| KnowledgeError::manifest(namespace, e))?
                .into_iter()
                .collect(),
            None => BTreeSet::new(),
        };
        ids.extend(new_ids.iter().cloned());

        Self::write_entry(&conn, namespace, path, content_hash, ids.into_iter(), true)
    }

    /// Record the committed chunk ids of `path`.
    pub fn commit_file(
        &self,
        namespace: &str,
        path: &str,
        content_hash: &str,
        chunk_ids: &[String],
    ) -> KnowledgeResult<()> {
        let conn = self.lock(namespace)?;
        Self::write_entry(
            &conn,
            namespace,
            path,
            content_hash,
            chunk_ids.iter().cloned(),
            false,
        )
    }

    pub fn remove_file(&self, namespace: &str, path: &str) -> KnowledgeResult<()> {
        let conn = self.lock(namespace)?;
        conn.execute(
            "DELETE FROM files WHERE namespace = ?1 AND path = ?2",
            params![namespace, path],
        )
        .map_err(|e| KnowledgeError::manifest(namespace, e))?;
        Ok(())
    }

    fn write_entry(
        conn: &Connection,
        namespace: &str,
        path: &str,
        content_hash: &str,
        ids: impl Iterator<Item = String>,
        pending: bool,
    ) -> KnowledgeResult<()> {
        let ids: Vec<String> = ids.collect();
        let json = serde_json::to_string(&ids).map_err(|e| KnowledgeError::manifest(namespace, e))?;
        conn.execute(
            "INSERT OR REPLACE INTO files (namespace, path, content_hash, chunk_ids, pending, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                namespace,
                path,
                content_hash,
                json,
                pending as i64,
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(|e| KnowledgeError::manifest(namespace, e))?;
        Ok(())
    }
}
