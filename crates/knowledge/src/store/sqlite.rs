//! SQLite-backed vector store.
//!
//! Vectors are stored as little-endian `f32` BLOBs and scored by brute-force
//! cosine distance, which is adequate for single-repository scale.
//!
//! File-backed stores keep one connection for writes and one for reads. In
//! WAL mode a query scan proceeds while another repository's upsert
//! transaction holds the writer.

use super::{
    check_dimensions, compare_hits, cosine_distance, ChunkMetadata, SearchFilter, StoreError,
    StoreHit, VectorRecord, VectorStore,
};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS vectors (
    namespace TEXT NOT NULL,
    id TEXT NOT NULL,
    path TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    start_byte INTEGER NOT NULL,
    end_byte INTEGER NOT NULL,
    language TEXT NOT NULL,
    symbol TEXT,
    content_hash TEXT NOT NULL,
    text TEXT NOT NULL,
    embedding BLOB NOT NULL,
    PRIMARY KEY (namespace, id)
);

CREATE INDEX IF NOT EXISTS idx_vectors_path ON vectors(namespace, path);
"#;

/// Default persistent store.
#[derive(Clone)]
pub struct SqliteVectorStore {
    writer: Arc<Mutex<Connection>>,
    /// Same connection as `writer` for in-memory databases
    reader: Arc<Mutex<Connection>>,
    dimensions: usize,
}

impl std::fmt::Debug for SqliteVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteVectorStore")
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl SqliteVectorStore {
    /// Open (or create) the store at `db_path`.
    ///
    /// A database created with a different vector size is rejected.
    pub fn open(db_path: &Path, dimensions: usize) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Backend(format!("Failed to create index directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path).map_err(backend)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(backend)?;
        let _mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(backend)?;

        Self::init(&conn, dimensions)?;

        let reader = Connection::open(db_path).map_err(backend)?;
        reader.busy_timeout(Duration::from_secs(5)).map_err(backend)?;
        reader
            .execute_batch("PRAGMA query_only = ON")
            .map_err(backend)?;

        tracing::debug!("Opened SQLite vector store at {:?}", db_path);
        Ok(Self {
            writer: Arc::new(Mutex::new(conn)),
            reader: Arc::new(Mutex::new(reader)),
            dimensions,
        })
    }

    pub fn open_in_memory(dimensions: usize) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::init(&conn, dimensions)?;
        let shared = Arc::new(Mutex::new(conn));
        Ok(Self {
            writer: Arc::clone(&shared),
            reader: shared,
            dimensions,
        })
    }

    /// Create the schema and pin the vector size.
    fn init(conn: &Connection, dimensions: usize) -> Result<(), StoreError> {
        conn.execute_batch(SCHEMA).map_err(backend)?;

        conn.execute(
            "INSERT OR IGNORE INTO store_meta (key, value) VALUES ('dimensions', ?1)",
            params![dimensions.to_string()],
        )
        .map_err(backend)?;
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = 'dimensions'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend)?;
        if let Some(stored) = stored {
            let stored: usize = stored
                .parse()
                .map_err(|_| StoreError::Corrupt(format!("bad stored dimensions '{}'", stored)))?;
            if stored != dimensions {
                return Err(StoreError::Dimension {
                    expected: stored,
                    got: dimensions,
                });
            }
        }

        Ok(())
    }

    async fn write<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        with_conn(Arc::clone(&self.writer), f).await
    }

    async fn read<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        with_conn(Arc::clone(&self.reader), f).await
    }
}

/// Run `f` against `conn` on the blocking pool.
async fn with_conn<T, F>(conn: Arc<Mutex<Connection>>, f: F) -> Result<T, StoreError>
where
    F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = conn
            .lock()
            .map_err(|e| StoreError::Backend(format!("connection lock poisoned: {}", e)))?;
        f(&mut guard)
    })
    .await
    .map_err(|e| StoreError::Backend(format!("store task failed: {}", e)))?
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn backend_name(&self) -> &str {
        "sqlite"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        for record in &records {
            check_dimensions(self.dimensions, &record.vector)?;
        }

        let namespace = namespace.to_string();
        self.write(move |conn| {
            let tx = conn.transaction().map_err(backend)?;
            {
                let mut stmt = tx
                    .prepare(
                        "INSERT OR REPLACE INTO vectors
                         (namespace, id, path, start_line, end_line, start_byte, end_byte,
                          language, symbol, content_hash, text, embedding)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    )
                    .map_err(backend)?;
                for record in &records {
                    let m = &record.metadata;
                    stmt.execute(params![
                        namespace,
                        record.id,
                        m.path,
                        m.start_line as i64,
                        m.end_line as i64,
                        m.start_byte as i64,
                        m.end_byte as i64,
                        m.language,
                        m.symbol,
                        m.content_hash,
                        record.text,
                        embedding_to_bytes(&record.vector),
                    ])
                    .map_err(backend)?;
                }
            }
            tx.commit().map_err(backend)?;
            tracing::debug!("Upserted {} vectors into '{}'", records.len(), namespace);
            Ok(())
        })
        .await
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<StoreHit>, StoreError> {
        check_dimensions(self.dimensions, vector)?;

        let namespace = namespace.to_string();
        let query = vector.to_vec();
        let filter = filter.cloned().unwrap_or_default();
        self.read(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, path, start_line, end_line, start_byte, end_byte,
                            language, symbol, content_hash, text, embedding
                     FROM vectors
                     WHERE namespace = ?1
                       AND (?2 IS NULL OR language = ?2)
                       AND (?3 IS NULL OR substr(path, 1, length(?3)) = ?3)",
                )
                .map_err(backend)?;

            let rows = stmt
                .query_map(
                    params![namespace, filter.language, filter.path_prefix],
                    |row| {
                        let metadata = ChunkMetadata {
                            path: row.get(1)?,
                            start_line: row.get::<_, i64>(2)? as usize,
                            end_line: row.get::<_, i64>(3)? as usize,
                            start_byte: row.get::<_, i64>(4)? as usize,
                            end_byte: row.get::<_, i64>(5)? as usize,
                            language: row.get(6)?,
                            symbol: row.get(7)?,
                            content_hash: row.get(8)?,
                        };
                        Ok((
                            row.get::<_, String>(0)?,
                            metadata,
                            row.get::<_, String>(9)?,
                            row.get::<_, Vec<u8>>(10)?,
                        ))
                    },
                )
                .map_err(backend)?;

            let mut hits = Vec::new();
            for row in rows {
                let (id, metadata, text, blob) = row.map_err(backend)?;
                let embedding = bytes_to_embedding(&blob)?;
                hits.push(StoreHit {
                    distance: cosine_distance(&query, &embedding),
                    id,
                    metadata,
                    text,
                });
            }

            hits.sort_by(compare_hits);
            hits.truncate(k);
            Ok(hits)
        })
        .await
    }

    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let namespace = namespace.to_string();
        let ids = ids.to_vec();
        self.write(move |conn| {
            let tx = conn.transaction().map_err(backend)?;
            let mut removed = 0;
            {
                let mut stmt = tx
                    .prepare("DELETE FROM vectors WHERE namespace = ?1 AND id = ?2")
                    .map_err(backend)?;
                for id in &ids {
                    removed += stmt.execute(params![namespace, id]).map_err(backend)?;
                }
            }
            tx.commit().map_err(backend)?;
            Ok(removed)
        })
        .await
    }

    async fn count(&self, namespace: &str) -> Result<usize, StoreError> {
        let namespace = namespace.to_string();
        self.read(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM vectors WHERE namespace = ?1",
                params![namespace],
                |row| row.get::<_, i64>(0).map(|v| v as usize),
            )
            .map_err(backend)
        })
        .await
    }
}

/// Convert embedding vector to bytes for storage.
fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Convert bytes back to embedding vector.
fn bytes_to_embedding(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::Corrupt(
            "Invalid embedding bytes length".to_string(),
        ));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{exercise_store, record};
    use tempfile::TempDir;

    #[test]
    fn test_embedding_serialization() {
        let embedding = vec![1.0, 2.5, -3.7, 0.0];
        let bytes = embedding_to_bytes(&embedding);
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes_to_embedding(&bytes).unwrap(), embedding);
        assert!(bytes_to_embedding(&bytes[..3]).is_err());
    }

    #[tokio::test]
    async fn test_sqlite_store_contract() {
        let store = SqliteVectorStore::open_in_memory(3).unwrap();
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("index.db");

        {
            let store = SqliteVectorStore::open(&path, 3).unwrap();
            store
                .upsert("ns", vec![record("a", "src/a.rs", 1, vec![0.0, 0.0, 1.0])])
                .await
                .unwrap();
        }

        let store = SqliteVectorStore::open(&path, 3).unwrap();
        assert_eq!(store.count("ns").await.unwrap(), 1);
        let hits = store.query("ns", &[0.0, 0.0, 1.0], 1, None).await.unwrap();
        assert_eq!(hits[0].metadata.path, "src/a.rs");
    }

    #[test]
    fn test_rejects_different_dimensions() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.db");
        SqliteVectorStore::open(&path, 3).unwrap();

        let err = SqliteVectorStore::open(&path, 768).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Dimension {
                expected: 3,
                got: 768
            }
        ));
    }

    #[tokio::test]
    async fn test_queries_do_not_wait_for_the_writer() {
        let temp = TempDir::new().unwrap();
        let store = SqliteVectorStore::open(&temp.path().join("index.db"), 3).unwrap();
        store
            .upsert("repo-a", vec![record("a", "src/a.rs", 1, vec![0.0, 0.0, 1.0])])
            .await
            .unwrap();

        // Another repository's ingestion holding the write connection.
        let writing = store.writer.lock().unwrap();
        let hits = tokio::time::timeout(
            Duration::from_secs(5),
            store.query("repo-a", &[0.0, 0.0, 1.0], 1, None),
        )
        .await
        .expect("query blocked behind the writer")
        .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(store.count("repo-a").await.unwrap(), 1);
        drop(writing);

        store
            .upsert("repo-b", vec![record("b", "src/b.rs", 1, vec![0.0, 1.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(store.count("repo-b").await.unwrap(), 1);
    }
}
