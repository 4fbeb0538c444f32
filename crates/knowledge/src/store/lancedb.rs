//! LanceDB-backed vector store (cargo feature `lancedb`).
//!
//! All namespaces share one table; every query and delete is scoped by a
//! `namespace` predicate.

use super::{
    check_dimensions, compare_hits, ChunkMetadata, SearchFilter, StoreError, StoreHit,
    VectorRecord, VectorStore,
};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
    UInt64Array,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{DistanceType, Table};
use std::path::Path;
use std::sync::Arc;

const TABLE_NAME: &str = "chunks";

pub struct LanceDbVectorStore {
    table: Table,
    dimensions: usize,
}

fn backend<E: std::fmt::Display>(context: &str) -> impl FnOnce(E) -> StoreError + '_ {
    move |e| StoreError::Backend(format!("{}: {}", context, e))
}

/// Quote a value for a Lance SQL predicate.
fn quoted(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl LanceDbVectorStore {
    /// Create or open a LanceDB store in the `db_path` directory.
    pub async fn open(db_path: &Path, dimensions: usize) -> Result<Self, StoreError> {
        std::fs::create_dir_all(db_path).map_err(backend("Failed to create index directory"))?;

        let uri = db_path.to_string_lossy().to_string();
        let conn = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(backend("Failed to connect to LanceDB"))?;

        let table_names = conn
            .table_names()
            .execute()
            .await
            .map_err(backend("Failed to list tables"))?;

        let table = if table_names.iter().any(|name| name == TABLE_NAME) {
            conn.open_table(TABLE_NAME)
                .execute()
                .await
                .map_err(backend("Failed to open table"))?
        } else {
            let schema = Self::schema(dimensions);
            let empty_batch = RecordBatch::new_empty(schema.clone());
            conn.create_table(
                TABLE_NAME,
                RecordBatchIterator::new(vec![Ok(empty_batch)], schema),
            )
            .execute()
            .await
            .map_err(backend("Failed to create table"))?
        };

        tracing::debug!("Opened LanceDB vector store at {:?}", db_path);
        Ok(Self { table, dimensions })
    }

    fn schema(dimensions: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("namespace", DataType::Utf8, false),
            Field::new("id", DataType::Utf8, false),
            Field::new("path", DataType::Utf8, false),
            Field::new("start_line", DataType::UInt64, false),
            Field::new("end_line", DataType::UInt64, false),
            Field::new("start_byte", DataType::UInt64, false),
            Field::new("end_byte", DataType::UInt64, false),
            Field::new("language", DataType::Utf8, false),
            Field::new("symbol", DataType::Utf8, true),
            Field::new("content_hash", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimensions as i32,
                ),
                false,
            ),
        ]))
    }

    fn records_to_batch(
        &self,
        namespace: &str,
        records: &[VectorRecord],
    ) -> Result<RecordBatch, StoreError> {
        let u64s = |f: fn(&ChunkMetadata) -> usize| {
            UInt64Array::from(
                records
                    .iter()
                    .map(|r| f(&r.metadata) as u64)
                    .collect::<Vec<_>>(),
            )
        };
        let strings = |f: fn(&VectorRecord) -> &str| {
            StringArray::from(records.iter().map(f).collect::<Vec<_>>())
        };

        let flat: Vec<f32> = records.iter().flat_map(|r| r.vector.iter().copied()).collect();
        let vectors = FixedSizeListArray::new(
            Arc::new(Field::new("item", DataType::Float32, true)),
            self.dimensions as i32,
            Arc::new(Float32Array::from(flat)),
            None,
        );

        RecordBatch::try_new(
            Self::schema(self.dimensions),
            vec![
                Arc::new(StringArray::from(vec![namespace; records.len()])),
                Arc::new(strings(|r| &r.id)),
                Arc::new(strings(|r| &r.metadata.path)),
                Arc::new(u64s(|m| m.start_line)),
                Arc::new(u64s(|m| m.end_line)),
                Arc::new(u64s(|m| m.start_byte)),
                Arc::new(u64s(|m| m.end_byte)),
                Arc::new(strings(|r| &r.metadata.language)),
                Arc::new(StringArray::from(
                    records
                        .iter()
                        .map(|r| r.metadata.symbol.as_deref())
                        .collect::<Vec<_>>(),
                )),
                Arc::new(strings(|r| &r.metadata.content_hash)),
                Arc::new(strings(|r| &r.text)),
                Arc::new(vectors),
            ],
        )
        .map_err(backend("Failed to create RecordBatch"))
    }

    fn batch_to_hits(batch: &RecordBatch) -> Result<Vec<StoreHit>, StoreError> {
        let strings = |name: &str| -> Result<&StringArray, StoreError> {
            batch
                .column_by_name(name)
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| StoreError::Corrupt(format!("Invalid {} column", name)))
        };
        let u64s = |name: &str| -> Result<&UInt64Array, StoreError> {
            batch
                .column_by_name(name)
                .and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
                .ok_or_else(|| StoreError::Corrupt(format!("Invalid {} column", name)))
        };
        let distances = batch
            .column_by_name("_distance")
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
            .ok_or_else(|| StoreError::Corrupt("Missing _distance column".to_string()))?;

        let (ids, paths, languages, symbols, hashes, texts) = (
            strings("id")?,
            strings("path")?,
            strings("language")?,
            strings("symbol")?,
            strings("content_hash")?,
            strings("text")?,
        );
        let (start_lines, end_lines, start_bytes, end_bytes) = (
            u64s("start_line")?,
            u64s("end_line")?,
            u64s("start_byte")?,
            u64s("end_byte")?,
        );

        Ok((0..batch.num_rows())
            .map(|i| StoreHit {
                id: ids.value(i).to_string(),
                distance: distances.value(i),
                metadata: ChunkMetadata {
                    path: paths.value(i).to_string(),
                    start_line: start_lines.value(i) as usize,
                    end_line: end_lines.value(i) as usize,
                    start_byte: start_bytes.value(i) as usize,
                    end_byte: end_bytes.value(i) as usize,
                    language: languages.value(i).to_string(),
                    symbol: (!symbols.is_null(i)).then(|| symbols.value(i).to_string()),
                    content_hash: hashes.value(i).to_string(),
                },
                text: texts.value(i).to_string(),
            })
            .collect())
    }

    fn id_predicate(namespace: &str, ids: &[String]) -> String {
        let list = ids.iter().map(|id| quoted(id)).collect::<Vec<_>>().join(", ");
        format!("namespace = {} AND id IN ({})", quoted(namespace), list)
    }
}

#[async_trait]
impl VectorStore for LanceDbVectorStore {
    fn backend_name(&self) -> &str {
        "lancedb"
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

        // Lance appends, so replace by deleting existing ids first.
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        self.table
            .delete(&Self::id_predicate(namespace, &ids))
            .await
            .map_err(backend("Failed to replace rows"))?;

        let batch = self.records_to_batch(namespace, &records)?;
        let schema = batch.schema();
        self.table
            .add(RecordBatchIterator::new(vec![Ok(batch)], schema))
            .execute()
            .await
            .map_err(backend("Failed to add rows"))?;

        tracing::debug!("Upserted {} vectors into '{}'", records.len(), namespace);
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<StoreHit>, StoreError> {
        check_dimensions(self.dimensions, vector)?;

        let mut predicate = format!("namespace = {}", quoted(namespace));
        if let Some(filter) = filter {
            if let Some(language) = &filter.language {
                predicate.push_str(&format!(" AND language = {}", quoted(language)));
            }
            if let Some(prefix) = &filter.path_prefix {
                predicate.push_str(&format!(" AND starts_with(path, {})", quoted(prefix)));
            }
        }

        let batches = self
            .table
            .query()
            .nearest_to(vector.to_vec())
            .map_err(backend("Failed to create query"))?
            .distance_type(DistanceType::Cosine)
            .only_if(predicate)
            .limit(k)
            .execute()
            .await
            .map_err(backend("Failed to execute search"))?
            .try_collect::<Vec<_>>()
            .await
            .map_err(backend("Failed to collect results"))?;

        let mut hits = Vec::new();
        for batch in &batches {
            hits.extend(Self::batch_to_hits(batch)?);
        }
        hits.sort_by(compare_hits);
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let predicate = Self::id_predicate(namespace, ids);
        let existing = self
            .table
            .count_rows(Some(predicate.clone()))
            .await
            .map_err(backend("Failed to count rows"))?;
        self.table
            .delete(&predicate)
            .await
            .map_err(backend("Failed to delete rows"))?;
        Ok(existing)
    }

    async fn count(&self, namespace: &str) -> Result<usize, StoreError> {
        self.table
            .count_rows(Some(format!("namespace = {}", quoted(namespace))))
            .await
            .map_err(backend("Failed to count rows"))
    }
}
