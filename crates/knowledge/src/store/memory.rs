//! Process-local vector store.

use super::{
    check_dimensions, compare_hits, cosine_distance, SearchFilter, StoreError, StoreHit,
    VectorRecord, VectorStore,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

type Namespace = HashMap<String, VectorRecord>;

/// Brute-force store kept entirely in memory. Contents are lost on drop.
pub struct InMemoryVectorStore {
    dimensions: usize,
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl InMemoryVectorStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            namespaces: RwLock::new(HashMap::new()),
        }
    }
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorStore")
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Backend(format!("lock poisoned: {}", e))
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn backend_name(&self) -> &str {
        "memory"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<(), StoreError> {
        for record in &records {
            check_dimensions(self.dimensions, &record.vector)?;
        }

        let mut namespaces = self.namespaces.write().map_err(poisoned)?;
        let entries = namespaces.entry(namespace.to_string()).or_default();
        for record in records {
            entries.insert(record.id.clone(), record);
        }
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

        let namespaces = self.namespaces.read().map_err(poisoned)?;
        let Some(entries) = namespaces.get(namespace) else {
            return Ok(vec![]);
        };

        let mut hits: Vec<StoreHit> = entries
            .values()
            .filter(|r| filter.map_or(true, |f| f.matches(&r.metadata)))
            .map(|r| StoreHit {
                id: r.id.clone(),
                distance: cosine_distance(vector, &r.vector),
                metadata: r.metadata.clone(),
                text: r.text.clone(),
            })
            .collect();

        hits.sort_by(compare_hits);
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<usize, StoreError> {
        let mut namespaces = self.namespaces.write().map_err(poisoned)?;
        let Some(entries) = namespaces.get_mut(namespace) else {
            return Ok(0);
        };
        Ok(ids.iter().filter(|id| entries.remove(*id).is_some()).count())
    }

    async fn count(&self, namespace: &str) -> Result<usize, StoreError> {
        let namespaces = self.namespaces.read().map_err(poisoned)?;
        Ok(namespaces.get(namespace).map_or(0, HashMap::len))
    }
}
