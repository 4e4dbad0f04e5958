use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use super::{
    check_dimensions, check_insert_lengths, cosine_similarity, split_content, SearchResult,
    VectorDatabase, VectorMetadata,
};
use crate::error::{EngineError, EngineResult};

const INITIAL_CAPACITY: usize = 64;

struct Record {
    id: String,
    vector: Vec<f32>,
    content: String,
    metadata: VectorMetadata,
}

struct IndexedCollection {
    index: Index,
    dimensions: usize,
    next_key: u64,
    keys: HashMap<String, u64>,
    records: HashMap<u64, Record>,
}

impl IndexedCollection {
    fn new(dimensions: usize) -> EngineResult<Self> {
        let options = IndexOptions {
            dimensions,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            ..Default::default()
        };
        let index = Index::new(&options).map_err(usearch_err)?;
        index.reserve(INITIAL_CAPACITY).map_err(usearch_err)?;
        Ok(Self {
            index,
            dimensions,
            next_key: 1,
            keys: HashMap::new(),
            records: HashMap::new(),
        })
    }

    fn remove(&mut self, id: &str) -> EngineResult<()> {
        if let Some(key) = self.keys.remove(id) {
            self.index.remove(key).map_err(usearch_err)?;
            self.records.remove(&key);
        }
        Ok(())
    }

    fn ensure_capacity(&self, additional: usize) -> EngineResult<()> {
        let needed = self.index.size() + additional;
        if needed > self.index.capacity() {
            let target = needed.max(self.index.capacity() * 2);
            self.index.reserve(target).map_err(usearch_err)?;
        }
        Ok(())
    }
}

fn usearch_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::VectorSearch(e.to_string())
}

/// Vector store backed by usearch HNSW indexes, one per collection.
///
/// Index keys are `u64`, so string ids are mapped to sequential keys and
/// content/metadata live in side tables next to the index. Candidates
/// returned by the index are re-scored with exact cosine similarity so
/// scores match [`super::InMemoryVectorDb`].
pub struct UsearchVectorDb {
    connected: AtomicBool,
    collections: RwLock<HashMap<String, IndexedCollection>>,
}

impl Default for UsearchVectorDb {
    fn default() -> Self {
        Self::new()
    }
}

impl UsearchVectorDb {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn ensure_connected(&self) -> EngineResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::VectorSearch("not connected".to_string()))
        }
    }
}

#[async_trait]
impl VectorDatabase for UsearchVectorDb {
    async fn connect(&self) -> EngineResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!("Vector index store connected");
        Ok(())
    }

    async fn disconnect(&self) -> EngineResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn create_collection(&self, name: &str, dimensions: usize) -> EngineResult<()> {
        self.ensure_connected()?;
        if dimensions == 0 {
            return Err(EngineError::InvalidInput(
                "collection dimensions must be greater than zero".to_string(),
            ));
        }
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Ok(());
        }
        collections.insert(name.to_string(), IndexedCollection::new(dimensions)?);
        tracing::info!(collection = %name, dimensions, "Created and loaded HNSW collection");
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> EngineResult<()> {
        self.ensure_connected()?;
        if self.collections.write().remove(name).is_some() {
            tracing::info!(collection = %name, "Dropped HNSW collection");
        }
        Ok(())
    }

    async fn has_collection(&self, name: &str) -> EngineResult<bool> {
        self.ensure_connected()?;
        Ok(self.collections.read().contains_key(name))
    }

    async fn collection_size(&self, name: &str) -> EngineResult<usize> {
        self.ensure_connected()?;
        self.collections
            .read()
            .get(name)
            .map(|c| c.records.len())
            .ok_or_else(|| EngineError::CollectionNotFound(name.to_string()))
    }

    async fn insert_vectors(
        &self,
        collection: &str,
        ids: &[String],
        vectors: &[Vec<f32>],
        metadata: &[VectorMetadata],
    ) -> EngineResult<()> {
        self.ensure_connected()?;
        check_insert_lengths(ids, vectors, metadata)?;

        let mut collections = self.collections.write();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| EngineError::CollectionNotFound(collection.to_string()))?;
        for vector in vectors {
            check_dimensions(coll.dimensions, vector.len())?;
        }
        coll.ensure_capacity(ids.len())?;

        for ((id, vector), meta) in ids.iter().zip(vectors).zip(metadata) {
            coll.remove(id)?;
            let key = coll.next_key;
            coll.next_key += 1;
            coll.index.add(key, vector.as_slice()).map_err(usearch_err)?;

            let (content, metadata) = split_content(meta);
            coll.keys.insert(id.clone(), key);
            coll.records.insert(
                key,
                Record {
                    id: id.clone(),
                    vector: vector.clone(),
                    content,
                    metadata,
                },
            );
        }
        tracing::debug!(collection = %collection, count = ids.len(), "Inserted vectors into index");
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> EngineResult<Vec<SearchResult>> {
        self.ensure_connected()?;
        let collections = self.collections.read();
        let coll = collections
            .get(collection)
            .ok_or_else(|| EngineError::CollectionNotFound(collection.to_string()))?;
        check_dimensions(coll.dimensions, vector.len())?;

        let size = coll.index.size();
        if size == 0 {
            return Ok(Vec::new());
        }
        let count = if top_k == 0 { size } else { top_k.min(size) };
        let matches = coll.index.search(vector, count).map_err(usearch_err)?;

        let mut results: Vec<SearchResult> = matches
            .keys
            .iter()
            .filter_map(|key| coll.records.get(key))
            .map(|record| SearchResult {
                chunk_id: record.id.clone(),
                content: record.content.clone(),
                score: cosine_similarity(vector, &record.vector),
                metadata: record.metadata.clone(),
            })
            .collect();
        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        Ok(results)
    }

    async fn delete_vectors(&self, collection: &str, ids: &[String]) -> EngineResult<()> {
        self.ensure_connected()?;
        let mut collections = self.collections.write();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| EngineError::CollectionNotFound(collection.to_string()))?;
        for id in ids {
            coll.remove(id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(content: &str) -> VectorMetadata {
        json!({"content": content}).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_requires_connect() {
        let db = UsearchVectorDb::new();
        let err = db.create_collection("kb", 4).await.unwrap_err();
        assert_eq!(err.to_string(), "Vector search error: not connected");
    }

    #[tokio::test]
    async fn test_insert_search_delete() {
        let db = UsearchVectorDb::new();
        db.connect().await.unwrap();
        db.create_collection("kb", 4).await.unwrap();
        db.create_collection("kb", 4).await.unwrap();

        db.insert_vectors(
            "kb",
            &["x".into(), "y".into()],
            &[vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 1.0, 0.0, 0.0]],
            &[meta("ex"), meta("why")],
        )
        .await
        .unwrap();
        assert_eq!(db.collection_size("kb").await.unwrap(), 2);

        let results = db.search("kb", &[0.9, 0.1, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(results[0].chunk_id, "x");
        assert_eq!(results[0].content, "ex");
        assert!(results[0].score > results[1].score);

        db.delete_vectors("kb", &["x".into()]).await.unwrap();
        let results = db.search("kb", &[0.9, 0.1, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "y");
    }

    #[tokio::test]
    async fn test_reinsert_replaces_record() {
        let db = UsearchVectorDb::new();
        db.connect().await.unwrap();
        db.create_collection("kb", 2).await.unwrap();
        db.insert_vectors("kb", &["a".into()], &[vec![1.0, 0.0]], &[meta("old")])
            .await
            .unwrap();
        db.insert_vectors("kb", &["a".into()], &[vec![0.0, 1.0]], &[meta("new")])
            .await
            .unwrap();
        assert_eq!(db.collection_size("kb").await.unwrap(), 1);
        let results = db.search("kb", &[0.0, 1.0], 1).await.unwrap();
        assert_eq!(results[0].content, "new");
    }
}
