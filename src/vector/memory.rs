use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{
    check_dimensions, check_insert_lengths, cosine_similarity, split_content, SearchResult,
    VectorDatabase, VectorMetadata,
};
use crate::error::{EngineError, EngineResult};

struct Record {
    vector: Vec<f32>,
    content: String,
    metadata: VectorMetadata,
}

struct Collection {
    dimensions: usize,
    records: HashMap<String, Record>,
}

/// Brute-force in-process vector store.
///
/// Searches score every record with cosine similarity. Insertions take the
/// write lock, searches share the read lock.
#[derive(Default)]
pub struct InMemoryVectorDb {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorDb {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorDatabase for InMemoryVectorDb {
    async fn connect(&self) -> EngineResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> EngineResult<()> {
        Ok(())
    }

    async fn create_collection(&self, name: &str, dimensions: usize) -> EngineResult<()> {
        if dimensions == 0 {
            return Err(EngineError::InvalidInput(
                "collection dimensions must be greater than zero".to_string(),
            ));
        }
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Ok(());
        }
        collections.insert(
            name.to_string(),
            Collection {
                dimensions,
                records: HashMap::new(),
            },
        );
        tracing::info!(collection = %name, dimensions, "Created in-memory collection");
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> EngineResult<()> {
        if self.collections.write().remove(name).is_some() {
            tracing::info!(collection = %name, "Dropped in-memory collection");
        }
        Ok(())
    }

    async fn has_collection(&self, name: &str) -> EngineResult<bool> {
        Ok(self.collections.read().contains_key(name))
    }

    async fn collection_size(&self, name: &str) -> EngineResult<usize> {
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
        check_insert_lengths(ids, vectors, metadata)?;

        let mut collections = self.collections.write();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| EngineError::CollectionNotFound(collection.to_string()))?;
        // Validate the whole batch before touching the map.
        for vector in vectors {
            check_dimensions(coll.dimensions, vector.len())?;
        }

        for ((id, vector), meta) in ids.iter().zip(vectors).zip(metadata) {
            let (content, metadata) = split_content(meta);
            coll.records.insert(
                id.clone(),
                Record {
                    vector: vector.clone(),
                    content,
                    metadata,
                },
            );
        }
        tracing::debug!(collection = %collection, count = ids.len(), "Inserted vectors");
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> EngineResult<Vec<SearchResult>> {
        let collections = self.collections.read();
        let coll = collections
            .get(collection)
            .ok_or_else(|| EngineError::CollectionNotFound(collection.to_string()))?;
        check_dimensions(coll.dimensions, vector.len())?;

        let mut results: Vec<SearchResult> = coll
            .records
            .iter()
            .map(|(id, record)| SearchResult {
                chunk_id: id.clone(),
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
        if top_k > 0 {
            results.truncate(top_k);
        }
        Ok(results)
    }

    async fn delete_vectors(&self, collection: &str, ids: &[String]) -> EngineResult<()> {
        let mut collections = self.collections.write();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| EngineError::CollectionNotFound(collection.to_string()))?;
        for id in ids {
            coll.records.remove(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(content: &str) -> VectorMetadata {
        json!({"content": content, "source": "test"})
            .as_object()
            .cloned()
            .unwrap()
    }

    async fn seeded() -> InMemoryVectorDb {
        let db = InMemoryVectorDb::new();
        db.create_collection("kb", 3).await.unwrap();
        db.insert_vectors(
            "kb",
            &["a".into(), "b".into(), "c".into()],
            &[vec![1.0, 0.0, 0.0], vec![0.7, 0.7, 0.0], vec![0.0, 0.0, 1.0]],
            &[meta("first"), meta("second"), meta("third")],
        )
        .await
        .unwrap();
        db
    }

    #[tokio::test]
    async fn test_search_ranks_by_descending_score() {
        let db = seeded().await;
        let results = db.search("kb", &[1.0, 0.1, 0.0], 0).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(results[0].content, "first");
        assert!(!results[0].metadata.contains_key("content"));

        let again = db.search("kb", &[1.0, 0.1, 0.0], 0).await.unwrap();
        assert_eq!(results, again);
    }

    #[tokio::test]
    async fn test_search_truncates_to_top_k() {
        let db = seeded().await;
        let results = db.search("kb", &[0.0, 0.0, 1.0], 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "c");
    }

    #[tokio::test]
    async fn test_create_and_drop_are_idempotent() {
        let db = seeded().await;
        db.create_collection("kb", 3).await.unwrap();
        assert_eq!(db.collection_size("kb").await.unwrap(), 3);

        db.drop_collection("kb").await.unwrap();
        db.drop_collection("kb").await.unwrap();
        assert!(!db.has_collection("kb").await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_validation() {
        let db = seeded().await;
        let err = db
            .insert_vectors("kb", &["x".into()], &[], &[meta("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));

        let err = db
            .insert_vectors("kb", &["x".into()], &[vec![1.0]], &[meta("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::VectorSearch(_)));

        let err = db
            .insert_vectors("missing", &["x".into()], &[vec![1.0, 0.0, 0.0]], &[meta("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CollectionNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_and_replace() {
        let db = seeded().await;
        db.delete_vectors("kb", &["a".into()]).await.unwrap();
        assert_eq!(db.collection_size("kb").await.unwrap(), 2);

        db.insert_vectors("kb", &["b".into()], &[vec![0.0, 1.0, 0.0]], &[meta("updated")])
            .await
            .unwrap();
        assert_eq!(db.collection_size("kb").await.unwrap(), 2);
        let results = db.search("kb", &[0.0, 1.0, 0.0], 1).await.unwrap();
        assert_eq!(results[0].content, "updated");
    }
}
