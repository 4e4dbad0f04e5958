//! Collection-oriented vector storage
//!
//! Two interchangeable backends implement [`VectorDatabase`]:
//! - [`InMemoryVectorDb`]: brute-force cosine search over a hash map
//! - `UsearchVectorDb` (feature `vector`): an HNSW index from usearch

mod memory;
#[cfg(feature = "vector")]
mod usearch_store;

pub use memory::InMemoryVectorDb;
#[cfg(feature = "vector")]
pub use usearch_store::UsearchVectorDb;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, EngineResult};

/// Per-record metadata. `content` is lifted out into [`SearchResult::content`].
pub type VectorMetadata = Map<String, Value>;

/// One ranked hit from a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub content: String,
    pub score: f32,
    pub metadata: VectorMetadata,
}

#[async_trait]
pub trait VectorDatabase: Send + Sync {
    async fn connect(&self) -> EngineResult<()>;

    async fn disconnect(&self) -> EngineResult<()>;

    /// Create a collection. Creating one that already exists is a no-op.
    async fn create_collection(&self, name: &str, dimensions: usize) -> EngineResult<()>;

    /// Drop a collection. Dropping a missing collection is a no-op.
    async fn drop_collection(&self, name: &str) -> EngineResult<()>;

    async fn has_collection(&self, name: &str) -> EngineResult<bool>;

    /// Number of records stored in a collection.
    async fn collection_size(&self, name: &str) -> EngineResult<usize>;

    /// Insert records; `ids`, `vectors` and `metadata` must have equal
    /// length. Re-inserting an id replaces its record.
    async fn insert_vectors(
        &self,
        collection: &str,
        ids: &[String],
        vectors: &[Vec<f32>],
        metadata: &[VectorMetadata],
    ) -> EngineResult<()>;

    /// Top-`top_k` records by descending similarity; `top_k == 0` returns
    /// every record.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> EngineResult<Vec<SearchResult>>;

    async fn delete_vectors(&self, collection: &str, ids: &[String]) -> EngineResult<()>;
}

/// Cosine similarity over the common prefix of `a` and `b`; 0 when either
/// side has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for i in 0..n {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub(crate) fn check_insert_lengths(
    ids: &[String],
    vectors: &[Vec<f32>],
    metadata: &[VectorMetadata],
) -> EngineResult<()> {
    if ids.len() != vectors.len() || ids.len() != metadata.len() {
        return Err(EngineError::InvalidInput(
            "ids, vectors, and metadata must have the same length".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn check_dimensions(expected: usize, actual: usize) -> EngineResult<()> {
    if expected != actual {
        return Err(EngineError::VectorSearch(format!(
            "vector dimension mismatch: expected {}, got {}",
            expected, actual
        )));
    }
    Ok(())
}

/// Copy `metadata` without its `content` entry and return the content
/// separately. The caller's map is left untouched.
pub(crate) fn split_content(metadata: &VectorMetadata) -> (String, VectorMetadata) {
    let mut rest = VectorMetadata::new();
    let mut content = String::new();
    for (key, value) in metadata {
        if key == "content" {
            content = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
        } else {
            rest.insert(key.clone(), value.clone());
        }
    }
    (content, rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_split_content_leaves_input_intact() {
        let metadata = json!({"content": "hello", "source": "a.txt"})
            .as_object()
            .cloned()
            .unwrap();
        let (content, rest) = split_content(&metadata);
        assert_eq!(content, "hello");
        assert!(!rest.contains_key("content"));
        assert_eq!(rest["source"], "a.txt");
        assert!(metadata.contains_key("content"));
    }
}
