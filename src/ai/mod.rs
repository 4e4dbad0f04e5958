//! Text embedding models and the named model registry

mod hashing;
#[cfg(feature = "embedding")]
mod embedding;

pub use hashing::HashingEmbedding;
#[cfg(feature = "embedding")]
pub use embedding::FastEmbedModel;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::error::{EngineError, EngineResult};

/// A model that turns text into fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Name the model is registered under.
    fn model_name(&self) -> &str;

    /// Length of every vector this model produces.
    fn dimensions(&self) -> usize;

    /// Embed a batch of texts, one vector per text, in order.
    async fn embed(&self, ctx: &RequestContext, texts: &[String]) -> EngineResult<Vec<Vec<f32>>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub texts: Vec<String>,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub embeddings: Vec<Vec<f32>>,
    pub model: String,
    pub dimensions: usize,
}

/// Registry of embedding models keyed by model name.
#[derive(Default)]
pub struct EmbeddingManager {
    models: RwLock<HashMap<String, Arc<dyn EmbeddingModel>>>,
}

impl EmbeddingManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model under its own name, replacing any previous model
    /// with that name.
    pub fn register_model(&self, model: Arc<dyn EmbeddingModel>) {
        let name = model.model_name().to_string();
        tracing::info!(model = %name, dimensions = model.dimensions(), "Registered embedding model");
        self.models.write().insert(name, model);
    }

    pub fn get_model(&self, name: &str) -> EngineResult<Arc<dyn EmbeddingModel>> {
        self.models
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownEmbeddingModel(name.to_string()))
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.models.read().contains_key(name)
    }

    /// Registered model names, sorted.
    pub fn list_models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn embed(
        &self,
        ctx: &RequestContext,
        request: EmbeddingRequest,
    ) -> EngineResult<EmbeddingResponse> {
        if request.texts.is_empty() {
            return Err(EngineError::InvalidInput(
                "no texts provided for embedding".to_string(),
            ));
        }
        let model = self.get_model(&request.model)?;
        let embeddings = ctx.run(model.embed(ctx, &request.texts)).await?;
        if embeddings.len() != request.texts.len() {
            return Err(EngineError::Embedding(format!(
                "model '{}' returned {} vectors for {} texts",
                request.model,
                embeddings.len(),
                request.texts.len()
            )));
        }
        tracing::debug!(model = %request.model, count = embeddings.len(), "Generated embeddings");
        Ok(EmbeddingResponse {
            embeddings,
            model: request.model,
            dimensions: model.dimensions(),
        })
    }

    /// Embed one text with the named model.
    pub async fn embed_one(
        &self,
        ctx: &RequestContext,
        model: &str,
        text: &str,
    ) -> EngineResult<Vec<f32>> {
        let response = self
            .embed(
                ctx,
                EmbeddingRequest {
                    texts: vec![text.to_string()],
                    model: model.to_string(),
                },
            )
            .await?;
        response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Embedding("no embedding returned".to_string()))
    }
}
