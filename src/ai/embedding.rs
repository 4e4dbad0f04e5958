use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use fastembed::{EmbeddingModel as FastEmbedKind, InitOptions, TextEmbedding};

use super::EmbeddingModel;
use crate::context::RequestContext;
use crate::error::{EngineError, EngineResult};

/// Local ONNX embedding model backed by fastembed.
///
/// Models are downloaded on first use and cached by fastembed.
pub struct FastEmbedModel {
    name: String,
    dimensions: usize,
    model: Arc<TextEmbedding>,
}

impl FastEmbedModel {
    /// Load a model by its common name, e.g. `all-MiniLM-L6-v2` or
    /// `BAAI/bge-base-en-v1.5`.
    pub fn new(name: &str) -> EngineResult<Self> {
        let kind = match name {
            "all-MiniLM-L6-v2" => FastEmbedKind::AllMiniLML6V2,
            "BAAI/bge-small-en-v1.5" => FastEmbedKind::BGESmallENV15,
            "BAAI/bge-base-en-v1.5" => FastEmbedKind::BGEBaseENV15,
            "BAAI/bge-large-en-v1.5" => FastEmbedKind::BGELargeENV15,
            other => {
                return Err(EngineError::Configuration(format!(
                    "Unsupported fastembed model: {}",
                    other
                )))
            }
        };
        Self::with_kind(name, kind)
    }

    pub fn with_kind(name: &str, kind: FastEmbedKind) -> EngineResult<Self> {
        let model = TextEmbedding::try_new(InitOptions::new(kind))
            .map_err(|e| anyhow!("Failed to create TextEmbedding: {}", e))?;

        // fastembed does not expose the output width directly for every
        // model, so probe it once.
        let probe = model
            .embed(vec!["dimension probe"], None)
            .map_err(|e| anyhow!("Failed to probe embedding dimensions: {}", e))?;
        let dimensions = probe
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EngineError::Embedding("empty probe embedding".to_string()))?;

        tracing::info!(model = %name, dimensions, "Initialized fastembed model");
        Ok(Self {
            name: name.to_string(),
            dimensions,
            model: Arc::new(model),
        })
    }
}

#[async_trait]
impl EmbeddingModel for FastEmbedModel {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, ctx: &RequestContext, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        ctx.check()?;
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        // ONNX inference is CPU-bound.
        tokio::task::spawn_blocking(move || model.embed(texts, None))
            .await
            .map_err(|e| EngineError::Embedding(format!("embedding task failed: {}", e)))?
            .map_err(|e| EngineError::Embedding(format!("Failed to generate embeddings: {}", e)))
    }
}
