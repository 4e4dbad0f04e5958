use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::manager::KnowledgeBaseManager;
use crate::context::RequestContext;
use crate::error::EngineResult;
use crate::vector::SearchResult;

pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub knowledge_base_id: String,
    pub query: String,
    /// 0 selects the retriever's default
    #[serde(default)]
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
}

/// Finds the chunks most relevant to a query.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, ctx: &RequestContext, request: QueryRequest)
        -> EngineResult<QueryResponse>;
}

/// Embeds the query with the knowledge base's model and searches its
/// vector collection.
pub struct VectorRetriever {
    knowledge: Arc<KnowledgeBaseManager>,
    default_top_k: usize,
}

impl VectorRetriever {
    pub fn new(knowledge: Arc<KnowledgeBaseManager>) -> Self {
        Self::with_default_top_k(knowledge, DEFAULT_TOP_K)
    }

    pub fn with_default_top_k(knowledge: Arc<KnowledgeBaseManager>, default_top_k: usize) -> Self {
        Self {
            knowledge,
            default_top_k: if default_top_k == 0 { DEFAULT_TOP_K } else { default_top_k },
        }
    }
}

#[async_trait]
impl Retriever for VectorRetriever {
    async fn retrieve(
        &self,
        ctx: &RequestContext,
        request: QueryRequest,
    ) -> EngineResult<QueryResponse> {
        let kb = self.knowledge.get_knowledge_base(&request.knowledge_base_id)?;
        let top_k = if request.top_k == 0 {
            self.default_top_k
        } else {
            request.top_k
        };

        let vector = self
            .knowledge
            .embeddings()
            .embed_one(ctx, &kb.embedding_model, &request.query)
            .await?;
        let results = ctx
            .run(self.knowledge.vector_db().search(&kb.id, &vector, top_k))
            .await?;
        debug!(kb = %kb.id, top_k, hits = results.len(), "Retrieved chunks");

        Ok(QueryResponse {
            query: request.query,
            results,
        })
    }
}
