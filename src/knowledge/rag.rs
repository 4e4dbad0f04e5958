//! Retrieval-augmented answering

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::retriever::{QueryRequest, Retriever, DEFAULT_TOP_K};
use crate::agent::Agent;
use crate::context::RequestContext;
use crate::error::{EngineError, EngineResult};
use crate::tools::{ParamSpec, ParamType, Tool, ToolArgs, ToolCategory, ToolSchema};
use crate::vector::SearchResult;

pub const KNOWLEDGE_SEARCH_TOOL: &str = "knowledge_search";

/// Build the grounded prompt: numbered excerpts, the question, and an
/// instruction not to invent facts.
pub fn generate_prompt_from_results(results: &[SearchResult], query: &str) -> String {
    let mut prompt = String::from("以下是与问题相关的信息：\n\n");
    for (i, result) in results.iter().enumerate() {
        prompt.push_str(&format!("信息片段 {}：\n{}\n\n", i + 1, result.content));
    }
    prompt.push_str(&format!("用户问题：{}\n\n", query));
    prompt.push_str("请根据以上信息回答用户问题。如果提供的信息不足以回答问题，请说明信息不足，不要编造信息。");
    prompt
}

/// Answer `query` with context from one knowledge base. With no hits the
/// raw query goes to the agent unchanged.
pub async fn apply_rag(
    ctx: &RequestContext,
    retriever: &dyn Retriever,
    knowledge_base_id: &str,
    query: &str,
    agent: &Agent,
) -> EngineResult<String> {
    let response = retriever
        .retrieve(
            ctx,
            QueryRequest {
                knowledge_base_id: knowledge_base_id.to_string(),
                query: query.to_string(),
                top_k: DEFAULT_TOP_K,
            },
        )
        .await?;

    if response.results.is_empty() {
        debug!(kb = %knowledge_base_id, "No relevant chunks, asking without context");
        return agent.chat(ctx, query).await;
    }
    let prompt = generate_prompt_from_results(&response.results, query);
    agent.chat(ctx, &prompt).await
}

#[derive(Debug, Serialize)]
struct KnowledgeHit {
    content: String,
    source: String,
    score: f32,
}

#[derive(Debug, Serialize)]
struct KnowledgeSearchOutput {
    query: String,
    results: Vec<KnowledgeHit>,
}

async fn knowledge_search(
    retriever: Arc<dyn Retriever>,
    ctx: RequestContext,
    args: ToolArgs,
) -> EngineResult<KnowledgeSearchOutput> {
    let request = QueryRequest {
        knowledge_base_id: args.str("knowledge_base_id")?.to_string(),
        query: args.str("query")?.to_string(),
        top_k: usize::try_from(args.i64("top_k")?)
            .map_err(|_| EngineError::InvalidArguments("top_k must not be negative".to_string()))?,
    };
    let response = retriever.retrieve(&ctx, request).await?;

    let results = response
        .results
        .into_iter()
        .map(|r| KnowledgeHit {
            source: r
                .metadata
                .get("source")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .unwrap_or("unknown")
                .to_string(),
            content: r.content,
            score: r.score,
        })
        .collect();
    Ok(KnowledgeSearchOutput {
        query: response.query,
        results,
    })
}

/// The `knowledge_search` tool backed by `retriever`.
pub fn knowledge_search_tool(retriever: Arc<dyn Retriever>) -> Tool {
    let schema = ToolSchema::new()
        .param(ParamSpec::required(
            "knowledge_base_id",
            ParamType::String,
            "ID of the knowledge base to search",
        ))
        .param(ParamSpec::required("query", ParamType::String, "Search query"))
        .param(
            ParamSpec::optional("top_k", ParamType::Integer, "Number of results to return")
                .with_default(serde_json::json!(DEFAULT_TOP_K)),
        );
    Tool::new(
        KNOWLEDGE_SEARCH_TOOL,
        "Search a knowledge base for information relevant to a query",
        schema,
        move |ctx, args| knowledge_search(Arc::clone(&retriever), ctx, args),
    )
    .with_category(ToolCategory::Knowledge)
    .builtin()
}
