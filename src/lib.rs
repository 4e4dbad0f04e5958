//! agent-engine: tool-using LLM agents with retrieval-augmented generation.
//!
//! This library provides:
//! - Agents that run a bounded tool-call loop against a pluggable provider
//! - Streaming turns with lifecycle events
//! - Conversation logs with feedback, and template-based agent construction
//! - Knowledge bases: chunking, embedding, vector search and RAG prompting
//! - A typed tool registry with builtin tools
//!
//! # Example
//!
//! ```rust,ignore
//! use agent_engine::{Config, Engine, RequestContext};
//! use agent_engine::agent::AgentSpec;
//! use agent_engine::knowledge::{apply_rag, DocumentType};
//!
//! let engine = Engine::new(Config::default()).await?;
//! let ctx = RequestContext::new();
//!
//! let kb = engine.knowledge().create_knowledge_base("docs", "", "hashing").await?;
//! engine.knowledge()
//!     .add_text_document(&ctx, &kb.id, "sky.txt", "The sky is blue.", DocumentType::Text)
//!     .await?;
//!
//! let agent = engine.factory().create_agent(
//!     "default_conversation",
//!     &AgentSpec::new("helper", "echo-1", "echo"),
//!     None,
//! )?;
//! let answer = apply_rag(&ctx, engine.retriever().as_ref(), &kb.id, "What color is the sky?", &agent).await?;
//! ```

pub mod agent;
pub mod ai;
pub mod cli;
pub mod context;
pub mod error;
pub mod knowledge;
pub mod provider;
pub mod tools;
pub mod vector;

// Re-export key types
pub use crate::agent::{Agent, AgentConfig, AgentFactory, ConversationManager};
pub use crate::ai::{EmbeddingManager, EmbeddingModel, HashingEmbedding};
pub use crate::context::RequestContext;
pub use crate::error::{EngineError, EngineResult};
pub use crate::knowledge::{KnowledgeBaseManager, Retriever, VectorRetriever};
pub use crate::provider::{ChatProvider, ProviderRegistry};
pub use crate::tools::{Tool, ToolRegistry};
pub use crate::vector::{InMemoryVectorDb, VectorDatabase};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::agent::AgentDefaults;
use crate::knowledge::{knowledge_search_tool, ProcessorRegistry};
use crate::provider::EnvCredentials;
use crate::tools::BuiltinOptions;

/// Name of the always-available offline embedding model
pub const HASHING_MODEL: &str = "hashing";

/// Seconds since the Unix epoch
pub(crate) fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Milliseconds since the Unix epoch
pub(crate) fn unix_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    #[default]
    Memory,
    Usearch,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Messages kept per agent and per conversation; 0 keeps everything
    pub memory_size: usize,
    pub max_tool_rounds: usize,
    pub default_top_k: usize,
    pub stream_buffer: usize,
    pub vector_backend: VectorBackend,
    /// Dimensions of the builtin hashing model
    pub embedding_dimensions: usize,
    /// Extra fastembed model to register (feature `embedding`)
    pub embedding_model: Option<String>,
    /// Root directory for the `file_read` tool; the tool is disabled without it
    pub file_base_path: Option<PathBuf>,
    /// Resolve provider credentials from `<PROVIDER>_API_KEY` variables
    pub env_credentials: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: knowledge::DEFAULT_CHUNK_SIZE,
            chunk_overlap: knowledge::DEFAULT_CHUNK_OVERLAP,
            memory_size: agent::DEFAULT_MEMORY_SIZE,
            max_tool_rounds: agent::DEFAULT_MAX_TOOL_ROUNDS,
            default_top_k: knowledge::DEFAULT_TOP_K,
            stream_buffer: agent::DEFAULT_STREAM_BUFFER,
            vector_backend: VectorBackend::default(),
            embedding_dimensions: 384,
            embedding_model: None,
            file_base_path: None,
            env_credentials: false,
        }
    }
}

impl Config {
    pub fn from_json_file(path: &Path) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text).map_err(|e| {
            EngineError::Configuration(format!("invalid config file {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        let fail = |msg: &str| Err(EngineError::Configuration(msg.to_string()));
        if self.chunk_size == 0 {
            return fail("chunk_size must be positive");
        }
        if self.chunk_overlap >= self.chunk_size {
            return fail("chunk_overlap must be smaller than chunk_size");
        }
        if self.max_tool_rounds == 0 {
            return fail("max_tool_rounds must be at least 1");
        }
        if self.default_top_k == 0 {
            return fail("default_top_k must be positive");
        }
        if self.stream_buffer == 0 {
            return fail("stream_buffer must be positive");
        }
        if self.embedding_dimensions == 0 {
            return fail("embedding_dimensions must be positive");
        }
        Ok(())
    }
}

/// Application context owning every shared component.
pub struct Engine {
    config: Config,
    embeddings: Arc<EmbeddingManager>,
    vector_db: Arc<dyn VectorDatabase>,
    knowledge: Arc<KnowledgeBaseManager>,
    retriever: Arc<dyn Retriever>,
    tools: Arc<ToolRegistry>,
    providers: Arc<ProviderRegistry>,
    factory: Arc<AgentFactory>,
    conversations: Arc<ConversationManager>,
}

impl Engine {
    /// Build and connect all components
    pub async fn new(config: Config) -> EngineResult<Self> {
        config.validate()?;

        let embeddings = Arc::new(EmbeddingManager::new());
        embeddings.register_model(Arc::new(HashingEmbedding::new(
            HASHING_MODEL,
            config.embedding_dimensions,
        )));
        if let Some(name) = &config.embedding_model {
            Self::register_fastembed(&embeddings, name).await?;
        }

        let vector_db = Self::open_vector_db(config.vector_backend)?;
        vector_db.connect().await?;

        let processors = Arc::new(ProcessorRegistry::with_defaults(
            config.chunk_size,
            config.chunk_overlap,
        )?);
        let knowledge = Arc::new(KnowledgeBaseManager::new(
            Arc::clone(&vector_db),
            Arc::clone(&embeddings),
            processors,
        ));
        let retriever: Arc<dyn Retriever> = Arc::new(VectorRetriever::with_default_top_k(
            Arc::clone(&knowledge),
            config.default_top_k,
        ));

        let tools = Arc::new(ToolRegistry::new());
        tools.register_all_builtin_tools(&BuiltinOptions {
            file_base_path: config.file_base_path.clone(),
            search: None,
        })?;
        tools.register_tool(knowledge_search_tool(Arc::clone(&retriever)))?;

        let providers = Arc::new(ProviderRegistry::with_defaults());
        let mut factory = AgentFactory::new(Arc::clone(&tools), Arc::clone(&providers))
            .with_defaults(AgentDefaults {
                memory_size: config.memory_size,
                max_tool_rounds: config.max_tool_rounds,
                stream_buffer: config.stream_buffer,
            });
        if config.env_credentials {
            factory = factory.with_credentials(Arc::new(EnvCredentials));
        }
        let conversations = Arc::new(ConversationManager::new(config.memory_size));

        info!(
            backend = ?config.vector_backend,
            tools = tools.list_tools().len(),
            "Engine ready"
        );
        Ok(Self {
            config,
            embeddings,
            vector_db,
            knowledge,
            retriever,
            tools,
            providers,
            factory: Arc::new(factory),
            conversations,
        })
    }

    fn open_vector_db(backend: VectorBackend) -> EngineResult<Arc<dyn VectorDatabase>> {
        match backend {
            VectorBackend::Memory => Ok(Arc::new(InMemoryVectorDb::new())),
            #[cfg(feature = "vector")]
            VectorBackend::Usearch => Ok(Arc::new(crate::vector::UsearchVectorDb::new())),
            #[cfg(not(feature = "vector"))]
            VectorBackend::Usearch => Err(EngineError::Configuration(
                "usearch backend requires the `vector` feature".to_string(),
            )),
        }
    }

    #[cfg(feature = "embedding")]
    async fn register_fastembed(embeddings: &EmbeddingManager, name: &str) -> EngineResult<()> {
        let owned = name.to_string();
        let model = tokio::task::spawn_blocking(move || crate::ai::FastEmbedModel::new(&owned))
            .await
            .map_err(|e| EngineError::Embedding(format!("model loading task failed: {}", e)))??;
        embeddings.register_model(Arc::new(model));
        Ok(())
    }

    #[cfg(not(feature = "embedding"))]
    async fn register_fastembed(_embeddings: &EmbeddingManager, name: &str) -> EngineResult<()> {
        Err(EngineError::Configuration(format!(
            "embedding model '{}' requires the `embedding` feature",
            name
        )))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn embeddings(&self) -> &Arc<EmbeddingManager> {
        &self.embeddings
    }

    pub fn vector_db(&self) -> &Arc<dyn VectorDatabase> {
        &self.vector_db
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeBaseManager> {
        &self.knowledge
    }

    pub fn retriever(&self) -> &Arc<dyn Retriever> {
        &self.retriever
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    pub fn factory(&self) -> &Arc<AgentFactory> {
        &self.factory
    }

    pub fn conversations(&self) -> &Arc<ConversationManager> {
        &self.conversations
    }

    /// Disconnect the vector store
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.vector_db.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_validate() {
        let config = Config::default();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.max_tool_rounds, 8);
        config.validate().unwrap();
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let bad = [
            Config { chunk_size: 0, ..Config::default() },
            Config { chunk_overlap: 1000, ..Config::default() },
            Config { max_tool_rounds: 0, ..Config::default() },
            Config { stream_buffer: 0, ..Config::default() },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(EngineError::Configuration(_))));
        }
    }

    #[test]
    fn test_config_from_partial_json() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), r#"{"chunk_size": 500, "chunk_overlap": 50, "vector_backend": "memory"}"#).unwrap();
        let config = Config::from_json_file(file.path()).unwrap();
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.memory_size, 100);
        assert_eq!(config.vector_backend, VectorBackend::Memory);

        std::fs::write(file.path(), "{not json").unwrap();
        assert!(Config::from_json_file(file.path()).is_err());
    }

    #[tokio::test]
    async fn test_engine_wiring() {
        let engine = Engine::new(Config::default()).await.unwrap();
        assert!(engine.embeddings().has_model(HASHING_MODEL));
        assert!(engine.tools().has_tool("knowledge_search"));
        assert!(engine.tools().has_tool("calculator"));
        assert!(!engine.tools().has_tool("file_read"));
        assert!(engine.providers().contains("echo"));
        assert_eq!(engine.factory().list_templates().len(), 3);
        engine.shutdown().await.unwrap();
    }
}
