//! Error types for agent-engine operations

use thiserror::Error;

/// Main error type for agent-engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Missing or invalid configuration (names, models, settings)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No provider constructor registered under this name
    #[error("Unknown provider '{0}'")]
    UnknownProvider(String),

    /// No embedding model registered under this name
    #[error("embedding model not found: {0}")]
    UnknownEmbeddingModel(String),

    /// Operation needs a component that was never attached
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    /// Model provider failure during chat or streaming
    #[error("Provider error: {0}")]
    Provider(String),

    /// The tool-call loop hit its round limit
    #[error("Tool-call loop exceeded {0} rounds")]
    ToolLoopLimit(usize),

    /// Tool not present in a registry or agent
    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    /// Tool name already registered
    #[error("tool with name '{0}' already exists")]
    ToolExists(String),

    /// Tool arguments failed schema validation
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Tool handler failure
    #[error("Tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },

    /// A tool's return value could not be encoded as JSON
    #[error("Failed to serialize tool result: {0}")]
    ToolOutput(String),

    /// Memory read/write failure
    #[error("Memory error: {0}")]
    Memory(String),

    /// Document ingestion failure
    #[error("Ingestion error: {0}")]
    Ingestion(String),

    /// Knowledge base not found
    #[error("knowledge base not found: {0}")]
    KnowledgeBaseNotFound(String),

    /// Document not found
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// Vector collection not found
    #[error("collection {0} does not exist")]
    CollectionNotFound(String),

    /// Conversation not found
    #[error("Conversation '{0}' not found")]
    ConversationNotFound(String),

    /// Message not found
    #[error("message not found: {0}")]
    MessageNotFound(String),

    /// Agent template not found
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// Embedding generation error
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Vector store error
    #[error("Vector search error: {0}")]
    VectorSearch(String),

    /// Streaming failure surfaced through a closed stream
    #[error("Stream error: {0}")]
    Stream(String),

    /// The request context was cancelled or its deadline passed
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error bubbled up from a third-party library
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl EngineError {
    /// Whether retrying the same call may succeed.
    ///
    /// Configuration and validation errors are permanent; failures of
    /// external collaborators (provider, embedder, vector store) are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Provider(_)
                | EngineError::Embedding(_)
                | EngineError::VectorSearch(_)
                | EngineError::Stream(_)
                | EngineError::Io(_)
        )
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

/// Result type alias for agent-engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::ToolExists("calculator".to_string());
        assert_eq!(err.to_string(), "tool with name 'calculator' already exists");

        let err = EngineError::UnknownEmbeddingModel("bert".to_string());
        assert_eq!(err.to_string(), "embedding model not found: bert");

        let err = EngineError::ToolLoopLimit(8);
        assert_eq!(err.to_string(), "Tool-call loop exceeded 8 rounds");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(EngineError::Provider("timeout".into()).is_retryable());
        assert!(!EngineError::Configuration("name is required".into()).is_retryable());
        assert!(!EngineError::InvalidArguments("missing query".into()).is_retryable());
    }

    #[test]
    fn test_from_serde_json() {
        let err: EngineError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, EngineError::Serialization(_)));
    }
}
