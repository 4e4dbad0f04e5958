//! Knowledge bases and retrieval
//!
//! Documents are split into overlapping chunks by a [`DocumentProcessor`],
//! embedded, and stored in a vector collection named after the knowledge
//! base. A [`Retriever`] answers queries against that collection, and
//! [`apply_rag`] folds the hits into an agent prompt.

mod document;
mod manager;
mod processor;
mod rag;
mod retriever;

pub use document::{Chunk, ChunkMetadata, Document, DocumentType};
pub use manager::{KnowledgeBase, KnowledgeBaseManager};
pub use processor::{
    get_last_words, DocumentProcessor, HtmlProcessor, ProcessorRegistry, TextProcessor,
    DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE,
};
pub use rag::{apply_rag, generate_prompt_from_results, knowledge_search_tool, KNOWLEDGE_SEARCH_TOOL};
pub use retriever::{QueryRequest, QueryResponse, Retriever, VectorRetriever, DEFAULT_TOP_K};
