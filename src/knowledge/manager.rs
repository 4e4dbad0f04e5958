use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use super::document::{Document, DocumentType};
use super::processor::ProcessorRegistry;
use crate::ai::{EmbeddingManager, EmbeddingRequest};
use crate::context::RequestContext;
use crate::error::{EngineError, EngineResult};
use crate::unix_timestamp;
use crate::vector::{VectorDatabase, VectorMetadata};

/// Knowledge-base metadata. The vector collection shares its id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub id: String,
    pub name: String,
    pub description: String,
    pub embedding_model: String,
    pub document_count: usize,
    pub chunk_count: usize,
    pub created_at: u64,
    pub updated_at: u64,
}

struct DocumentEntry {
    document: Document,
    chunk_ids: Vec<String>,
}

#[derive(Default)]
struct KnowledgeState {
    knowledge_bases: HashMap<String, KnowledgeBase>,
    documents: HashMap<String, Vec<DocumentEntry>>,
}

/// Owns knowledge bases and drives ingestion: processor, then embedder,
/// then vector store.
pub struct KnowledgeBaseManager {
    vector_db: Arc<dyn VectorDatabase>,
    embeddings: Arc<EmbeddingManager>,
    processors: Arc<ProcessorRegistry>,
    state: RwLock<KnowledgeState>,
}

impl KnowledgeBaseManager {
    pub fn new(
        vector_db: Arc<dyn VectorDatabase>,
        embeddings: Arc<EmbeddingManager>,
        processors: Arc<ProcessorRegistry>,
    ) -> Self {
        Self {
            vector_db,
            embeddings,
            processors,
            state: RwLock::new(KnowledgeState::default()),
        }
    }

    pub fn vector_db(&self) -> &Arc<dyn VectorDatabase> {
        &self.vector_db
    }

    pub fn embeddings(&self) -> &Arc<EmbeddingManager> {
        &self.embeddings
    }

    pub async fn create_knowledge_base(
        &self,
        name: &str,
        description: &str,
        embedding_model: &str,
    ) -> EngineResult<KnowledgeBase> {
        if name.trim().is_empty() {
            return Err(EngineError::Configuration(
                "knowledge base name is required".to_string(),
            ));
        }
        let model = self.embeddings.get_model(embedding_model)?;

        let now = unix_timestamp();
        let kb = KnowledgeBase {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            embedding_model: embedding_model.to_string(),
            document_count: 0,
            chunk_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.vector_db
            .create_collection(&kb.id, model.dimensions())
            .await?;

        let mut state = self.state.write();
        state.knowledge_bases.insert(kb.id.clone(), kb.clone());
        state.documents.insert(kb.id.clone(), Vec::new());
        tracing::info!(kb = %kb.id, name = %kb.name, model = %embedding_model, "Created knowledge base");
        Ok(kb)
    }

    pub fn get_knowledge_base(&self, id: &str) -> EngineResult<KnowledgeBase> {
        self.state
            .read()
            .knowledge_bases
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::KnowledgeBaseNotFound(id.to_string()))
    }

    /// All knowledge bases, oldest first.
    pub fn list_knowledge_bases(&self) -> Vec<KnowledgeBase> {
        let mut kbs: Vec<KnowledgeBase> =
            self.state.read().knowledge_bases.values().cloned().collect();
        kbs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        kbs
    }

    /// Update name and/or description; empty values leave a field as is.
    pub fn update_knowledge_base(
        &self,
        id: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> EngineResult<KnowledgeBase> {
        let mut state = self.state.write();
        let kb = state
            .knowledge_bases
            .get_mut(id)
            .ok_or_else(|| EngineError::KnowledgeBaseNotFound(id.to_string()))?;
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            kb.name = name.to_string();
        }
        if let Some(description) = description.filter(|d| !d.is_empty()) {
            kb.description = description.to_string();
        }
        kb.updated_at = unix_timestamp();
        Ok(kb.clone())
    }

    pub async fn delete_knowledge_base(&self, id: &str) -> EngineResult<()> {
        self.get_knowledge_base(id)?;
        self.vector_db.drop_collection(id).await?;
        let mut state = self.state.write();
        state.knowledge_bases.remove(id);
        state.documents.remove(id);
        tracing::info!(kb = %id, "Deleted knowledge base");
        Ok(())
    }

    /// Ingest a file; the document type follows its extension.
    pub async fn add_document(
        &self,
        ctx: &RequestContext,
        kb_id: &str,
        path: &Path,
    ) -> EngineResult<Document> {
        self.get_knowledge_base(kb_id)?;
        let document = Document::from_file(kb_id, path).await?;
        self.ingest(ctx, document).await
    }

    pub async fn add_text_document(
        &self,
        ctx: &RequestContext,
        kb_id: &str,
        name: &str,
        content: &str,
        doc_type: DocumentType,
    ) -> EngineResult<Document> {
        self.get_knowledge_base(kb_id)?;
        let document = Document::from_text(kb_id, name, content, doc_type);
        self.ingest(ctx, document).await
    }

    /// Chunk, embed and store a document. Counters only move once every
    /// step has succeeded; vectors inserted before a later failure are
    /// deleted again.
    #[instrument(skip(self, ctx, document), fields(kb = %document.knowledge_base_id, doc = %document.name))]
    async fn ingest(&self, ctx: &RequestContext, document: Document) -> EngineResult<Document> {
        let kb = self.get_knowledge_base(&document.knowledge_base_id)?;

        let mut chunks = self.processors.process_document(&document)?;
        if chunks.is_empty() {
            return Err(EngineError::Ingestion(
                "document processing resulted in no chunks".to_string(),
            ));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let response = self
            .embeddings
            .embed(
                ctx,
                EmbeddingRequest {
                    texts,
                    model: kb.embedding_model.clone(),
                },
            )
            .await
            .map_err(|e| EngineError::Ingestion(format!("failed to embed chunks: {}", e)))?;
        for (chunk, vector) in chunks.iter_mut().zip(response.embeddings) {
            chunk.vector = vector;
        }

        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let vectors: Vec<Vec<f32>> = chunks.iter().map(|c| c.vector.clone()).collect();
        let metadata: Vec<VectorMetadata> = chunks
            .iter()
            .map(|c| {
                let value = json!({
                    "content": c.content,
                    "document_id": document.id,
                    "chunk_index": c.metadata.chunk_index,
                    "page_number": c.metadata.page_number,
                    "source": c.metadata.source,
                });
                match value {
                    serde_json::Value::Object(map) => map,
                    _ => VectorMetadata::new(),
                }
            })
            .collect();

        if let Err(e) = ctx
            .run(self.vector_db.insert_vectors(&kb.id, &ids, &vectors, &metadata))
            .await
        {
            self.rollback(&kb.id, &ids).await;
            return Err(EngineError::Ingestion(format!("failed to store vectors: {}", e)));
        }

        let chunk_count = ids.len();
        let recorded = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            match state.knowledge_bases.get_mut(&document.knowledge_base_id) {
                Some(entry) => {
                    entry.document_count += 1;
                    entry.chunk_count += chunk_count;
                    entry.updated_at = unix_timestamp();
                    state
                        .documents
                        .entry(document.knowledge_base_id.clone())
                        .or_default()
                        .push(DocumentEntry {
                            document: document.clone(),
                            chunk_ids: ids.clone(),
                        });
                    true
                }
                None => false,
            }
        };
        if !recorded {
            // Deleted while we were ingesting.
            self.rollback(&kb.id, &ids).await;
            return Err(EngineError::KnowledgeBaseNotFound(kb.id));
        }

        tracing::info!(document = %document.id, chunks = chunk_count, "Ingested document");
        Ok(document)
    }

    async fn rollback(&self, collection: &str, ids: &[String]) {
        if let Err(e) = self.vector_db.delete_vectors(collection, ids).await {
            tracing::warn!(collection = %collection, error = %e, "Failed to roll back inserted vectors");
        }
    }

    pub fn get_documents(&self, kb_id: &str) -> EngineResult<Vec<Document>> {
        let state = self.state.read();
        if !state.knowledge_bases.contains_key(kb_id) {
            return Err(EngineError::KnowledgeBaseNotFound(kb_id.to_string()));
        }
        Ok(state
            .documents
            .get(kb_id)
            .map(|docs| docs.iter().map(|d| d.document.clone()).collect())
            .unwrap_or_default())
    }

    /// Chunk ids stored for a document.
    pub fn document_chunk_ids(&self, kb_id: &str, document_id: &str) -> EngineResult<Vec<String>> {
        self.state
            .read()
            .documents
            .get(kb_id)
            .and_then(|docs| docs.iter().find(|d| d.document.id == document_id))
            .map(|d| d.chunk_ids.clone())
            .ok_or_else(|| EngineError::DocumentNotFound(document_id.to_string()))
    }

    /// Remove a document and exactly the vectors it produced.
    pub async fn delete_document(&self, kb_id: &str, document_id: &str) -> EngineResult<()> {
        self.get_knowledge_base(kb_id)?;
        let chunk_ids = self.document_chunk_ids(kb_id, document_id)?;
        self.vector_db.delete_vectors(kb_id, &chunk_ids).await?;

        let mut state = self.state.write();
        let removed = match state.documents.get_mut(kb_id) {
            Some(docs) => {
                let before = docs.len();
                docs.retain(|d| d.document.id != document_id);
                before != docs.len()
            }
            None => false,
        };
        // a concurrent delete of the same document got here first
        if !removed {
            return Err(EngineError::DocumentNotFound(document_id.to_string()));
        }
        if let Some(kb) = state.knowledge_bases.get_mut(kb_id) {
            kb.document_count = kb.document_count.saturating_sub(1);
            kb.chunk_count = kb.chunk_count.saturating_sub(chunk_ids.len());
            kb.updated_at = unix_timestamp();
        }
        tracing::info!(kb = %kb_id, document = %document_id, chunks = chunk_ids.len(), "Deleted document");
        Ok(())
    }
}
