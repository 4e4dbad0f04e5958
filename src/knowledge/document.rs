use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::unix_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Text,
    Markdown,
    Pdf,
    Docx,
    Xlsx,
    Html,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Text => "text",
            DocumentType::Markdown => "markdown",
            DocumentType::Pdf => "pdf",
            DocumentType::Docx => "docx",
            DocumentType::Xlsx => "xlsx",
            DocumentType::Html => "html",
        }
    }

    /// Infer a type from a file extension; unknown extensions are text.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "md" | "markdown" => DocumentType::Markdown,
            "pdf" => DocumentType::Pdf,
            "doc" | "docx" => DocumentType::Docx,
            "xls" | "xlsx" => DocumentType::Xlsx,
            "html" | "htm" => DocumentType::Html,
            _ => DocumentType::Text,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(DocumentType::Text)
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(DocumentType::Text),
            "markdown" | "md" => Ok(DocumentType::Markdown),
            "pdf" => Ok(DocumentType::Pdf),
            "docx" => Ok(DocumentType::Docx),
            "xlsx" => Ok(DocumentType::Xlsx),
            "html" => Ok(DocumentType::Html),
            other => Err(EngineError::InvalidInput(format!(
                "unknown document type: {}",
                other
            ))),
        }
    }
}

/// A source document owned by one knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub knowledge_base_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    pub size: u64,
    #[serde(skip)]
    pub content: String,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Document {
    pub fn from_text(
        knowledge_base_id: &str,
        name: &str,
        content: impl Into<String>,
        doc_type: DocumentType,
    ) -> Self {
        let content = content.into();
        let now = unix_timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            knowledge_base_id: knowledge_base_id.to_string(),
            name: name.to_string(),
            doc_type,
            size: content.len() as u64,
            content,
            created_at: now,
            updated_at: now,
        }
    }

    /// Read a file; the type comes from its extension and invalid UTF-8 is
    /// replaced rather than rejected.
    pub async fn from_file(knowledge_base_id: &str, path: &Path) -> EngineResult<Self> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let content = String::from_utf8_lossy(&bytes).into_owned();
        let mut doc = Self::from_text(
            knowledge_base_id,
            &name,
            content,
            DocumentType::from_path(path),
        );
        doc.size = bytes.len() as u64;
        Ok(doc)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub chunk_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    pub source: String,
}

/// A slice of a document's text; the unit that is embedded and searched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub content: String,
    #[serde(skip)]
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_type_from_extension() {
        assert_eq!(DocumentType::from_extension("txt"), DocumentType::Text);
        assert_eq!(DocumentType::from_extension("MD"), DocumentType::Markdown);
        assert_eq!(DocumentType::from_extension("markdown"), DocumentType::Markdown);
        assert_eq!(DocumentType::from_extension("doc"), DocumentType::Docx);
        assert_eq!(DocumentType::from_extension("xls"), DocumentType::Xlsx);
        assert_eq!(DocumentType::from_extension("htm"), DocumentType::Html);
        assert_eq!(DocumentType::from_extension("rs"), DocumentType::Text);
        assert_eq!(DocumentType::from_path(Path::new("README")), DocumentType::Text);
    }

    #[test]
    fn test_document_json_shape() {
        let doc = Document::from_text("kb", "notes", "body", DocumentType::Markdown);
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["type"], "markdown");
        assert_eq!(json["size"], 4);
        assert!(json.get("content").is_none());
    }

    #[tokio::test]
    async fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".html").tempfile().unwrap();
        file.write_all(b"<p>hi</p>").unwrap();

        let doc = Document::from_file("kb", file.path()).await.unwrap();
        assert_eq!(doc.doc_type, DocumentType::Html);
        assert_eq!(doc.size, 9);
        assert_eq!(doc.content, "<p>hi</p>");
        assert_eq!(doc.knowledge_base_id, "kb");
    }
}
