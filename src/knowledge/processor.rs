use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;

use super::document::{Chunk, ChunkMetadata, Document, DocumentType};
use crate::error::{EngineError, EngineResult};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Splits a document into chunks.
pub trait DocumentProcessor: Send + Sync {
    fn process(&self, doc: &Document) -> EngineResult<Vec<Chunk>>;

    fn supports_type(&self, doc_type: DocumentType) -> bool;
}

/// Tail of `text` of at most `n` bytes, moved forward past the next space
/// or newline so it starts on a word. Returns `text` unchanged when it is
/// no longer than `n`. If no boundary follows the cut, the raw tail is
/// returned.
pub fn get_last_words(text: &str, n: usize) -> &str {
    if text.len() <= n {
        return text;
    }
    let mut cut = text.len() - n;
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    if let Some(pos) = text[cut..].find(|c: char| c == ' ' || c == '\n') {
        cut += pos + 1;
    }
    &text[cut..]
}

/// Paragraph-greedy chunker for plain text and markdown.
///
/// Sizes are measured in bytes.
#[derive(Debug, Clone)]
pub struct TextProcessor {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for TextProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

impl TextProcessor {
    /// Zero for either value selects its default. An overlap that is not
    /// smaller than the chunk size is clamped to half the chunk size.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = if chunk_size == 0 { DEFAULT_CHUNK_SIZE } else { chunk_size };
        let mut chunk_overlap = if chunk_overlap == 0 {
            DEFAULT_CHUNK_OVERLAP
        } else {
            chunk_overlap
        };
        if chunk_overlap >= chunk_size {
            tracing::warn!(chunk_size, chunk_overlap, "Chunk overlap clamped below chunk size");
            chunk_overlap = chunk_size / 2;
        }
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `content` into chunk texts.
    pub fn split(&self, content: &str) -> Vec<String> {
        if content.is_empty() {
            return Vec::new();
        }
        let normalized;
        let content = if content.contains("\r\n") {
            normalized = content.replace("\r\n", "\n");
            normalized.as_str()
        } else {
            content
        };

        let mut pieces = Vec::new();
        let mut current = String::new();
        for paragraph in content.split(PARAGRAPH_SEPARATOR) {
            if current.len() + paragraph.len() > self.chunk_size && !current.is_empty() {
                let overlap = get_last_words(&current, self.chunk_overlap).to_string();
                pieces.push(std::mem::replace(&mut current, overlap));
            }
            if !current.is_empty() {
                current.push_str(PARAGRAPH_SEPARATOR);
            }
            current.push_str(paragraph);
        }
        if !current.is_empty() {
            pieces.push(current);
        }
        pieces
    }

    pub(crate) fn build_chunks(&self, doc: &Document, pieces: Vec<String>) -> Vec<Chunk> {
        pieces
            .into_iter()
            .enumerate()
            .map(|(index, content)| Chunk {
                id: uuid::Uuid::new_v4().to_string(),
                document_id: doc.id.clone(),
                content,
                vector: Vec::new(),
                metadata: ChunkMetadata {
                    chunk_index: index,
                    page_number: None,
                    source: doc.name.clone(),
                },
            })
            .collect()
    }
}

impl DocumentProcessor for TextProcessor {
    fn process(&self, doc: &Document) -> EngineResult<Vec<Chunk>> {
        let pieces = self.split(&doc.content);
        Ok(self.build_chunks(doc, pieces))
    }

    fn supports_type(&self, doc_type: DocumentType) -> bool {
        matches!(doc_type, DocumentType::Text | DocumentType::Markdown)
    }
}

/// Converts HTML to paragraph text, then chunks it like plain text.
pub struct HtmlProcessor {
    text: TextProcessor,
    hidden: Regex,
    block: Regex,
    tag: Regex,
}

impl HtmlProcessor {
    pub fn new(text: TextProcessor) -> EngineResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| EngineError::Configuration(format!("invalid HTML pattern: {}", e)))
        };
        Ok(Self {
            text,
            hidden: compile(r"(?is)<(?:script|style|head)\b[^>]*>.*?</(?:script|style|head)\s*>")?,
            block: compile(
                r"(?i)</?(?:p|div|br|li|ul|ol|tr|table|h[1-6]|section|article|header|footer|blockquote|pre)\b[^>]*>",
            )?,
            tag: compile(r"<[^>]*>")?,
        })
    }

    /// Visible text with block elements turned into paragraph breaks.
    pub fn to_text(&self, html: &str) -> String {
        let without_hidden = self.hidden.replace_all(html, "");
        let with_breaks = self.block.replace_all(&without_hidden, "\n\n");
        let stripped = self.tag.replace_all(&with_breaks, "");
        let decoded = decode_entities(&stripped);

        let mut paragraphs: Vec<String> = Vec::new();
        let mut lines: Vec<&str> = Vec::new();
        for line in decoded.lines() {
            let line = line.trim();
            if line.is_empty() {
                if !lines.is_empty() {
                    paragraphs.push(lines.join("\n"));
                    lines.clear();
                }
            } else {
                lines.push(line);
            }
        }
        if !lines.is_empty() {
            paragraphs.push(lines.join("\n"));
        }
        paragraphs.join(PARAGRAPH_SEPARATOR)
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

impl DocumentProcessor for HtmlProcessor {
    fn process(&self, doc: &Document) -> EngineResult<Vec<Chunk>> {
        let pieces = self.text.split(&self.to_text(&doc.content));
        Ok(self.text.build_chunks(doc, pieces))
    }

    fn supports_type(&self, doc_type: DocumentType) -> bool {
        doc_type == DocumentType::Html
    }
}

/// Processors keyed by the document type they handle.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: RwLock<HashMap<DocumentType, Arc<dyn DocumentProcessor>>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text, markdown and HTML processors with the given chunking.
    pub fn with_defaults(chunk_size: usize, chunk_overlap: usize) -> EngineResult<Self> {
        let registry = Self::new();
        let text = TextProcessor::new(chunk_size, chunk_overlap);
        let text_processor: Arc<dyn DocumentProcessor> = Arc::new(text.clone());
        registry.register(DocumentType::Text, Arc::clone(&text_processor));
        registry.register(DocumentType::Markdown, text_processor);
        registry.register(DocumentType::Html, Arc::new(HtmlProcessor::new(text)?));
        Ok(registry)
    }

    pub fn register(&self, doc_type: DocumentType, processor: Arc<dyn DocumentProcessor>) {
        self.processors.write().insert(doc_type, processor);
    }

    pub fn get_processor(&self, doc_type: DocumentType) -> EngineResult<Arc<dyn DocumentProcessor>> {
        self.processors
            .read()
            .get(&doc_type)
            .cloned()
            .ok_or_else(|| {
                EngineError::Ingestion(format!(
                    "no processor found for document type: {}",
                    doc_type
                ))
            })
    }

    pub fn process_document(&self, doc: &Document) -> EngineResult<Vec<Chunk>> {
        let processor = self.get_processor(doc.doc_type)?;
        processor.process(doc)
    }
}
