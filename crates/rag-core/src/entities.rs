//! Core data model: documents, chunks, embeddings and metadata values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A tagged-union value for arbitrary document/chunk metadata.
///
/// `Null` is a distinct value from "absent" — a key mapped to `Null` is
/// present, a key with no entry is not. The variant order matters for
/// `#[serde(untagged)]`: serde tries variants top to bottom, so an integral
/// JSON number decodes as `Int64` before `Float64` is attempted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Array(Vec<MetadataValue>),
    Map(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    /// Coerces to `f64` for numeric comparisons, widening `Int64` losslessly
    /// for the ranges BM25/filter code cares about.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Int64(i) => Some(*i as f64),
            MetadataValue::Float64(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, MetadataValue::Null)
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}
impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int64(v)
    }
}
impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float64(v)
    }
}
impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::String(v)
    }
}
impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::String(v.to_string())
    }
}

/// Custom, caller-defined key/value metadata attached to a document or chunk.
pub type CustomMetadata = BTreeMap<String, MetadataValue>;

/// Metadata describing the provenance of a document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub url: Option<String>,
    pub mime_type: Option<String>,
    #[serde(default)]
    pub custom: CustomMetadata,
}

/// An immutable source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub metadata: DocumentMetadata,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata,
            created_at: chrono::Utc::now(),
        }
    }
}

/// Metadata describing a chunk's position within its parent document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub document_id: String,
    /// Zero-based, contiguous and unique within a document.
    pub index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub source: Option<String>,
    #[serde(default)]
    pub custom: CustomMetadata,
    /// Set by child-producing chunking strategies (§4.6 Parent/Child).
    #[serde(default)]
    pub is_child: bool,
    #[serde(default)]
    pub is_parent: bool,
    pub parent_id: Option<String>,
}

impl ChunkMetadata {
    pub fn new(document_id: impl Into<String>, index: usize, start_offset: usize, end_offset: usize) -> Self {
        Self {
            document_id: document_id.into(),
            index,
            start_offset,
            end_offset,
            source: None,
            custom: CustomMetadata::new(),
            is_child: false,
            is_parent: false,
            parent_id: None,
        }
    }
}

/// A fixed-size dense embedding vector.
///
/// Every component must be finite; `dimensions` is always the length of
/// `values` and is at least 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    pub source_model: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values, source_model: None }
    }

    pub fn with_source_model(mut self, model: impl Into<String>) -> Self {
        self.source_model = Some(model.into());
        self
    }

    pub fn dimensions(&self) -> usize {
        self.values.len()
    }

    pub fn is_valid(&self) -> bool {
        !self.values.is_empty() && self.values.iter().all(|v| v.is_finite())
    }

    /// Cosine similarity between two embeddings. Returns 0 if either
    /// magnitude is below ~1e-8 or dimensions mismatch — see
    /// [`crate::vector::cosine`].
    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        crate::vector::cosine(&self.values, &other.values)
    }
}

/// An immutable piece of a document, optionally carrying its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub embedding: Option<Embedding>,
}

impl Chunk {
    pub fn new(id: impl Into<String>, content: impl Into<String>, metadata: ChunkMetadata) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata,
            embedding: None,
        }
    }

    /// Returns a new chunk identical to `self` but carrying `embedding`.
    /// Chunks are immutable — this never mutates `self`.
    pub fn with_embedding(&self, embedding: Embedding) -> Chunk {
        let mut next = self.clone();
        next.embedding = Some(embedding);
        next
    }
}

/// A scored retrieval hit, with an open metadata map for retriever-specific
/// diagnostics (e.g. `matched_children`, `fusion_method`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    pub score: f32,
    #[serde(default)]
    pub metadata: CustomMetadata,
}

impl RetrievalResult {
    pub fn new(chunk: Chunk, score: f32) -> Self {
        Self { chunk, score, metadata: CustomMetadata::new() }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: MetadataValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_with_embedding_does_not_mutate_original() {
        let meta = ChunkMetadata::new("doc1", 0, 0, 10);
        let chunk = Chunk::new("c1", "hello", meta);
        let embedded = chunk.with_embedding(Embedding::new(vec![1.0, 0.0]));
        assert!(chunk.embedding.is_none());
        assert!(embedded.embedding.is_some());
    }

    #[test]
    fn metadata_value_null_is_distinct_from_absent() {
        let mut map = CustomMetadata::new();
        map.insert("k".to_string(), MetadataValue::Null);
        assert!(map.contains_key("k"));
        assert!(map.get("k").unwrap().is_null());
        assert!(!map.contains_key("missing"));
    }

    #[test]
    fn metadata_value_int_before_float_serde_precedence() {
        let v: MetadataValue = serde_json::from_str("5").unwrap();
        assert_eq!(v, MetadataValue::Int64(5));
        let v: MetadataValue = serde_json::from_str("5.5").unwrap();
        assert_eq!(v, MetadataValue::Float64(5.5));
    }
}
