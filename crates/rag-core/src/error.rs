//! Closed error taxonomy for the retrieval engine.

use thiserror::Error;

/// Errors that can occur anywhere in the retrieval engine.
///
/// Variants are grouped by the pipeline phase that raises them: loading,
/// chunking, embedding, vector storage, retrieval, generation and
/// configuration. Internal decode faults (a malformed row, a stale cache
/// entry) are skipped rather than raised — only boundary-crossing failures
/// surface here.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RagError {
    // ---- Loading ----
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("failed to load {url}: {reason}")]
    LoadingFailed { url: String, reason: String },
    #[error("invalid data: {0}")]
    InvalidData(String),

    // ---- Chunking ----
    #[error("chunking failed: {0}")]
    ChunkingFailed(String),
    #[error("document has no content to chunk")]
    EmptyDocument,

    // ---- Embedding ----
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    EmbeddingDimensionMismatch { expected: usize, got: usize },
    #[error("embedding provider unavailable: {0}")]
    EmbeddingProviderUnavailable(String),
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<u64> },

    // ---- Vector store ----
    #[error("vector store unavailable: {0}")]
    VectorStoreUnavailable(String),
    #[error("vector store connection failed: {0}")]
    VectorStoreConnectionFailed(String),
    #[error("index not found: {0}")]
    IndexNotFound(String),
    #[error("insertion failed: {0}")]
    InsertionFailed(String),
    #[error("search failed: {0}")]
    SearchFailed(String),

    // ---- Retrieval ----
    #[error("retrieval failed: {0}")]
    RetrievalFailed(String),
    #[error("no results found")]
    NoResultsFound,

    // ---- Generation ----
    #[error("generation failed: {0}")]
    GenerationFailed(String),
    #[error("llm provider unavailable: {0}")]
    LlmProviderUnavailable(String),
    #[error("context too long: {tokens} tokens exceeds limit {limit}")]
    ContextTooLong { tokens: usize, limit: usize },

    // ---- Configuration ----
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("missing required component: {0}")]
    MissingRequiredComponent(String),
}

pub type Result<T> = std::result::Result<T, RagError>;
