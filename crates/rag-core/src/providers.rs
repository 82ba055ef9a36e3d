//! External collaborator traits (spec.md §6): concrete embedding/LLM
//! providers, chunkers, and document loaders are out of scope — this module
//! defines the seams they plug into. Grounded on the pack's uniform use of
//! `async-trait` for pluggable-provider traits (the teacher has no async
//! collaborators of its own to generalize from).

use async_trait::async_trait;

use crate::entities::{Chunk, Document, Embedding, RetrievalResult};
use crate::error::Result;

/// Generation options shared by `generate` and `stream`.
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub stop_sequences: Vec<String>,
}

/// Converts text to dense vectors. Implementors own the concrete model
/// (OpenAI, Cohere, Ollama, a local model) — none is provided here.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;
    fn dimensions(&self) -> usize;
    fn max_tokens_per_request(&self) -> usize;
    fn optimal_batch_size(&self) -> usize {
        100
    }

    /// The returned embedding has length [`Self::dimensions`].
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Order-corresponds to `texts`; every result has length [`Self::dimensions`].
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>>;
}

/// Generates text from a prompt, with an optional system prompt and
/// streaming variant.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn max_context_tokens(&self) -> usize;

    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        options: &GenerationOptions,
    ) -> Result<String>;

    /// Streams response chunks. Implementations that cannot stream natively
    /// may return the full response as a single chunk.
    async fn stream(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        options: &GenerationOptions,
    ) -> Result<Vec<String>>;
}

/// Splits a document into chunks. Chunks must preserve `document_id`,
/// assign sequential `index`, and set `start_offset`/`end_offset` such that
/// concatenated spans reproduce the contributing text. Child-producing
/// strategies also set `is_child`/`parent_id`/`is_parent` on [`crate::entities::ChunkMetadata`].
#[async_trait]
pub trait ChunkingStrategy: Send + Sync {
    async fn chunk(&self, document: &Document) -> Result<Vec<Chunk>>;
}

/// Loads a document from a URL or raw bytes. `supported_extensions` lists
/// lowercase extensions without a leading dot; the default [`Self::can_load`]
/// tests extension membership against the url.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    fn supported_extensions(&self) -> &[&str];

    async fn load(&self, url: &str) -> Result<Document>;
    async fn load_data(&self, data: &[u8], metadata: Option<&str>) -> Result<Document>;

    fn can_load(&self, url: &str) -> bool {
        let lower = url.to_ascii_lowercase();
        self.supported_extensions()
            .iter()
            .any(|ext| lower.ends_with(&format!(".{ext}")))
    }
}

/// Re-scores and re-orders a candidate set, typically with a cross-encoder.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Returns results ordered descending by reranker score. May return
    /// fewer than `results.len()` entries.
    async fn rerank(&self, query: &str, results: Vec<RetrievalResult>) -> Result<Vec<RetrievalResult>>;
}

/// Resolves a parent chunk id to its full chunk, for [`crate::retriever::parent_child`].
#[async_trait]
pub trait ParentLookup: Send + Sync {
    async fn parent(&self, id: &str) -> Result<Option<Chunk>>;
}
