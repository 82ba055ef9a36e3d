//! Pipeline orchestrator (spec.md §4.8): sequences chunking, embedding,
//! indexing, retrieval and generation, and reports progress through two
//! captured-at-call-time callbacks (ingestion and query).
//!
//! The teacher's own `rank-rank::pipeline` only sketches `Pipeline`/
//! `PipelineBuilder` names with no orchestration logic; this module's
//! control flow is built fresh against spec.md §4.8's state machine,
//! following the same isolate-with-`Mutex`-guarded-state shape the rest of
//! this crate's components use.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::context::{ContextBuilder, ContextBuilderConfig};
use crate::entities::{Chunk, Document, RetrievalResult};
use crate::error::{RagError, Result};
use crate::filter::{FilterCondition, FilterOp};
use crate::providers::{ChunkingStrategy, DocumentLoader, EmbeddingProvider, GenerationOptions, LLMProvider};
use crate::retriever::vector::VectorRetriever;
use crate::retriever::Retriever;
use crate::store::VectorStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionPhase {
    Validating,
    Chunking,
    Embedding,
    Storing,
    Complete,
    Failed,
}

#[derive(Debug, Clone)]
pub struct IngestionProgress {
    pub phase: IngestionPhase,
    pub current: usize,
    pub total: usize,
    pub document_id: Option<String>,
    pub message: Option<String>,
}

impl IngestionProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.current as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    Retrieving,
    Generating,
    Complete,
    Failed,
}

#[derive(Debug, Clone)]
pub struct QueryProgress {
    pub phase: QueryPhase,
    pub message: Option<String>,
}

/// A terminal answer plus the sources it was grounded on.
#[derive(Debug, Clone)]
pub struct RagResponse {
    pub answer: String,
    pub sources: Vec<RetrievalResult>,
}

/// Events emitted by [`Pipeline::stream_query`], in the order listed in
/// spec.md §4.8. Collected eagerly rather than as a lazy async stream: this
/// engine's [`LLMProvider::stream`] already resolves to a materialized
/// `Vec<String>` of chunks (see providers.rs), so there is no incremental
/// producer to lazily drive here.
#[derive(Debug, Clone)]
pub enum RagStreamEvent {
    RetrievalStarted,
    RetrievalComplete(Vec<String>),
    GenerationStarted,
    GenerationChunk(String),
    GenerationComplete(String),
    Complete(RagResponse),
    Error(String),
}

#[derive(Debug, Clone)]
pub struct IngestStats {
    pub document_id: String,
    pub chunks: usize,
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub limit: usize,
    pub filter: Option<FilterCondition>,
    pub system_prompt: Option<String>,
    pub generation: GenerationOptions,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self { limit: 5, filter: None, system_prompt: None, generation: GenerationOptions::default() }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub default_query_limit: usize,
    pub context_budget_tokens: usize,
    pub context: ContextBuilderConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { default_query_limit: 5, context_budget_tokens: 2_000, context: ContextBuilderConfig::default() }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineStatistics {
    pub document_count: usize,
    pub chunk_count: usize,
    pub embedding_dimensions: Option<usize>,
    pub store_name: String,
    pub embedder_name: String,
}

type IngestionProgressHandler = Arc<dyn Fn(IngestionProgress) + Send + Sync>;
type QueryProgressHandler = Arc<dyn Fn(QueryProgress) + Send + Sync>;

/// The orchestrator isolate: owns its collaborators and serializes mutation
/// of `document_count` and the two progress handlers. Handlers are captured
/// (cloned out of the mutex) once at the start of each operation, so a
/// handler replaced mid-operation never affects that in-flight call
/// (spec.md §9 "callbacks on the pipeline").
pub struct Pipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    llm: Arc<dyn LLMProvider>,
    chunker: Arc<dyn ChunkingStrategy>,
    loaders: Vec<Arc<dyn DocumentLoader>>,
    config: PipelineConfig,
    store_name: String,
    document_count: Mutex<usize>,
    ingestion_handler: Mutex<Option<IngestionProgressHandler>>,
    query_handler: Mutex<Option<QueryProgressHandler>>,
}

impl Pipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        llm: Arc<dyn LLMProvider>,
        chunker: Arc<dyn ChunkingStrategy>,
        loaders: Vec<Arc<dyn DocumentLoader>>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            llm,
            chunker,
            loaders,
            config,
            store_name: "vector-store".to_string(),
            document_count: Mutex::new(0),
            ingestion_handler: Mutex::new(None),
            query_handler: Mutex::new(None),
        }
    }

    pub fn with_store_name(mut self, name: impl Into<String>) -> Self {
        self.store_name = name.into();
        self
    }

    pub fn set_ingestion_progress_handler(&self, handler: impl Fn(IngestionProgress) + Send + Sync + 'static) {
        *self.ingestion_handler.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(handler));
    }

    pub fn set_query_progress_handler(&self, handler: impl Fn(QueryProgress) + Send + Sync + 'static) {
        *self.query_handler.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(handler));
    }

    fn captured_ingestion_handler(&self) -> Option<IngestionProgressHandler> {
        self.ingestion_handler.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn captured_query_handler(&self) -> Option<QueryProgressHandler> {
        self.query_handler.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn emit_ingestion(handler: &Option<IngestionProgressHandler>, progress: IngestionProgress) {
        if let Some(h) = handler {
            h(progress);
        }
    }

    fn emit_query(handler: &Option<QueryProgressHandler>, progress: QueryProgress) {
        if let Some(h) = handler {
            h(progress);
        }
    }

    /// Ingests one document: validate, chunk, batch-embed, store. Emits
    /// progress in the order `validating -> chunking -> embedding ->
    /// storing -> complete`, or `failed` on the first error (which is then
    /// re-raised).
    pub async fn ingest(&self, document: Document) -> Result<IngestStats> {
        let handler = self.captured_ingestion_handler();
        let document_id = document.id.clone();
        tracing::info!(document_id, "ingestion started");

        Self::emit_ingestion(
            &handler,
            IngestionProgress { phase: IngestionPhase::Validating, current: 0, total: 0, document_id: Some(document_id.clone()), message: None },
        );
        if document.content.trim().is_empty() {
            Self::emit_ingestion(
                &handler,
                IngestionProgress { phase: IngestionPhase::Complete, current: 0, total: 0, document_id: Some(document_id.clone()), message: None },
            );
            return Ok(IngestStats { document_id, chunks: 0 });
        }

        Self::emit_ingestion(
            &handler,
            IngestionProgress { phase: IngestionPhase::Chunking, current: 0, total: 0, document_id: Some(document_id.clone()), message: None },
        );
        let chunks = match self.chunker.chunk(&document).await {
            Ok(chunks) => chunks,
            Err(e) => return self.fail_ingestion(&handler, document_id, e),
        };
        if chunks.is_empty() {
            Self::emit_ingestion(
                &handler,
                IngestionProgress { phase: IngestionPhase::Complete, current: 0, total: 0, document_id: Some(document_id.clone()), message: None },
            );
            return Ok(IngestStats { document_id, chunks: 0 });
        }

        let n = chunks.len();
        Self::emit_ingestion(
            &handler,
            IngestionProgress { phase: IngestionPhase::Embedding, current: 0, total: n, document_id: Some(document_id.clone()), message: None },
        );
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = match self.embedder.embed_batch(&texts).await {
            Ok(embeddings) => embeddings,
            Err(e) => return self.fail_ingestion(&handler, document_id, e),
        };
        if embeddings.len() != chunks.len() {
            let err = RagError::EmbeddingFailed(format!("expected {} embeddings, got {}", chunks.len(), embeddings.len()));
            return self.fail_ingestion(&handler, document_id, err);
        }
        Self::emit_ingestion(
            &handler,
            IngestionProgress { phase: IngestionPhase::Embedding, current: n, total: n, document_id: Some(document_id.clone()), message: None },
        );

        Self::emit_ingestion(
            &handler,
            IngestionProgress { phase: IngestionPhase::Storing, current: 0, total: n, document_id: Some(document_id.clone()), message: None },
        );
        let embedded_chunks: Vec<Chunk> = chunks.into_iter().zip(embeddings).map(|(c, e)| c.with_embedding(e)).collect();
        if let Err(e) = self.store.add(embedded_chunks).await {
            return self.fail_ingestion(&handler, document_id, e);
        }
        *self.document_count.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Self::emit_ingestion(
            &handler,
            IngestionProgress { phase: IngestionPhase::Storing, current: n, total: n, document_id: Some(document_id.clone()), message: None },
        );
        Self::emit_ingestion(
            &handler,
            IngestionProgress { phase: IngestionPhase::Complete, current: n, total: n, document_id: Some(document_id.clone()), message: None },
        );
        tracing::info!(document_id, chunks = n, "ingestion complete");
        Ok(IngestStats { document_id, chunks: n })
    }

    fn fail_ingestion(&self, handler: &Option<IngestionProgressHandler>, document_id: String, err: RagError) -> Result<IngestStats> {
        tracing::warn!(document_id, error = %err, "ingestion failed");
        Self::emit_ingestion(
            handler,
            IngestionProgress { phase: IngestionPhase::Failed, current: 0, total: 0, document_id: Some(document_id), message: Some(err.to_string()) },
        );
        Err(err)
    }

    /// Ingests documents sequentially in the given order; the first failure
    /// propagates and aborts the batch. Documents already ingested are not
    /// rolled back (atomicity is per-document, spec.md §4.8).
    pub async fn ingest_many(&self, documents: Vec<Document>) -> Result<Vec<IngestStats>> {
        let mut stats = Vec::with_capacity(documents.len());
        for document in documents {
            stats.push(self.ingest(document).await?);
        }
        Ok(stats)
    }

    pub async fn ingest_url(&self, url: &str) -> Result<IngestStats> {
        let loader = self
            .loaders
            .iter()
            .find(|l| l.can_load(url))
            .ok_or_else(|| RagError::UnsupportedFileType(url.to_string()))?;
        let document = loader.load(url).await?;
        self.ingest(document).await
    }

    pub async fn ingest_directory(&self, dir: &Path, recursive: bool) -> Result<Vec<IngestStats>> {
        let files = Self::enumerate_files(dir, recursive)?;
        let mut stats = Vec::new();
        for path in files {
            let path_str = path.to_string_lossy().to_string();
            if self.loaders.iter().any(|l| l.can_load(&path_str)) {
                stats.push(self.ingest_url(&path_str).await?);
            }
        }
        Ok(stats)
    }

    fn enumerate_files(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| RagError::LoadingFailed { url: dir.display().to_string(), reason: e.to_string() })?;
        for entry in entries {
            let entry = entry.map_err(|e| RagError::LoadingFailed { url: dir.display().to_string(), reason: e.to_string() })?;
            let path = entry.path();
            if path.is_dir() {
                if recursive {
                    out.extend(Self::enumerate_files(&path, recursive)?);
                }
            } else if path.is_file() {
                out.push(path);
            }
        }
        Ok(out)
    }

    /// Retrieves, builds context, and generates an answer. Emits `retrieving
    /// -> generating -> complete`, or `failed` on the first error.
    pub async fn query(&self, question: &str, options: &QueryOptions) -> Result<RagResponse> {
        let handler = self.captured_query_handler();
        Self::emit_query(&handler, QueryProgress { phase: QueryPhase::Retrieving, message: None });

        let outcome = self.run_query(question, options, &handler).await;
        match outcome {
            Ok(response) => {
                Self::emit_query(&handler, QueryProgress { phase: QueryPhase::Complete, message: None });
                tracing::info!(sources = response.sources.len(), "query complete");
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(error = %e, "query failed");
                Self::emit_query(&handler, QueryProgress { phase: QueryPhase::Failed, message: Some(e.to_string()) });
                Err(e)
            }
        }
    }

    async fn run_query(&self, question: &str, options: &QueryOptions, handler: &Option<QueryProgressHandler>) -> Result<RagResponse> {
        let retriever = VectorRetriever::new(self.embedder.clone(), self.store.clone());
        let sources = retriever.retrieve(question, options.limit, options.filter.as_ref()).await?;

        Self::emit_query(handler, QueryProgress { phase: QueryPhase::Generating, message: None });
        let context = ContextBuilder::new(self.config.context.clone()).build(&sources, self.config.context_budget_tokens);
        let prompt = format!("{context}\n\nQuestion: {question}");
        let answer = self.llm.generate(&prompt, options.system_prompt.as_deref(), &options.generation).await?;
        Ok(RagResponse { answer, sources })
    }

    /// Streams retrieval and generation progress as an ordered sequence of
    /// events, terminating with `Complete` or `Error`.
    pub async fn stream_query(&self, question: &str, options: &QueryOptions) -> Vec<RagStreamEvent> {
        let mut events = vec![RagStreamEvent::RetrievalStarted];

        let retriever = VectorRetriever::new(self.embedder.clone(), self.store.clone());
        let sources = match retriever.retrieve(question, options.limit, options.filter.as_ref()).await {
            Ok(sources) => sources,
            Err(e) => {
                events.push(RagStreamEvent::Error(e.to_string()));
                return events;
            }
        };
        let source_names: Vec<String> = sources
            .iter()
            .map(|r| r.chunk.metadata.source.clone().unwrap_or_else(|| r.chunk.metadata.document_id.clone()))
            .collect();
        events.push(RagStreamEvent::RetrievalComplete(source_names));
        events.push(RagStreamEvent::GenerationStarted);

        let context = ContextBuilder::new(self.config.context.clone()).build(&sources, self.config.context_budget_tokens);
        let prompt = format!("{context}\n\nQuestion: {question}");
        let chunks = match self.llm.stream(&prompt, options.system_prompt.as_deref(), &options.generation).await {
            Ok(chunks) => chunks,
            Err(e) => {
                events.push(RagStreamEvent::Error(e.to_string()));
                return events;
            }
        };

        let mut full = String::new();
        for chunk in chunks {
            full.push_str(&chunk);
            events.push(RagStreamEvent::GenerationChunk(chunk));
        }
        events.push(RagStreamEvent::GenerationComplete(full.clone()));
        events.push(RagStreamEvent::Complete(RagResponse { answer: full, sources }));
        events
    }

    /// Retrieves without generating, for search-only callers.
    pub async fn retrieve(&self, question: &str, limit: usize, filter: Option<&FilterCondition>) -> Result<Vec<RetrievalResult>> {
        let retriever = VectorRetriever::new(self.embedder.clone(), self.store.clone());
        retriever.retrieve(question, limit, filter).await
    }

    pub async fn statistics(&self) -> Result<PipelineStatistics> {
        Ok(PipelineStatistics {
            document_count: *self.document_count.lock().unwrap_or_else(|e| e.into_inner()),
            chunk_count: self.store.count().await?,
            embedding_dimensions: self.store.dimensions().await,
            store_name: self.store_name.clone(),
            embedder_name: self.embedder.name().to_string(),
        })
    }

    /// Deletes every stored chunk and resets the document counter.
    pub async fn clear(&self) -> Result<()> {
        let filter = FilterCondition::field("documentId", FilterOp::Exists);
        self.store.delete_by_filter(&filter).await?;
        *self.document_count.lock().unwrap_or_else(|e| e.into_inner()) = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{ChunkMetadata, DocumentMetadata, Embedding};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct FixedEmbedder(usize);

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn name(&self) -> &str {
            "fixed"
        }
        fn dimensions(&self) -> usize {
            self.0
        }
        fn max_tokens_per_request(&self) -> usize {
            8192
        }
        async fn embed(&self, _text: &str) -> Result<Embedding> {
            Ok(Embedding::new(vec![1.0; self.0]))
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
            Ok(texts.iter().map(|_| Embedding::new(vec![1.0; self.0])).collect())
        }
    }

    struct EchoLLM;

    #[async_trait]
    impl LLMProvider for EchoLLM {
        fn name(&self) -> &str {
            "echo"
        }
        fn model(&self) -> &str {
            "echo-1"
        }
        fn max_context_tokens(&self) -> usize {
            4096
        }
        async fn generate(&self, prompt: &str, _system_prompt: Option<&str>, _options: &GenerationOptions) -> Result<String> {
            Ok(format!("answer: {prompt}"))
        }
        async fn stream(&self, prompt: &str, system_prompt: Option<&str>, options: &GenerationOptions) -> Result<Vec<String>> {
            Ok(vec![self.generate(prompt, system_prompt, options).await?])
        }
    }

    struct FixedSizeChunker(usize);

    #[async_trait]
    impl ChunkingStrategy for FixedSizeChunker {
        async fn chunk(&self, document: &Document) -> Result<Vec<Chunk>> {
            if document.content.trim().is_empty() {
                return Ok(Vec::new());
            }
            let words: Vec<&str> = document.content.split_whitespace().collect();
            Ok(words
                .chunks(self.0.max(1))
                .enumerate()
                .map(|(i, group)| {
                    let content = group.join(" ");
                    Chunk::new(format!("{}-{i}", document.id), content, ChunkMetadata::new(document.id.clone(), i, 0, 0))
                })
                .collect())
        }
    }

    /// Deterministic text -> 4-dim vector via a simple rolling hash, for
    /// scenario S1 (spec.md §8): no real embedding model, just a stable
    /// mapping that makes "beta"-containing documents cluster together.
    struct HashEmbedder;

    impl HashEmbedder {
        fn hash_vector(text: &str) -> Vec<f32> {
            let mut buckets = [0.0f32; 4];
            for word in text.split_whitespace() {
                let mut h: u32 = 2166136261;
                for b in word.bytes() {
                    h ^= b as u32;
                    h = h.wrapping_mul(16777619);
                }
                buckets[h as usize % 4] += 1.0;
            }
            buckets.to_vec()
        }
    }

    #[async_trait]
    impl EmbeddingProvider for HashEmbedder {
        fn name(&self) -> &str {
            "hash"
        }
        fn dimensions(&self) -> usize {
            4
        }
        fn max_tokens_per_request(&self) -> usize {
            8192
        }
        async fn embed(&self, text: &str) -> Result<Embedding> {
            Ok(Embedding::new(Self::hash_vector(text)))
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
            Ok(texts.iter().map(|t| Embedding::new(Self::hash_vector(t))).collect())
        }
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(
            Arc::new(FixedEmbedder(4)),
            Arc::new(crate::store::memory::InMemoryVectorStore::new()),
            Arc::new(EchoLLM),
            Arc::new(FixedSizeChunker(3)),
            Vec::new(),
            PipelineConfig::default(),
        )
    }

    #[tokio::test]
    async fn scenario_s1_tiny_ingest_and_search() {
        let pipeline = Pipeline::new(
            Arc::new(HashEmbedder),
            Arc::new(crate::store::memory::InMemoryVectorStore::new()),
            Arc::new(EchoLLM),
            Arc::new(FixedSizeChunker(64)),
            Vec::new(),
            PipelineConfig::default(),
        );
        pipeline.ingest(Document::new("D1", "alpha beta", DocumentMetadata::default())).await.unwrap();
        pipeline.ingest(Document::new("D2", "beta gamma", DocumentMetadata::default())).await.unwrap();
        pipeline.ingest(Document::new("D3", "delta", DocumentMetadata::default())).await.unwrap();

        let results = pipeline.retrieve("beta", 2, None).await.unwrap();
        assert_eq!(results.len(), 2);
        let contents: Vec<&str> = results.iter().map(|r| r.chunk.content.as_str()).collect();
        assert!(contents.iter().all(|c| *c == "alpha beta" || *c == "beta gamma"));
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn ingest_empty_document_completes_with_zero_chunks() {
        let pipeline = pipeline();
        let doc = Document::new("d1", "   ", DocumentMetadata::default());
        let stats = pipeline.ingest(doc).await.unwrap();
        assert_eq!(stats.chunks, 0);
    }

    #[tokio::test]
    async fn ingest_embeds_chunks_and_increments_document_count() {
        let pipeline = pipeline();
        let doc = Document::new("d1", "one two three four five six", DocumentMetadata::default());
        let stats = pipeline.ingest(doc).await.unwrap();
        assert_eq!(stats.chunks, 2);
        let stats = pipeline.statistics().await.unwrap();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.chunk_count, 2);
    }

    #[tokio::test]
    async fn ingest_emits_progress_in_order() {
        let pipeline = pipeline();
        let seen: Arc<StdMutex<Vec<IngestionPhase>>> = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = seen.clone();
        pipeline.set_ingestion_progress_handler(move |p| seen_clone.lock().unwrap().push(p.phase));

        let doc = Document::new("d1", "one two three", DocumentMetadata::default());
        pipeline.ingest(doc).await.unwrap();

        let phases = seen.lock().unwrap().clone();
        assert_eq!(
            phases,
            vec![
                IngestionPhase::Validating,
                IngestionPhase::Chunking,
                IngestionPhase::Embedding,
                IngestionPhase::Embedding,
                IngestionPhase::Storing,
                IngestionPhase::Storing,
                IngestionPhase::Complete,
            ]
        );
    }

    #[tokio::test]
    async fn query_answers_from_ingested_context() {
        let pipeline = pipeline();
        let doc = Document::new("d1", "one two three", DocumentMetadata::default());
        pipeline.ingest(doc).await.unwrap();

        let response = pipeline.query("what is this about?", &QueryOptions::default()).await.unwrap();
        assert!(response.answer.contains("answer:"));
        assert!(!response.sources.is_empty());
    }

    #[tokio::test]
    async fn clear_resets_document_count_and_store() {
        let pipeline = pipeline();
        let doc = Document::new("d1", "one two three", DocumentMetadata::default());
        pipeline.ingest(doc).await.unwrap();
        pipeline.clear().await.unwrap();

        let stats = pipeline.statistics().await.unwrap();
        assert_eq!(stats.document_count, 0);
        assert_eq!(stats.chunk_count, 0);
    }

    #[tokio::test]
    async fn stream_query_ends_with_complete_event() {
        let pipeline = pipeline();
        let doc = Document::new("d1", "one two three", DocumentMetadata::default());
        pipeline.ingest(doc).await.unwrap();

        let events = pipeline.stream_query("question", &QueryOptions::default()).await;
        assert!(matches!(events.first(), Some(RagStreamEvent::RetrievalStarted)));
        assert!(matches!(events.last(), Some(RagStreamEvent::Complete(_))));
    }
}
