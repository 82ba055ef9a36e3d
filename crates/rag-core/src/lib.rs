//! Retrieval engine core: chunk/embedding data model, metadata filtering,
//! vector math, vector stores, the retriever family, context assembly and
//! the ingest/query pipeline.
//!
//! Concrete embedding models, language models, chunkers and document
//! loaders are out of scope (spec.md §6 "External Interfaces") — this crate
//! defines the seams in [`providers`] that callers plug real ones into.

pub mod batch;
pub mod context;
pub mod entities;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod providers;
pub mod retriever;
pub mod simd;
pub mod store;
mod topk;
pub mod vector;

/// Commonly used types, re-exported for `use rag_core::prelude::*;`.
pub mod prelude {
    pub use crate::context::{ContextBlock, ContextBuilder, ContextBuilderConfig};
    pub use crate::entities::{
        Chunk, ChunkMetadata, CustomMetadata, Document, DocumentMetadata, Embedding, MetadataValue, RetrievalResult,
    };
    pub use crate::error::{RagError, Result};
    pub use crate::filter::{FilterCondition, FilterOp};
    pub use crate::pipeline::{
        IngestStats, IngestionPhase, IngestionProgress, Pipeline, PipelineConfig, PipelineStatistics, QueryOptions,
        QueryPhase, QueryProgress, RagResponse, RagStreamEvent,
    };
    pub use crate::providers::{ChunkingStrategy, DocumentLoader, EmbeddingProvider, GenerationOptions, LLMProvider, ParentLookup, Reranker};
    pub use crate::retriever::hybrid::{FusionMethod, HybridRetriever};
    pub use crate::retriever::keyword::{Bm25Params, KeywordRetriever};
    pub use crate::retriever::mmr::MmrRetriever;
    pub use crate::retriever::multi_query::MultiQueryRetriever;
    pub use crate::retriever::parent_child::{AggregationMethod, ParentChildRetriever};
    pub use crate::retriever::reranker::RerankingRetriever;
    pub use crate::retriever::vector::VectorRetriever;
    pub use crate::retriever::Retriever;
    pub use crate::store::memory::InMemoryVectorStore;
    pub use crate::store::memory_strategy::MemoryStrategy;
    pub use crate::store::sqlite::SqliteVectorStore;
    pub use crate::store::VectorStore;
}
