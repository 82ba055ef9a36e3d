//! Vector store interface and implementations.

pub mod memory;
pub mod memory_strategy;
pub mod sqlite;

use async_trait::async_trait;

use crate::entities::{Chunk, Embedding, RetrievalResult};
use crate::error::Result;
use crate::filter::FilterCondition;

/// A store of chunks and their embeddings, searchable by cosine similarity.
///
/// Implementors own their mutable state and serialize concurrent calls
/// internally (spec.md §5: each store is an isolate with a single in-flight
/// mutation at a time). `add` upserts: re-adding an existing chunk id
/// replaces both its content and embedding.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Inserts or replaces chunks. The embedding dimensionality is locked on
    /// the first call and every later call must match it.
    async fn add(&self, chunks: Vec<Chunk>) -> Result<()>;

    /// Returns the top `limit` chunks by cosine similarity to `query`,
    /// sorted descending, optionally restricted by `filter`.
    async fn search(
        &self,
        query: &Embedding,
        limit: usize,
        filter: Option<&FilterCondition>,
    ) -> Result<Vec<RetrievalResult>>;

    /// Removes chunks by id. Idempotent: removing a missing id is not an
    /// error. Returns the number of chunks actually removed.
    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize>;

    /// Removes every chunk matching `filter`. Returns the number removed.
    async fn delete_by_filter(&self, filter: &FilterCondition) -> Result<usize>;

    async fn count(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.count().await? == 0)
    }

    /// The locked embedding dimensionality, if any chunk has been added yet.
    async fn dimensions(&self) -> Option<usize>;
}
