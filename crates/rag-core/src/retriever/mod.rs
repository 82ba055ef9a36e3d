//! Retriever family (spec.md §4.6): dense vector, BM25 keyword, hybrid
//! fusion, MMR diversification, parent/child hierarchical, multi-query
//! expansion, and reranking — each composable over a shared `Retriever` seam.

pub mod hybrid;
pub mod keyword;
pub mod mmr;
pub mod multi_query;
pub mod parent_child;
pub mod reranker;
pub mod vector;

use async_trait::async_trait;

use crate::entities::RetrievalResult;
use crate::error::{RagError, Result};
use crate::filter::FilterCondition;

/// A source of ranked chunks for a natural-language query.
///
/// `limit` must be `>= 1`; an empty or whitespace-only query returns an
/// empty result rather than an error.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&FilterCondition>,
    ) -> Result<Vec<RetrievalResult>>;
}

/// Shared guard every retriever applies before doing real work.
///
/// Returns `Some(Ok(vec![]))` if the query is blank (the caller should
/// return this directly), `Some(Err(..))` if `limit` is invalid, `None`
/// if the caller should proceed.
pub(crate) fn guard(query: &str, limit: usize) -> Option<Result<Vec<RetrievalResult>>> {
    if limit == 0 {
        return Some(Err(RagError::InvalidConfiguration("retrieve limit must be >= 1".into())));
    }
    if query.trim().is_empty() {
        return Some(Ok(Vec::new()));
    }
    None
}

/// Breaks score ties deterministically by ascending chunk id, matching the
/// tie-break rule used by [`crate::topk::top_k_by_score`] (spec.md §9 Open
/// Question i).
pub(crate) fn sort_by_score_then_id(results: &mut [RetrievalResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}
