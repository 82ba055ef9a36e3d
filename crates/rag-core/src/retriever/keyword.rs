//! BM25 (Okapi) keyword retriever (spec.md §4.6, §3 "BM25 index").
//!
//! Grounded on the teacher's `InvertedIndex`/`Bm25Params` shape in
//! `rank-retrieve/src/bm25.rs`: postings keyed by term, document frequency
//! table, average-length normalization. Generalized from the teacher's `u32`
//! document ids to the engine's string chunk ids, and from the teacher's
//! lazily-memoized IDF cache to plain on-the-fly computation — this engine
//! recomputes the index on every mutating call (`add_chunks`/`remove`)
//! rather than amortizing across a read-heavy workload, so there is no
//! staleness to guard against.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::entities::{Chunk, RetrievalResult};
use crate::error::{RagError, Result};
use crate::filter::FilterCondition;
use crate::retriever::{guard, sort_by_score_then_id, Retriever};
use crate::topk::top_k_by_score;

#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

impl Bm25Params {
    /// Validates `k1 > 0` and `b` in `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        if self.k1 <= 0.0 {
            return Err(RagError::InvalidConfiguration("bm25 k1 must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(RagError::InvalidConfiguration("bm25 b must be in [0, 1]".into()));
        }
        Ok(())
    }
}

/// Deterministic tokenizer: lowercase, split on non-alphanumeric boundaries.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[derive(Default)]
struct Index {
    /// term -> chunk id -> term frequency within that chunk.
    postings: HashMap<String, HashMap<String, usize>>,
    /// term -> number of chunks containing it at least once.
    doc_freq: HashMap<String, usize>,
    /// chunk id -> token count.
    doc_len: HashMap<String, usize>,
    total_len: usize,
    chunks: HashMap<String, Chunk>,
}

impl Index {
    fn num_docs(&self) -> usize {
        self.doc_len.len()
    }

    fn avg_len(&self) -> f32 {
        if self.doc_len.is_empty() {
            0.0
        } else {
            self.total_len as f32 / self.doc_len.len() as f32
        }
    }

    fn idf(&self, term: &str) -> f32 {
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f32;
        let n = self.num_docs() as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Removes a chunk's contribution to the index. Never lets any document
    /// frequency go negative, even if called on an id that never existed.
    fn remove_chunk(&mut self, id: &str) {
        let Some(len) = self.doc_len.remove(id) else { return };
        self.total_len = self.total_len.saturating_sub(len);
        self.chunks.remove(id);

        let mut emptied_terms = Vec::new();
        for (term, postings) in self.postings.iter_mut() {
            if postings.remove(id).is_some() {
                if let Some(df) = self.doc_freq.get_mut(term) {
                    *df = df.saturating_sub(1);
                }
            }
            if postings.is_empty() {
                emptied_terms.push(term.clone());
            }
        }
        for term in emptied_terms {
            self.postings.remove(&term);
            self.doc_freq.remove(&term);
        }
    }

    fn add_chunk(&mut self, chunk: Chunk) {
        self.remove_chunk(&chunk.id);
        let tokens = tokenize(&chunk.content);
        self.doc_len.insert(chunk.id.clone(), tokens.len());
        self.total_len += tokens.len();

        let mut term_freq: HashMap<String, usize> = HashMap::new();
        for token in tokens {
            *term_freq.entry(token).or_insert(0) += 1;
        }
        for (term, tf) in term_freq {
            self.postings.entry(term.clone()).or_default().insert(chunk.id.clone(), tf);
            *self.doc_freq.entry(term).or_insert(0) += 1;
        }
        self.chunks.insert(chunk.id.clone(), chunk);
    }

    fn score(&self, id: &str, query_terms: &[String], params: Bm25Params) -> f32 {
        let avg_len = self.avg_len();
        if avg_len == 0.0 {
            return 0.0;
        }
        let doc_len = self.doc_len.get(id).copied().unwrap_or(0) as f32;
        let mut score = 0.0;
        for term in query_terms {
            let tf = self.postings.get(term).and_then(|p| p.get(id)).copied().unwrap_or(0) as f32;
            if tf == 0.0 {
                continue;
            }
            let idf = self.idf(term);
            let numerator = tf * (params.k1 + 1.0);
            let denominator = tf + params.k1 * (1.0 - params.b + params.b * doc_len / avg_len);
            score += idf * (numerator / denominator);
        }
        score
    }
}

/// A BM25 keyword retriever: owns its inverted index and serializes
/// mutation (spec.md §5: the keyword index is an isolate).
pub struct KeywordRetriever {
    params: Bm25Params,
    index: Mutex<Index>,
}

impl KeywordRetriever {
    pub fn new(params: Bm25Params) -> Result<Self> {
        params.validate()?;
        Ok(Self { params, index: Mutex::new(Index::default()) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Indexes (or re-indexes, upserting) the given chunks.
    pub fn add_chunks(&self, chunks: Vec<Chunk>) {
        let mut index = self.lock();
        for chunk in chunks {
            index.add_chunk(chunk);
        }
    }

    /// Removes chunks by id. Idempotent.
    pub fn remove(&self, ids: &[String]) {
        let mut index = self.lock();
        for id in ids {
            index.remove_chunk(id);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Retriever for KeywordRetriever {
    async fn retrieve(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&FilterCondition>,
    ) -> Result<Vec<RetrievalResult>> {
        if let Some(early) = guard(query, limit) {
            return early;
        }
        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let index = self.lock();
        let mut candidates: HashSet<&str> = HashSet::new();
        for term in &query_terms {
            if let Some(postings) = index.postings.get(term) {
                candidates.extend(postings.keys().map(String::as_str));
            }
        }

        let mut scored: Vec<(Chunk, String, f32)> = Vec::new();
        for id in candidates {
            let chunk = &index.chunks[id];
            if let Some(f) = filter {
                if !f.matches(chunk) {
                    continue;
                }
            }
            let score = index.score(id, &query_terms, self.params);
            if score > 0.0 {
                scored.push((chunk.clone(), id.to_string(), score));
            }
        }

        let top = top_k_by_score(scored, limit);
        let mut results: Vec<RetrievalResult> = top
            .into_iter()
            .map(|(chunk, _, score)| RetrievalResult::new(chunk, score))
            .collect();
        sort_by_score_then_id(&mut results);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::ChunkMetadata;

    fn chunk(id: &str, content: &str) -> Chunk {
        Chunk::new(id, content, ChunkMetadata::new("doc1", 0, 0, content.len()))
    }

    #[tokio::test]
    async fn scores_are_non_negative_and_favor_term_overlap() {
        let retriever = KeywordRetriever::new(Bm25Params::default()).unwrap();
        retriever.add_chunks(vec![
            chunk("c1", "swift concurrency actors"),
            chunk("c2", "swift is a language"),
            chunk("c3", "python concurrency"),
        ]);

        let results = retriever.retrieve("swift concurrency", 3, None).await.unwrap();
        assert!(results.iter().all(|r| r.score >= 0.0));
        let score = |id: &str| results.iter().find(|r| r.chunk.id == id).unwrap().score;
        assert!(score("c1") > score("c2"));
        assert!(score("c1") > score("c3"));
    }

    #[tokio::test]
    async fn removing_all_matching_chunks_yields_empty_results() {
        let retriever = KeywordRetriever::new(Bm25Params::default()).unwrap();
        retriever.add_chunks(vec![chunk("c1", "rust memory safety"), chunk("c2", "rust ownership")]);
        retriever.remove(&["c1".to_string(), "c2".to_string()]);

        let results = retriever.retrieve("rust", 5, None).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(retriever.len(), 0);
    }

    #[tokio::test]
    async fn upsert_replaces_previous_contribution() {
        let retriever = KeywordRetriever::new(Bm25Params::default()).unwrap();
        retriever.add_chunks(vec![chunk("c1", "alpha beta")]);
        retriever.add_chunks(vec![chunk("c1", "gamma delta")]);
        assert_eq!(retriever.len(), 1);

        let results = retriever.retrieve("alpha", 5, None).await.unwrap();
        assert!(results.is_empty());
        let results = retriever.retrieve("gamma", 5, None).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn blank_query_returns_empty() {
        let retriever = KeywordRetriever::new(Bm25Params::default()).unwrap();
        retriever.add_chunks(vec![chunk("c1", "alpha beta")]);
        let results = retriever.retrieve("  ", 5, None).await.unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn invalid_params_rejected() {
        assert!(KeywordRetriever::new(Bm25Params { k1: 0.0, b: 0.75 }).is_err());
        assert!(KeywordRetriever::new(Bm25Params { k1: 1.2, b: 1.5 }).is_err());
    }
}
