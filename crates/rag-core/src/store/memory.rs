//! In-memory vector store (spec.md §4.4).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entities::{Chunk, Embedding, RetrievalResult};
use crate::error::{RagError, Result};
use crate::filter::FilterCondition;
use crate::store::VectorStore;
use crate::topk::top_k_by_score;
use crate::vector::cosine;

const MAX_PERSISTED_FILE_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Default)]
struct State {
    chunks: HashMap<String, Chunk>,
    embeddings: HashMap<String, Embedding>,
    expected_dimensions: Option<usize>,
    /// Flat cache of (id, embedding values) rebuilt lazily after writes.
    cache: Option<(Vec<String>, Vec<Vec<f32>>)>,
}

/// In-memory, single-writer-serialized vector store.
///
/// Holds chunks and embeddings in parallel maps plus an optional flattened
/// cache used for unfiltered batch search; the cache is invalidated on every
/// write and rebuilt on the next unfiltered search.
pub struct InMemoryVectorStore {
    state: Mutex<State>,
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::default()) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Serializes the store to JSON at `path`: `{chunks: [...], embeddings: {id: Embedding}}`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let state = self.lock();
        let payload = PersistedStore {
            chunks: state.chunks.values().cloned().collect(),
            embeddings: state.embeddings.clone(),
        };
        let json = serde_json::to_vec_pretty(&payload)
            .map_err(|e| RagError::InsertionFailed(format!("serialize failed: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| RagError::InsertionFailed(format!("write failed: {e}")))?;
        Ok(())
    }

    /// Loads a store previously written by [`Self::save`]. Rejects files
    /// over 100MB and validates that every chunk has a matching embedding
    /// entry before applying the load; on any failure the current state is
    /// left unchanged.
    pub fn load(&self, path: &Path) -> Result<()> {
        let meta = std::fs::metadata(path)
            .map_err(|e| RagError::InvalidData(format!("cannot stat {}: {e}", path.display())))?;
        if meta.len() > MAX_PERSISTED_FILE_BYTES {
            return Err(RagError::InvalidData(format!(
                "persisted store {} exceeds 100MB limit",
                path.display()
            )));
        }
        let bytes = std::fs::read(path)
            .map_err(|e| RagError::InvalidData(format!("cannot read {}: {e}", path.display())))?;
        let payload: PersistedStore = serde_json::from_slice(&bytes)
            .map_err(|e| RagError::InvalidData(format!("malformed store file: {e}")))?;

        for chunk in &payload.chunks {
            if !payload.embeddings.contains_key(&chunk.id) {
                return Err(RagError::InvalidData(format!(
                    "chunk {} has no corresponding embedding",
                    chunk.id
                )));
            }
        }

        let mut dims = None;
        for emb in payload.embeddings.values() {
            match dims {
                None => dims = Some(emb.dimensions()),
                Some(d) if d != emb.dimensions() => {
                    return Err(RagError::InvalidData("inconsistent embedding dimensions in persisted store".into()));
                }
                _ => {}
            }
        }

        let mut state = self.lock();
        state.chunks = payload.chunks.into_iter().map(|c| (c.id.clone(), c)).collect();
        state.embeddings = payload.embeddings;
        state.expected_dimensions = dims;
        state.cache = None;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedStore {
    chunks: Vec<Chunk>,
    embeddings: HashMap<String, Embedding>,
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn add(&self, chunks: Vec<Chunk>) -> Result<()> {
        tracing::debug!(chunks = chunks.len(), "in-memory store add");
        let mut state = self.lock();

        // Validate the whole batch before mutating state, so a bad chunk
        // partway through never leaves earlier chunks inserted.
        let mut expected_dimensions = state.expected_dimensions;
        let mut validated: Vec<(Chunk, Embedding)> = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let embedding = chunk
                .embedding
                .clone()
                .ok_or_else(|| RagError::InsertionFailed(format!("chunk {} has no embedding", chunk.id)))?;
            if !embedding.is_valid() {
                return Err(RagError::InsertionFailed(format!(
                    "chunk {} has a non-finite embedding",
                    chunk.id
                )));
            }
            match expected_dimensions {
                None => expected_dimensions = Some(embedding.dimensions()),
                Some(d) if d != embedding.dimensions() => {
                    return Err(RagError::EmbeddingDimensionMismatch { expected: d, got: embedding.dimensions() });
                }
                _ => {}
            }
            validated.push((chunk, embedding));
        }

        state.expected_dimensions = expected_dimensions;
        for (chunk, embedding) in validated {
            state.embeddings.insert(chunk.id.clone(), embedding);
            state.chunks.insert(chunk.id.clone(), chunk);
        }
        state.cache = None;
        tracing::debug!(total = state.chunks.len(), "in-memory store updated");
        Ok(())
    }

    async fn search(
        &self,
        query: &Embedding,
        limit: usize,
        filter: Option<&FilterCondition>,
    ) -> Result<Vec<RetrievalResult>> {
        if limit == 0 {
            return Err(RagError::InvalidConfiguration("search limit must be >= 1".into()));
        }
        let mut state = self.lock();

        if filter.is_none() {
            if state.cache.is_none() {
                let mut ids = Vec::with_capacity(state.embeddings.len());
                let mut vecs = Vec::with_capacity(state.embeddings.len());
                for (id, emb) in state.embeddings.iter() {
                    ids.push(id.clone());
                    vecs.push(emb.values.clone());
                }
                state.cache = Some((ids, vecs));
            }
            let (ids, vecs) = state.cache.as_ref().unwrap();
            let scored: Vec<(String, String, f32)> = ids
                .iter()
                .zip(vecs.iter())
                .map(|(id, v)| (id.clone(), id.clone(), cosine(&query.values, v)))
                .collect();
            let top = top_k_by_score(scored, limit);
            return Ok(top
                .into_iter()
                .map(|(id, _, score)| RetrievalResult::new(state.chunks[&id].clone(), score))
                .collect());
        }

        let filter = filter.unwrap();
        let mut scored = Vec::new();
        for (id, chunk) in state.chunks.iter() {
            if !filter.matches(chunk) {
                continue;
            }
            if let Some(emb) = state.embeddings.get(id) {
                scored.push((id.clone(), id.clone(), cosine(&query.values, &emb.values)));
            }
        }
        let top = top_k_by_score(scored, limit);
        Ok(top
            .into_iter()
            .map(|(id, _, score)| RetrievalResult::new(state.chunks[&id].clone(), score))
            .collect())
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize> {
        let mut state = self.lock();
        let mut removed = 0;
        for id in ids {
            if state.chunks.remove(id).is_some() {
                state.embeddings.remove(id);
                removed += 1;
            }
        }
        if removed > 0 {
            state.cache = None;
        }
        tracing::debug!(removed, "in-memory store deleted by id");
        Ok(removed)
    }

    async fn delete_by_filter(&self, filter: &FilterCondition) -> Result<usize> {
        let mut state = self.lock();
        let to_remove: Vec<String> = state
            .chunks
            .values()
            .filter(|c| filter.matches(c))
            .map(|c| c.id.clone())
            .collect();
        for id in &to_remove {
            state.chunks.remove(id);
            state.embeddings.remove(id);
        }
        if !to_remove.is_empty() {
            state.cache = None;
        }
        tracing::debug!(removed = to_remove.len(), "in-memory store deleted by filter");
        Ok(to_remove.len())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.lock().chunks.len())
    }

    async fn dimensions(&self) -> Option<usize> {
        self.lock().expected_dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::ChunkMetadata;

    fn chunk(id: &str, vals: Vec<f32>) -> Chunk {
        let meta = ChunkMetadata::new("doc1", 0, 0, 10);
        Chunk::new(id, "content", meta).with_embedding(Embedding::new(vals))
    }

    #[tokio::test]
    async fn add_then_search_returns_closest_first() {
        let store = InMemoryVectorStore::new();
        store
            .add(vec![
                chunk("a", vec![1.0, 0.0]),
                chunk("b", vec![0.0, 1.0]),
                chunk("c", vec![0.9, 0.1]),
            ])
            .await
            .unwrap();

        let results = store
            .search(&Embedding::new(vec![1.0, 0.0]), 2, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.id, "a");
    }

    #[tokio::test]
    async fn upsert_replaces_chunk_and_embedding() {
        let store = InMemoryVectorStore::new();
        store.add(vec![chunk("a", vec![1.0, 0.0])]).await.unwrap();
        store.add(vec![chunk("a", vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        let results = store
            .search(&Embedding::new(vec![0.0, 1.0]), 1, None)
            .await
            .unwrap();
        assert!((results[0].score - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn add_rejects_whole_batch_without_inserting_earlier_chunks() {
        let store = InMemoryVectorStore::new();
        let err = store
            .add(vec![chunk("a", vec![1.0, 0.0]), chunk("b", vec![1.0, 0.0, 0.0])])
            .await;
        assert!(matches!(err, Err(RagError::EmbeddingDimensionMismatch { .. })));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let store = InMemoryVectorStore::new();
        store.add(vec![chunk("a", vec![1.0, 0.0])]).await.unwrap();
        let err = store.add(vec![chunk("b", vec![1.0, 0.0, 0.0])]).await;
        assert!(matches!(err, Err(RagError::EmbeddingDimensionMismatch { .. })));
    }

    #[tokio::test]
    async fn delete_by_ids_is_idempotent() {
        let store = InMemoryVectorStore::new();
        store.add(vec![chunk("a", vec![1.0, 0.0])]).await.unwrap();
        assert_eq!(store.delete_by_ids(&["a".to_string()]).await.unwrap(), 1);
        assert_eq!(store.delete_by_ids(&["a".to_string()]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = InMemoryVectorStore::new();
        store
            .add(vec![chunk("a", vec![1.0, 0.0]), chunk("b", vec![0.0, 1.0])])
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        store.save(&path).unwrap();

        let loaded = InMemoryVectorStore::new();
        loaded.load(&path).unwrap();
        assert_eq!(loaded.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn load_rejects_malformed_without_mutating_state() {
        let store = InMemoryVectorStore::new();
        store.add(vec![chunk("a", vec![1.0, 0.0])]).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"not json").unwrap();

        assert!(store.load(&path).is_err());
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
