//! SQLite-backed vector store (spec.md §4.5).
//!
//! Grounded on the pack's `sqlite_vec.rs` stores: a single `rusqlite`
//! connection guarded by a mutex, synchronous queries dispatched through
//! `tokio::task::spawn_blocking`, embeddings packed as little-endian `f32`
//! blobs via `zerocopy`. Unlike those stores this one does not depend on the
//! `sqlite-vec` virtual-table extension — spec.md's ANN non-goal rules out
//! index-accelerated KNN, so search is always a brute-force scan scored by
//! [`crate::vector::cosine`], shaped by the configured [`MemoryStrategy`].

use std::collections::BinaryHeap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};
use tokio::task::spawn_blocking;
use zerocopy::AsBytes;

use crate::entities::{Chunk, ChunkMetadata, CustomMetadata, Embedding, RetrievalResult};
use crate::error::{RagError, Result};
use crate::filter::FilterCondition;
use crate::store::memory_strategy::{EmbeddingCache, MemoryStrategy};
use crate::store::VectorStore;
use crate::topk::FloatOrd;
use crate::vector::cosine;

fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A SQLite-backed vector store.
pub struct SqliteVectorStore {
    conn: Arc<Mutex<Connection>>,
    table: String,
    expected_dimensions: Mutex<Option<usize>>,
    strategy: MemoryStrategy,
    cache: Option<EmbeddingCache>,
}

impl SqliteVectorStore {
    /// Opens (creating if needed) a SQLite database file with the given
    /// table name and memory strategy. `table` must match `[A-Za-z][A-Za-z0-9_]*`.
    pub fn open(path: &Path, table: &str, strategy: MemoryStrategy) -> Result<Self> {
        if !is_valid_table_name(table) {
            return Err(RagError::InvalidConfiguration(format!(
                "invalid table name: {table}"
            )));
        }
        let conn = Connection::open(path)
            .map_err(|e| RagError::VectorStoreConnectionFailed(e.to_string()))?;
        Self::init_schema(&conn, table)?;
        tracing::debug!(path = %path.display(), table, ?strategy, "opened sqlite vector store");
        let cache = match strategy {
            MemoryStrategy::LruCached { capacity } => Some(EmbeddingCache::new(capacity)),
            MemoryStrategy::Hybrid { capacity, .. } => Some(EmbeddingCache::new(capacity)),
            _ => None,
        };
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            table: table.to_string(),
            expected_dimensions: Mutex::new(None),
            strategy,
            cache,
        })
    }

    fn init_schema(conn: &Connection, table: &str) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                document_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                start_offset INTEGER NOT NULL,
                end_offset INTEGER NOT NULL,
                source TEXT,
                custom_metadata TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_document_id ON {table}(document_id);
            CREATE INDEX IF NOT EXISTS idx_{table}_chunk_index ON {table}(chunk_index);"
        );
        conn.execute_batch(&sql)
            .map_err(|e| RagError::VectorStoreConnectionFailed(format!("schema init failed: {e}")))?;
        Ok(())
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&guard)
        })
        .await
        .map_err(|e| RagError::SearchFailed(format!("blocking task failed: {e}")))?
    }

    fn decode_row(row: &rusqlite::Row) -> rusqlite::Result<(Chunk, Embedding)> {
        let id: String = row.get(0)?;
        let content: String = row.get(1)?;
        let emb_bytes: Vec<u8> = row.get(2)?;
        let document_id: String = row.get(3)?;
        let chunk_index: i64 = row.get(4)?;
        let start_offset: i64 = row.get(5)?;
        let end_offset: i64 = row.get(6)?;
        let source: Option<String> = row.get(7)?;
        let custom_json: String = row.get(8)?;

        let values: Vec<f32> = emb_bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let custom: CustomMetadata = serde_json::from_str(&custom_json).unwrap_or_default();

        let mut meta = ChunkMetadata::new(document_id, chunk_index.max(0) as usize, start_offset.max(0) as usize, end_offset.max(0) as usize);
        meta.source = source;
        meta.custom = custom;

        let chunk = Chunk::new(id.clone(), content, meta);
        let embedding = Embedding::new(values);
        Ok((chunk, embedding))
    }

    fn encode_embedding(embedding: &Embedding) -> Vec<u8> {
        embedding.values.as_bytes().to_vec()
    }

    fn scan_all(conn: &Connection, table: &str) -> Result<Vec<(Chunk, Embedding)>> {
        let sql = format!("SELECT id, content, embedding, document_id, chunk_index, start_offset, end_offset, source, custom_metadata FROM {table}");
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| RagError::SearchFailed(e.to_string()))?;
        let rows = stmt
            .query_map([], Self::decode_row)
            .map_err(|e| RagError::SearchFailed(e.to_string()))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| RagError::SearchFailed(e.to_string()))?);
        }
        Ok(out)
    }

    /// One page of `batch_size` rows starting at `offset`, for the
    /// `Streaming` strategy's bounded-memory scan.
    fn scan_batch(conn: &Connection, table: &str, offset: usize, batch_size: usize) -> Result<Vec<(Chunk, Embedding)>> {
        let sql = format!("SELECT id, content, embedding, document_id, chunk_index, start_offset, end_offset, source, custom_metadata FROM {table} LIMIT ?1 OFFSET ?2");
        let mut stmt = conn.prepare(&sql).map_err(|e| RagError::SearchFailed(e.to_string()))?;
        let rows = stmt
            .query_map(params![batch_size as i64, offset as i64], Self::decode_row)
            .map_err(|e| RagError::SearchFailed(e.to_string()))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| RagError::SearchFailed(e.to_string()))?);
        }
        Ok(out)
    }

    /// Rows without decoding the embedding blob, for the cached strategies'
    /// cache-first scan.
    fn scan_metadata_only(conn: &Connection, table: &str) -> Result<Vec<Chunk>> {
        let sql = format!("SELECT id, content, document_id, chunk_index, start_offset, end_offset, source, custom_metadata FROM {table}");
        let mut stmt = conn.prepare(&sql).map_err(|e| RagError::SearchFailed(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let content: String = row.get(1)?;
                let document_id: String = row.get(2)?;
                let chunk_index: i64 = row.get(3)?;
                let start_offset: i64 = row.get(4)?;
                let end_offset: i64 = row.get(5)?;
                let source: Option<String> = row.get(6)?;
                let custom_json: String = row.get(7)?;
                Ok((id, content, document_id, chunk_index, start_offset, end_offset, source, custom_json))
            })
            .map_err(|e| RagError::SearchFailed(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows {
            let (id, content, document_id, chunk_index, start_offset, end_offset, source, custom_json) =
                row.map_err(|e| RagError::SearchFailed(e.to_string()))?;
            let custom: CustomMetadata = serde_json::from_str(&custom_json).unwrap_or_default();
            let mut meta = ChunkMetadata::new(document_id, chunk_index.max(0) as usize, start_offset.max(0) as usize, end_offset.max(0) as usize);
            meta.source = source;
            meta.custom = custom;
            out.push(Chunk::new(id, content, meta));
        }
        Ok(out)
    }

    /// One page of `batch_size` rows' metadata (no embedding blob), for the
    /// `Hybrid` strategy's paginated cold-row scan.
    fn scan_metadata_batch(conn: &Connection, table: &str, offset: usize, batch_size: usize) -> Result<Vec<Chunk>> {
        let sql = format!("SELECT id, content, document_id, chunk_index, start_offset, end_offset, source, custom_metadata FROM {table} LIMIT ?1 OFFSET ?2");
        let mut stmt = conn.prepare(&sql).map_err(|e| RagError::SearchFailed(e.to_string()))?;
        let rows = stmt
            .query_map(params![batch_size as i64, offset as i64], |row| {
                let id: String = row.get(0)?;
                let content: String = row.get(1)?;
                let document_id: String = row.get(2)?;
                let chunk_index: i64 = row.get(3)?;
                let start_offset: i64 = row.get(4)?;
                let end_offset: i64 = row.get(5)?;
                let source: Option<String> = row.get(6)?;
                let custom_json: String = row.get(7)?;
                Ok((id, content, document_id, chunk_index, start_offset, end_offset, source, custom_json))
            })
            .map_err(|e| RagError::SearchFailed(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows {
            let (id, content, document_id, chunk_index, start_offset, end_offset, source, custom_json) =
                row.map_err(|e| RagError::SearchFailed(e.to_string()))?;
            let custom: CustomMetadata = serde_json::from_str(&custom_json).unwrap_or_default();
            let mut meta = ChunkMetadata::new(document_id, chunk_index.max(0) as usize, start_offset.max(0) as usize, end_offset.max(0) as usize);
            meta.source = source;
            meta.custom = custom;
            out.push(Chunk::new(id, content, meta));
        }
        Ok(out)
    }

    /// Embeddings for a batch of cache-miss ids in one query, for the
    /// `Hybrid` strategy's cold-row fetch.
    fn embeddings_for_ids(conn: &Connection, table: &str, ids: &[String]) -> Result<std::collections::HashMap<String, Embedding>> {
        if ids.is_empty() {
            return Ok(std::collections::HashMap::new());
        }
        let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
        let sql = format!("SELECT id, embedding FROM {table} WHERE id IN ({})", placeholders.join(","));
        let mut stmt = conn.prepare(&sql).map_err(|e| RagError::SearchFailed(e.to_string()))?;
        let params_vec: Vec<&dyn rusqlite::ToSql> = ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
        let rows = stmt
            .query_map(params_vec.as_slice(), |row| {
                let id: String = row.get(0)?;
                let bytes: Vec<u8> = row.get(1)?;
                Ok((id, bytes))
            })
            .map_err(|e| RagError::SearchFailed(e.to_string()))?;
        let mut out = std::collections::HashMap::new();
        for row in rows {
            let (id, bytes) = row.map_err(|e| RagError::SearchFailed(e.to_string()))?;
            let values: Vec<f32> = bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect();
            out.insert(id, Embedding::new(values));
        }
        Ok(out)
    }

    fn embedding_bytes_for_id(conn: &Connection, table: &str, id: &str) -> Result<Option<Embedding>> {
        let sql = format!("SELECT embedding FROM {table} WHERE id = ?1");
        match conn.query_row(&sql, params![id], |row| row.get::<_, Vec<u8>>(0)) {
            Ok(bytes) => {
                let values: Vec<f32> = bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                Ok(Some(Embedding::new(values)))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(RagError::SearchFailed(e.to_string())),
        }
    }

    pub async fn chunk_by_id(&self, id: &str) -> Result<Option<Chunk>> {
        let table = self.table.clone();
        let id = id.to_string();
        self.with_conn(move |conn| {
            let sql = format!("SELECT id, content, embedding, document_id, chunk_index, start_offset, end_offset, source, custom_metadata FROM {table} WHERE id = ?1");
            match conn.query_row(&sql, params![id], Self::decode_row) {
                Ok((chunk, _)) => Ok(Some(chunk)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(RagError::SearchFailed(e.to_string())),
            }
        })
        .await
    }

    pub async fn embedding_by_id(&self, id: &str) -> Result<Option<Embedding>> {
        let table = self.table.clone();
        let id = id.to_string();
        self.with_conn(move |conn| {
            let sql = format!("SELECT id, content, embedding, document_id, chunk_index, start_offset, end_offset, source, custom_metadata FROM {table} WHERE id = ?1");
            match conn.query_row(&sql, params![id], Self::decode_row) {
                Ok((_, embedding)) => Ok(Some(embedding)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(RagError::SearchFailed(e.to_string())),
            }
        })
        .await
    }

    pub async fn contains_id(&self, id: &str) -> Result<bool> {
        Ok(self.chunk_by_id(id).await?.is_some())
    }

    pub async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let table = self.table.clone();
        let document_id = document_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!("SELECT id, content, embedding, document_id, chunk_index, start_offset, end_offset, source, custom_metadata FROM {table} WHERE document_id = ?1 ORDER BY chunk_index ASC");
            let mut stmt = conn.prepare(&sql).map_err(|e| RagError::SearchFailed(e.to_string()))?;
            let rows = stmt
                .query_map(params![document_id], Self::decode_row)
                .map_err(|e| RagError::SearchFailed(e.to_string()))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|e| RagError::SearchFailed(e.to_string()))?.0);
            }
            Ok(out)
        })
        .await
    }

    pub async fn all_document_ids(&self) -> Result<Vec<String>> {
        let table = self.table.clone();
        self.with_conn(move |conn| {
            let sql = format!("SELECT DISTINCT document_id FROM {table}");
            let mut stmt = conn.prepare(&sql).map_err(|e| RagError::SearchFailed(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| RagError::SearchFailed(e.to_string()))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|e| RagError::SearchFailed(e.to_string()))?);
            }
            Ok(out)
        })
        .await
    }

    fn finish_results(by_id: std::collections::HashMap<String, (Chunk, f32)>, limit: usize) -> Vec<RetrievalResult> {
        let mut results: Vec<RetrievalResult> = by_id
            .into_values()
            .map(|(chunk, score)| RetrievalResult::new(chunk, score))
            .collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        results.truncate(limit);
        results
    }

    pub async fn clear(&self) -> Result<()> {
        let table = self.table.clone();
        self.with_conn(move |conn| {
            let sql = format!("DELETE FROM {table}");
            conn.execute(&sql, []).map_err(|e| RagError::SearchFailed(e.to_string()))?;
            Ok(())
        })
        .await?;
        *self.expected_dimensions.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn add(&self, chunks: Vec<Chunk>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        tracing::debug!(chunks = chunks.len(), table = %self.table, "sqlite store add");
        {
            let mut dims = self.expected_dimensions.lock().unwrap_or_else(|e| e.into_inner());
            for chunk in &chunks {
                let emb = chunk
                    .embedding
                    .as_ref()
                    .ok_or_else(|| RagError::InsertionFailed(format!("chunk {} has no embedding", chunk.id)))?;
                if !emb.is_valid() {
                    return Err(RagError::InsertionFailed(format!("chunk {} has a non-finite embedding", chunk.id)));
                }
                match *dims {
                    None => *dims = Some(emb.dimensions()),
                    Some(d) if d != emb.dimensions() => {
                        return Err(RagError::EmbeddingDimensionMismatch { expected: d, got: emb.dimensions() });
                    }
                    _ => {}
                }
            }
        }

        let table = self.table.clone();
        let chunks_owned = chunks;
        let chunks_for_cache = chunks_owned.clone();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction().map_err(|e| RagError::InsertionFailed(e.to_string()))?;
            {
                let sql = format!(
                    "INSERT OR REPLACE INTO {table}
                    (id, content, embedding, document_id, chunk_index, start_offset, end_offset, source, custom_metadata, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                );
                let mut stmt = tx.prepare(&sql).map_err(|e| RagError::InsertionFailed(e.to_string()))?;
                for chunk in &chunks_owned {
                    let embedding = chunk.embedding.as_ref().unwrap();
                    let custom_json = serde_json::to_string(&chunk.metadata.custom)
                        .map_err(|e| RagError::InsertionFailed(e.to_string()))?;
                    stmt.execute(params![
                        chunk.id,
                        chunk.content,
                        SqliteVectorStore::encode_embedding(embedding),
                        chunk.metadata.document_id,
                        chunk.metadata.index as i64,
                        chunk.metadata.start_offset as i64,
                        chunk.metadata.end_offset as i64,
                        chunk.metadata.source,
                        custom_json,
                        chrono::Utc::now().timestamp(),
                    ])
                    .map_err(|e| RagError::InsertionFailed(e.to_string()))?;
                }
            }
            tx.commit().map_err(|e| RagError::InsertionFailed(e.to_string()))?;
            Ok(())
        })
        .await?;

        if let Some(cache) = &self.cache {
            for chunk in &chunks_for_cache {
                if let Some(embedding) = &chunk.embedding {
                    cache.put(chunk.id.clone(), embedding.clone());
                }
            }
        }
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
        let table = self.table.clone();
        let query_values = query.values.clone();
        let filter = filter.cloned();
        let strategy = self.strategy;

        match strategy {
            MemoryStrategy::Streaming { batch_size } => {
                self.with_conn(move |conn| {
                    let mut by_id: std::collections::HashMap<String, (Chunk, f32)> = std::collections::HashMap::new();
                    let mut heap: BinaryHeap<std::cmp::Reverse<(FloatOrd, std::cmp::Reverse<String>)>> = BinaryHeap::new();
                    let mut offset = 0usize;
                    loop {
                        let rows = SqliteVectorStore::scan_batch(conn, &table, offset, batch_size)?;
                        if rows.is_empty() {
                            break;
                        }
                        let fetched = rows.len();
                        for (chunk, embedding) in rows {
                            if let Some(f) = &filter {
                                if !f.matches(&chunk) {
                                    continue;
                                }
                            }
                            let score = cosine(&query_values, &embedding.values);
                            heap.push(std::cmp::Reverse((FloatOrd(score), std::cmp::Reverse(chunk.id.clone()))));
                            by_id.insert(chunk.id.clone(), (chunk, score));
                            if heap.len() > limit {
                                if let Some(std::cmp::Reverse((FloatOrd(_), std::cmp::Reverse(evict_id)))) = heap.pop() {
                                    by_id.remove(&evict_id);
                                }
                            }
                        }
                        offset += fetched;
                        if fetched < batch_size {
                            break;
                        }
                    }
                    Ok(Self::finish_results(by_id, limit))
                })
                .await
            }
            MemoryStrategy::LruCached { .. } => {
                let cache = self.cache.as_ref().expect("cache present for cached strategies");
                self.with_conn(move |conn| {
                    let rows = SqliteVectorStore::scan_metadata_only(conn, &table)?;
                    let mut by_id: std::collections::HashMap<String, (Chunk, f32)> = std::collections::HashMap::new();
                    let mut heap: BinaryHeap<std::cmp::Reverse<(FloatOrd, std::cmp::Reverse<String>)>> = BinaryHeap::new();

                    for chunk in rows {
                        if let Some(f) = &filter {
                            if !f.matches(&chunk) {
                                continue;
                            }
                        }
                        let embedding = match cache.get(&chunk.id) {
                            Some(e) => e,
                            None => match SqliteVectorStore::embedding_bytes_for_id(conn, &table, &chunk.id)? {
                                Some(e) => {
                                    cache.put(chunk.id.clone(), e.clone());
                                    e
                                }
                                None => continue,
                            },
                        };
                        let score = cosine(&query_values, &embedding.values);
                        heap.push(std::cmp::Reverse((FloatOrd(score), std::cmp::Reverse(chunk.id.clone()))));
                        by_id.insert(chunk.id.clone(), (chunk, score));
                        if heap.len() > limit {
                            if let Some(std::cmp::Reverse((FloatOrd(_), std::cmp::Reverse(evict_id)))) = heap.pop() {
                                by_id.remove(&evict_id);
                            }
                        }
                    }
                    Ok(Self::finish_results(by_id, limit))
                })
                .await
            }
            MemoryStrategy::Hybrid { batch_size, .. } => {
                let cache = self.cache.as_ref().expect("cache present for cached strategies");
                self.with_conn(move |conn| {
                    let mut by_id: std::collections::HashMap<String, (Chunk, f32)> = std::collections::HashMap::new();
                    let mut heap: BinaryHeap<std::cmp::Reverse<(FloatOrd, std::cmp::Reverse<String>)>> = BinaryHeap::new();
                    let mut offset = 0usize;

                    loop {
                        let page = SqliteVectorStore::scan_metadata_batch(conn, &table, offset, batch_size)?;
                        if page.is_empty() {
                            break;
                        }
                        let fetched = page.len();

                        let mut hot: Vec<(Chunk, Embedding)> = Vec::new();
                        let mut cold: Vec<Chunk> = Vec::new();
                        for chunk in page {
                            if let Some(f) = &filter {
                                if !f.matches(&chunk) {
                                    continue;
                                }
                            }
                            match cache.get(&chunk.id) {
                                Some(embedding) => hot.push((chunk, embedding)),
                                None => cold.push(chunk),
                            }
                        }

                        if !cold.is_empty() {
                            let cold_ids: Vec<String> = cold.iter().map(|c| c.id.clone()).collect();
                            let embeddings = SqliteVectorStore::embeddings_for_ids(conn, &table, &cold_ids)?;
                            for chunk in cold {
                                if let Some(embedding) = embeddings.get(&chunk.id).cloned() {
                                    cache.put(chunk.id.clone(), embedding.clone());
                                    hot.push((chunk, embedding));
                                }
                            }
                        }

                        for (chunk, embedding) in hot {
                            let score = cosine(&query_values, &embedding.values);
                            heap.push(std::cmp::Reverse((FloatOrd(score), std::cmp::Reverse(chunk.id.clone()))));
                            by_id.insert(chunk.id.clone(), (chunk, score));
                            if heap.len() > limit {
                                if let Some(std::cmp::Reverse((FloatOrd(_), std::cmp::Reverse(evict_id)))) = heap.pop() {
                                    by_id.remove(&evict_id);
                                }
                            }
                        }

                        offset += fetched;
                        if fetched < batch_size {
                            break;
                        }
                    }
                    Ok(Self::finish_results(by_id, limit))
                })
                .await
            }
            MemoryStrategy::Eager => {
                self.with_conn(move |conn| {
                    let rows = SqliteVectorStore::scan_all(conn, &table)?;
                    let mut heap: BinaryHeap<std::cmp::Reverse<(FloatOrd, std::cmp::Reverse<String>)>> = BinaryHeap::new();
                    let mut by_id: std::collections::HashMap<String, (Chunk, f32)> = std::collections::HashMap::new();

                    for (chunk, embedding) in rows {
                        if let Some(f) = &filter {
                            if !f.matches(&chunk) {
                                continue;
                            }
                        }
                        let score = cosine(&query_values, &embedding.values);
                        heap.push(std::cmp::Reverse((FloatOrd(score), std::cmp::Reverse(chunk.id.clone()))));
                        by_id.insert(chunk.id.clone(), (chunk, score));
                        if heap.len() > limit {
                            if let Some(std::cmp::Reverse((FloatOrd(_), std::cmp::Reverse(evict_id)))) = heap.pop() {
                                by_id.remove(&evict_id);
                            }
                        }
                    }
                    Ok(Self::finish_results(by_id, limit))
                })
                .await
            }
        }
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize> {
        let table = self.table.clone();
        let ids = ids.to_vec();
        let result = self
            .with_conn(move |conn| {
                let tx = conn.unchecked_transaction().map_err(|e| RagError::SearchFailed(e.to_string()))?;
                let mut removed = 0;
                {
                    let sql = format!("DELETE FROM {table} WHERE id = ?1");
                    let mut stmt = tx.prepare(&sql).map_err(|e| RagError::SearchFailed(e.to_string()))?;
                    for id in &ids {
                        removed += stmt.execute(params![id]).map_err(|e| RagError::SearchFailed(e.to_string()))?;
                    }
                }
                tx.commit().map_err(|e| RagError::SearchFailed(e.to_string()))?;
                Ok(removed)
            })
            .await;
        if let Ok(removed) = &result {
            tracing::debug!(removed, table = %self.table, "sqlite store deleted by id");
        }
        result
    }

    async fn delete_by_filter(&self, filter: &FilterCondition) -> Result<usize> {
        let table = self.table.clone();
        let filter = filter.clone();
        let removed = self
            .with_conn(move |conn| {
                let rows = SqliteVectorStore::scan_all(conn, &table)?;
                let to_remove: Vec<String> = rows
                    .into_iter()
                    .filter(|(c, _)| filter.matches(c))
                    .map(|(c, _)| c.id)
                    .collect();

                let tx = conn.unchecked_transaction().map_err(|e| RagError::SearchFailed(e.to_string()))?;
                {
                    let sql = format!("DELETE FROM {table} WHERE id = ?1");
                    let mut stmt = tx.prepare(&sql).map_err(|e| RagError::SearchFailed(e.to_string()))?;
                    for id in &to_remove {
                        stmt.execute(params![id]).map_err(|e| RagError::SearchFailed(e.to_string()))?;
                    }
                }
                tx.commit().map_err(|e| RagError::SearchFailed(e.to_string()))?;
                Ok(to_remove.len())
            })
            .await?;
        tracing::debug!(removed, table = %self.table, "sqlite store deleted by filter");
        Ok(removed)
    }

    async fn count(&self) -> Result<usize> {
        let table = self.table.clone();
        self.with_conn(move |conn| {
            let sql = format!("SELECT COUNT(*) FROM {table}");
            let count: i64 = conn.query_row(&sql, [], |r| r.get(0)).map_err(|e| RagError::SearchFailed(e.to_string()))?;
            Ok(count as usize)
        })
        .await
    }

    async fn dimensions(&self) -> Option<usize> {
        *self.expected_dimensions.lock().unwrap_or_else(|e| e.into_inner())
    }
}
