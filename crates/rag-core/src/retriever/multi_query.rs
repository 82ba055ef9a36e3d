//! Multi-query expansion retriever (spec.md §4.6, §9 "prompt injection
//! mitigation"): asks a language model for reworded variants of the query,
//! retrieves with each, and merges by chunk id keeping the higher score.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::entities::RetrievalResult;
use crate::error::{RagError, Result};
use crate::filter::FilterCondition;
use crate::providers::{GenerationOptions, LLMProvider};
use crate::retriever::{guard, sort_by_score_then_id, Retriever};

const MAX_SANITIZED_LEN: usize = 1_000;
pub const DEFAULT_TEMPLATE: &str = "Generate alternative phrasings of this search query, one per line: {query}";

pub struct MultiQueryRetriever {
    base: Arc<dyn Retriever>,
    llm: Arc<dyn LLMProvider>,
    n: usize,
    template: String,
}

impl MultiQueryRetriever {
    pub fn new(base: Arc<dyn Retriever>, llm: Arc<dyn LLMProvider>, n: usize) -> Result<Self> {
        Self::with_template(base, llm, n, DEFAULT_TEMPLATE.to_string())
    }

    pub fn with_template(base: Arc<dyn Retriever>, llm: Arc<dyn LLMProvider>, n: usize, template: String) -> Result<Self> {
        if !(1..=10).contains(&n) {
            return Err(RagError::InvalidConfiguration("multi-query n must be in [1, 10]".into()));
        }
        Ok(Self { base, llm, n, template })
    }

    /// Strips control characters and truncates to mitigate prompt injection
    /// via an untrusted query echoed back by the LLM.
    fn sanitize(text: &str) -> String {
        let cleaned: String = text.chars().filter(|c| !c.is_control()).collect();
        cleaned.chars().take(MAX_SANITIZED_LEN).collect()
    }

    async fn generate_rewordings(&self, query: &str) -> Vec<String> {
        let prompt = self.template.replace("{query}", query);
        let response = match self.llm.generate(&prompt, None, &GenerationOptions::default()).await {
            Ok(text) => text,
            Err(_) => return Vec::new(),
        };
        response
            .lines()
            .map(Self::sanitize)
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .take(self.n)
            .collect()
    }
}

#[async_trait]
impl Retriever for MultiQueryRetriever {
    async fn retrieve(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&FilterCondition>,
    ) -> Result<Vec<RetrievalResult>> {
        if let Some(early) = guard(query, limit) {
            return early;
        }

        let mut queries = vec![query.to_string()];
        queries.extend(self.generate_rewordings(query).await);

        let mut best: HashMap<String, RetrievalResult> = HashMap::new();
        for q in &queries {
            let results = self.base.retrieve(q, limit, filter).await?;
            for result in results {
                best.entry(result.chunk.id.clone())
                    .and_modify(|existing| {
                        if result.score > existing.score {
                            *existing = result.clone();
                        }
                    })
                    .or_insert(result);
            }
        }

        let mut merged: Vec<RetrievalResult> = best.into_values().collect();
        sort_by_score_then_id(&mut merged);
        merged.truncate(limit);
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Chunk, ChunkMetadata};
    use std::sync::Mutex;

    struct ScriptedLLM(Result<String>);

    #[async_trait]
    impl LLMProvider for ScriptedLLM {
        fn name(&self) -> &str {
            "scripted"
        }
        fn model(&self) -> &str {
            "scripted-1"
        }
        fn max_context_tokens(&self) -> usize {
            4096
        }
        async fn generate(&self, _prompt: &str, _system_prompt: Option<&str>, _options: &GenerationOptions) -> Result<String> {
            self.0.clone()
        }
        async fn stream(&self, prompt: &str, system_prompt: Option<&str>, options: &GenerationOptions) -> Result<Vec<String>> {
            Ok(vec![self.generate(prompt, system_prompt, options).await?])
        }
    }

    struct ScriptedRetriever(Mutex<Vec<(String, Vec<RetrievalResult>)>>);

    #[async_trait]
    impl Retriever for ScriptedRetriever {
        async fn retrieve(&self, query: &str, _limit: usize, _filter: Option<&FilterCondition>) -> Result<Vec<RetrievalResult>> {
            let mut calls = self.0.lock().unwrap();
            calls.push((query.to_string(), Vec::new()));
            Ok(match query {
                "original" => vec![result("a", 0.5)],
                "reworded" => vec![result("a", 0.9), result("b", 0.4)],
                _ => Vec::new(),
            })
        }
    }

    fn result(id: &str, score: f32) -> RetrievalResult {
        RetrievalResult::new(Chunk::new(id, "content", ChunkMetadata::new("doc1", 0, 0, 1)), score)
    }

    #[tokio::test]
    async fn merges_by_id_keeping_higher_score() {
        let llm = Arc::new(ScriptedLLM(Ok("reworded".to_string())));
        let base = Arc::new(ScriptedRetriever(Mutex::new(Vec::new())));
        let retriever = MultiQueryRetriever::new(base, llm, 1).unwrap();

        let results = retriever.retrieve("original", 5, None).await.unwrap();
        let score_of = |id: &str| results.iter().find(|r| r.chunk.id == id).unwrap().score;
        assert!((score_of("a") - 0.9).abs() < 1e-6);
        assert!((score_of("b") - 0.4).abs() < 1e-6);
    }

    #[tokio::test]
    async fn generation_failure_falls_back_to_original_query() {
        let llm = Arc::new(ScriptedLLM(Err(RagError::GenerationFailed("boom".into()))));
        let base = Arc::new(ScriptedRetriever(Mutex::new(Vec::new())));
        let retriever = MultiQueryRetriever::new(base, llm, 3).unwrap();

        let results = retriever.retrieve("original", 5, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.id, "a");
    }

    #[test]
    fn sanitize_strips_control_chars_and_truncates() {
        let long = "a".repeat(2_000);
        let sanitized = MultiQueryRetriever::sanitize(&format!("\u{0007}{long}"));
        assert_eq!(sanitized.len(), MAX_SANITIZED_LEN);
        assert!(!sanitized.contains('\u{0007}'));
    }

    #[test]
    fn invalid_n_rejected() {
        let llm = Arc::new(ScriptedLLM(Ok(String::new())));
        let base = Arc::new(ScriptedRetriever(Mutex::new(Vec::new())));
        assert!(MultiQueryRetriever::new(base, llm, 0).is_err());
    }
}
