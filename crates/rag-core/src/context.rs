//! Context builder (spec.md §4.7): assembles retrieved chunks into a
//! token-bounded prompt, optionally capping how many chunks from the same
//! source may appear.

use crate::entities::RetrievalResult;

const DEFAULT_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone)]
pub struct ContextBuilderConfig {
    pub include_metadata: bool,
    pub include_score: bool,
    pub separator: String,
    /// Maximum chunks from the same source name that may appear; `None`
    /// means unbounded.
    pub per_source_cap: Option<usize>,
}

impl Default for ContextBuilderConfig {
    fn default() -> Self {
        Self {
            include_metadata: true,
            include_score: false,
            separator: DEFAULT_SEPARATOR.to_string(),
            per_source_cap: None,
        }
    }
}

/// A single chunk's place in the assembled context, emitted by
/// [`ContextBuilder::build_structured`] without flattening to a string.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBlock {
    pub index: usize,
    pub content: String,
    pub source: Option<String>,
    pub score: f32,
}

pub struct ContextBuilder {
    config: ContextBuilderConfig,
}

/// Approximate token count via a simple word/punctuation split — consistent
/// with the callers this budgets for, not a model-specific BPE tokenizer
/// (spec.md §1 non-goal).
pub fn approximate_token_count(text: &str) -> usize {
    let mut count = 0;
    let mut in_word = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if !in_word {
                count += 1;
                in_word = true;
            }
        } else {
            in_word = false;
            if !c.is_whitespace() {
                count += 1;
            }
        }
    }
    count
}

fn source_name(result: &RetrievalResult) -> String {
    result.chunk.metadata.source.clone().unwrap_or_else(|| result.chunk.metadata.document_id.clone())
}

fn format_block(index: usize, result: &RetrievalResult, config: &ContextBuilderConfig) -> String {
    if !config.include_metadata {
        return result.chunk.content.clone();
    }
    let mut header = format!("[Source {}] ({})", index + 1, source_name(result));
    if config.include_score {
        header.push_str(&format!(" [score: {:.4}]", result.score));
    }
    format!("{header}\n{}", result.chunk.content)
}

/// Applies the per-source cap: ranked results are kept in order, dropping
/// any result once its source has already contributed `cap` chunks.
fn apply_per_source_cap(results: &[RetrievalResult], cap: Option<usize>) -> Vec<RetrievalResult> {
    let Some(cap) = cap else { return results.to_vec() };
    let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let mut kept = Vec::new();
    for result in results {
        let source = source_name(result);
        let count = counts.entry(source).or_insert(0);
        if *count < cap {
            *count += 1;
            kept.push(result.clone());
        }
    }
    kept
}

impl ContextBuilder {
    pub fn new(config: ContextBuilderConfig) -> Self {
        Self { config }
    }

    /// Formats `results` into a single string under `token_budget`, applying
    /// the per-source cap first, then greedily adding blocks (separated by
    /// [`ContextBuilderConfig::separator`]) until the next block would
    /// exceed the budget.
    pub fn build(&self, results: &[RetrievalResult], token_budget: usize) -> String {
        let capped = apply_per_source_cap(results, self.config.per_source_cap);
        let mut out = String::new();
        let mut tokens = 0usize;

        for (i, result) in capped.iter().enumerate() {
            let block = format_block(i, result, &self.config);
            let separator_tokens = if out.is_empty() { 0 } else { approximate_token_count(&self.config.separator) };
            let block_tokens = approximate_token_count(&block);
            if tokens + separator_tokens + block_tokens > token_budget {
                break;
            }
            if !out.is_empty() {
                out.push_str(&self.config.separator);
            }
            out.push_str(&block);
            tokens += separator_tokens + block_tokens;
        }
        out
    }

    /// Structured variant of [`Self::build`]: one [`ContextBlock`] per kept
    /// chunk, without the separator/header formatting.
    pub fn build_structured(&self, results: &[RetrievalResult], token_budget: usize) -> Vec<ContextBlock> {
        let capped = apply_per_source_cap(results, self.config.per_source_cap);
        let mut out = Vec::new();
        let mut tokens = 0usize;

        for (i, result) in capped.iter().enumerate() {
            let content_tokens = approximate_token_count(&result.chunk.content);
            if tokens + content_tokens > token_budget {
                break;
            }
            tokens += content_tokens;
            out.push(ContextBlock {
                index: i,
                content: result.chunk.content.clone(),
                source: result.chunk.metadata.source.clone(),
                score: result.score,
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Chunk, ChunkMetadata};

    fn result(id: &str, source: &str, content: &str, score: f32) -> RetrievalResult {
        let mut meta = ChunkMetadata::new("doc1", 0, 0, content.len());
        meta.source = Some(source.to_string());
        RetrievalResult::new(Chunk::new(id, content, meta), score)
    }

    #[test]
    fn property_context_respects_token_budget() {
        let builder = ContextBuilder::new(ContextBuilderConfig::default());
        let results: Vec<RetrievalResult> = (0..20)
            .map(|i| result(&format!("c{i}"), "s1", "word word word word word", 1.0 - i as f32 * 0.01))
            .collect();
        let context = builder.build(&results, 20);
        assert!(approximate_token_count(&context) <= 20);
    }

    #[test]
    fn per_source_cap_limits_contributions() {
        let config = ContextBuilderConfig { per_source_cap: Some(1), ..Default::default() };
        let builder = ContextBuilder::new(config);
        let results = vec![result("a", "s1", "first", 0.9), result("b", "s1", "second", 0.8), result("c", "s2", "third", 0.7)];
        let context = builder.build(&results, 10_000);
        assert!(context.contains("first"));
        assert!(!context.contains("second"));
        assert!(context.contains("third"));
    }

    #[test]
    fn include_metadata_adds_source_header() {
        let builder = ContextBuilder::new(ContextBuilderConfig::default());
        let results = vec![result("a", "news", "hello", 0.9)];
        let context = builder.build(&results, 10_000);
        assert!(context.starts_with("[Source 1] (news)"));
    }

    #[test]
    fn structured_variant_does_not_flatten() {
        let builder = ContextBuilder::new(ContextBuilderConfig::default());
        let results = vec![result("a", "news", "hello", 0.9)];
        let blocks = builder.build_structured(&results, 10_000);
        assert_eq!(blocks[0].content, "hello");
        assert_eq!(blocks[0].source.as_deref(), Some("news"));
    }
}
