//! Parent/child hierarchical retrieval (spec.md §4.6): search over
//! small child embeddings, aggregate their scores by parent, and return the
//! larger parent chunks resolved through an external [`ParentLookup`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::entities::RetrievalResult;
use crate::error::Result;
use crate::filter::{FilterCondition, FilterOp};
use crate::providers::ParentLookup;
use crate::retriever::{guard, sort_by_score_then_id, Retriever};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationMethod {
    Max,
    Average,
    Sum,
}

pub struct ParentChildRetriever {
    child_retriever: Arc<dyn Retriever>,
    parent_lookup: Arc<dyn ParentLookup>,
    aggregation: AggregationMethod,
}

impl ParentChildRetriever {
    pub fn new(child_retriever: Arc<dyn Retriever>, parent_lookup: Arc<dyn ParentLookup>, aggregation: AggregationMethod) -> Self {
        Self { child_retriever, parent_lookup, aggregation }
    }
}

fn aggregate(scores: &[f32], method: AggregationMethod) -> f32 {
    match method {
        AggregationMethod::Max => scores.iter().copied().fold(f32::NEG_INFINITY, f32::max),
        AggregationMethod::Sum => scores.iter().sum(),
        AggregationMethod::Average => scores.iter().sum::<f32>() / scores.len() as f32,
    }
}

fn aggregation_name(method: AggregationMethod) -> &'static str {
    match method {
        AggregationMethod::Max => "max",
        AggregationMethod::Average => "average",
        AggregationMethod::Sum => "sum",
    }
}

#[async_trait]
impl Retriever for ParentChildRetriever {
    async fn retrieve(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&FilterCondition>,
    ) -> Result<Vec<RetrievalResult>> {
        if let Some(early) = guard(query, limit) {
            return early;
        }
        let is_child = FilterCondition::field("isChild", FilterOp::Equals(true.into()));
        let child_filter = match filter {
            Some(f) => FilterCondition::And(vec![is_child, f.clone()]),
            None => is_child,
        };

        // Widen the child fetch since several children typically roll up
        // into the same parent.
        let child_results = self.child_retriever.retrieve(query, limit * 4, Some(&child_filter)).await?;
        if child_results.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_parent: HashMap<String, Vec<f32>> = HashMap::new();
        let mut best_child_score: HashMap<String, f32> = HashMap::new();
        let mut matched_children: HashMap<String, usize> = HashMap::new();
        for result in &child_results {
            let Some(parent_id) = result.chunk.metadata.parent_id.clone() else { continue };
            by_parent.entry(parent_id.clone()).or_default().push(result.score);
            let best = best_child_score.entry(parent_id.clone()).or_insert(f32::NEG_INFINITY);
            if result.score > *best {
                *best = result.score;
            }
            *matched_children.entry(parent_id).or_insert(0) += 1;
        }

        let mut ranked: Vec<(String, f32)> = by_parent
            .iter()
            .map(|(id, scores)| (id.clone(), aggregate(scores, self.aggregation)))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);

        let mut results = Vec::with_capacity(ranked.len());
        for (parent_id, score) in ranked {
            let Some(parent_chunk) = self.parent_lookup.parent(&parent_id).await? else { continue };
            let result = RetrievalResult::new(parent_chunk, score)
                .with_metadata("matchedChildren", (matched_children[&parent_id] as i64).into())
                .with_metadata("bestChildScore", (best_child_score[&parent_id] as f64).into())
                .with_metadata("aggregationMethod", aggregation_name(self.aggregation).into());
            results.push(result);
        }
        sort_by_score_then_id(&mut results);
        Ok(results)
    }
}
