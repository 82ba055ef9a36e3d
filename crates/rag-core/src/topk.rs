//! Shared top-k selection helper.
//!
//! Mirrors the teacher's `BinaryHeap<Reverse<(FloatOrd, id)>>` pattern used
//! in `bm25.rs`/`bm25/eager.rs`/`dense.rs`: a heap-based partial selection
//! when `k` is much smaller than `n`, a full sort otherwise.

use std::cmp::Ordering;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct FloatOrd(pub f32);

impl Eq for FloatOrd {}

impl PartialOrd for FloatOrd {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatOrd {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal)
    }
}

/// Selects the `k` highest-scoring items, breaking ties by ascending `id`
/// for determinism, and returns them sorted by descending score.
///
/// Uses a min-heap of size `k` when `k` is much smaller than the candidate
/// count (heap-based top-k), otherwise sorts the whole candidate list.
pub(crate) fn top_k_by_score<T: Clone>(
    items: Vec<(T, String, f32)>,
    k: usize,
) -> Vec<(T, String, f32)> {
    if k == 0 || items.is_empty() {
        return Vec::new();
    }
    if items.len() > k * 4 && items.len() > 64 {
        let mut heap: BinaryHeap<Reverse<(FloatOrd, Reverse<String>, usize)>> =
            BinaryHeap::with_capacity(k + 1);
        for (idx, (_, id, score)) in items.iter().enumerate() {
            heap.push(Reverse((FloatOrd(*score), Reverse(id.clone()), idx)));
            if heap.len() > k {
                heap.pop();
            }
        }
        let mut selected: Vec<(T, String, f32)> = heap
            .into_iter()
            .map(|Reverse((FloatOrd(score), Reverse(id), idx))| (items[idx].0.clone(), id, score))
            .collect();
        selected.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(Ordering::Equal).then_with(|| a.1.cmp(&b.1)));
        selected
    } else {
        let mut sorted = items;
        sorted.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(Ordering::Equal).then_with(|| a.1.cmp(&b.1)));
        sorted.truncate(k);
        sorted
    }
}
