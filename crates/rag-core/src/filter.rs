//! Metadata filter algebra: per-chunk predicates composed with `and`/`or`/`not`.
//!
//! Generalizes the teacher's category-id `FilterPredicate::{Equals,And,Or}`
//! recursion to the engine's tagged-union [`MetadataValue`] and the full
//! operator set spec.md §4.3 requires.

use crate::entities::{Chunk, MetadataValue};

/// A single comparison against a resolved field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    Equals(MetadataValue),
    NotEquals(MetadataValue),
    GreaterThan(f64),
    LessThan(f64),
    GreaterOrEqual(f64),
    LessOrEqual(f64),
    In(Vec<MetadataValue>),
    NotIn(Vec<MetadataValue>),
    Contains(MetadataValue),
    StartsWith(String),
    EndsWith(String),
    Exists,
    NotExists,
}

/// A filter condition: either a leaf comparison on a field path, or a
/// logical combinator over nested conditions.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterCondition {
    Field { path: String, op: FilterOp },
    And(Vec<FilterCondition>),
    Or(Vec<FilterCondition>),
    Not(Box<FilterCondition>),
}

/// Resolves a field path against a chunk: `documentId`/`source` read the
/// chunk's reserved metadata, anything else is looked up in the custom map.
fn resolve_field(chunk: &Chunk, path: &str) -> Option<MetadataValue> {
    match path {
        "documentId" => Some(MetadataValue::String(chunk.metadata.document_id.clone())),
        "source" => chunk.metadata.source.clone().map(MetadataValue::String),
        "isChild" => Some(MetadataValue::Bool(chunk.metadata.is_child)),
        "isParent" => Some(MetadataValue::Bool(chunk.metadata.is_parent)),
        "parentId" => chunk.metadata.parent_id.clone().map(MetadataValue::String),
        _ => chunk.metadata.custom.get(path).cloned(),
    }
}

fn numeric_compare(value: &MetadataValue, threshold: f64, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match value.as_f64() {
        Some(v) => cmp(v, threshold),
        None => false,
    }
}

impl FilterOp {
    fn matches(&self, value: Option<&MetadataValue>) -> bool {
        match self {
            FilterOp::Exists => matches!(value, Some(v) if !v.is_null()),
            FilterOp::NotExists => !matches!(value, Some(v) if !v.is_null()),
            _ => {
                let Some(value) = value else { return false };
                // A present-but-null value falls through to the ops below
                // rather than being special-cased: `Equals(Null)` matches a
                // `Null` field the same way `MetadataValue`'s derived
                // `PartialEq` says `Null == Null`, and the numeric/string ops
                // already return `false` for it on their own.
                match self {
                    FilterOp::Equals(expected) => value == expected,
                    FilterOp::NotEquals(expected) => value != expected,
                    FilterOp::GreaterThan(t) => numeric_compare(value, *t, |a, b| a > b),
                    FilterOp::LessThan(t) => numeric_compare(value, *t, |a, b| a < b),
                    FilterOp::GreaterOrEqual(t) => numeric_compare(value, *t, |a, b| a >= b),
                    FilterOp::LessOrEqual(t) => numeric_compare(value, *t, |a, b| a <= b),
                    FilterOp::In(set) => set.contains(value),
                    FilterOp::NotIn(set) => !set.contains(value),
                    FilterOp::Contains(needle) => match value {
                        MetadataValue::Array(items) => items.contains(needle),
                        MetadataValue::String(s) => match needle.as_str() {
                            Some(n) => s.contains(n),
                            None => false,
                        },
                        _ => false,
                    },
                    FilterOp::StartsWith(prefix) => {
                        matches!(value.as_str(), Some(s) if s.starts_with(prefix.as_str()))
                    }
                    FilterOp::EndsWith(suffix) => {
                        matches!(value.as_str(), Some(s) if s.ends_with(suffix.as_str()))
                    }
                    FilterOp::Exists | FilterOp::NotExists => unreachable!(),
                }
            }
        }
    }
}

impl FilterCondition {
    /// An empty `And([])` matches every chunk, per spec.md §4.3.
    pub fn matches_all() -> Self {
        FilterCondition::And(Vec::new())
    }

    pub fn field(path: impl Into<String>, op: FilterOp) -> Self {
        FilterCondition::Field { path: path.into(), op }
    }

    /// Evaluates the condition against a chunk. Combinators short-circuit.
    pub fn matches(&self, chunk: &Chunk) -> bool {
        match self {
            FilterCondition::Field { path, op } => op.matches(resolve_field(chunk, path).as_ref()),
            FilterCondition::And(conds) => conds.iter().all(|c| c.matches(chunk)),
            FilterCondition::Or(conds) => conds.iter().any(|c| c.matches(chunk)),
            FilterCondition::Not(inner) => !inner.matches(chunk),
        }
    }
}
