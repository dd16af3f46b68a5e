//! Lazy operator tree: each node describes a computation over typed row
//! streams without executing it. `OpKind` carries each op's pace-change and
//! children-same-pace properties.

use colonnade_core::ValueType;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type NodeId = u64;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(0);

pub fn next_node_id() -> NodeId {
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// A file-backed (or otherwise already-materialized) leaf column.
    Source,
    /// 1-to-1 row transform (`transform`, `astype`, elementwise arithmetic).
    Transform1to1,
    /// Concatenation of a sequence with the same cadence.
    Append,
    /// `logical_filter` / `drop_missing`.
    LogicalFilterOrDropMissing,
    /// `filter(predicate)`.
    FilterByPredicate,
    /// Union of independently-paced streams.
    Union,
    /// Groupby, sort, or join, all of which materialize their output.
    GroupbySortJoin,
}

impl OpKind {
    pub fn pace_changing(self) -> bool {
        matches!(
            self,
            OpKind::LogicalFilterOrDropMissing | OpKind::FilterByPredicate | OpKind::Union | OpKind::GroupbySortJoin
        )
    }

    /// `None` when the question doesn't apply (no children, or exactly one
    /// child so there is nothing to share pace *between*). `Some(true)`
    /// when children that exist all share one pace id; `Some(false)` when
    /// each gets its own (Union).
    pub fn children_share_pace(self) -> Option<bool> {
        match self {
            OpKind::Source | OpKind::Transform1to1 | OpKind::FilterByPredicate => None,
            OpKind::Append | OpKind::LogicalFilterOrDropMissing | OpKind::GroupbySortJoin => Some(true),
            OpKind::Union => Some(false),
        }
    }

    pub fn materializes(self) -> bool {
        matches!(self, OpKind::GroupbySortJoin)
    }
}

#[derive(Debug)]
pub struct OpNode {
    pub id: NodeId,
    pub kind: OpKind,
    pub children: Vec<Arc<OpNode>>,
    pub output_type: ValueType,
    /// Known in advance when derivable from metadata without materializing.
    pub known_row_count: Option<u64>,
    /// Human-readable label for tracing/debugging (e.g. `"transform:abs"`).
    pub label: String,
}

impl OpNode {
    pub fn source(output_type: ValueType, known_row_count: Option<u64>, label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: next_node_id(),
            kind: OpKind::Source,
            children: Vec::new(),
            output_type,
            known_row_count,
            label: label.into(),
        })
    }

    pub fn unary(kind: OpKind, child: Arc<OpNode>, output_type: ValueType, label: impl Into<String>) -> Arc<Self> {
        let known_row_count = if kind.pace_changing() { None } else { child.known_row_count };
        Arc::new(Self { id: next_node_id(), kind, children: vec![child], output_type, known_row_count, label: label.into() })
    }

    pub fn nary(kind: OpKind, children: Vec<Arc<OpNode>>, output_type: ValueType, label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { id: next_node_id(), kind, children, output_type, known_row_count: None, label: label.into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_preserves_known_row_count() {
        let src = OpNode::source(ValueType::Integer, Some(10), "src");
        let t = OpNode::unary(OpKind::Transform1to1, src, ValueType::Integer, "transform:identity");
        assert_eq!(t.known_row_count, Some(10));
    }

    #[test]
    fn filter_clears_known_row_count() {
        let src = OpNode::source(ValueType::Integer, Some(10), "src");
        let f = OpNode::unary(OpKind::FilterByPredicate, src, ValueType::Integer, "filter");
        assert_eq!(f.known_row_count, None);
    }
}
