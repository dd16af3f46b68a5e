//! Smart sharing: walks the operator tree assigning a
//! (pace-id, node-id) key to every edge, then collapses edges that land on
//! the same key onto one execution instance.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::plan::{NodeId, OpNode};

pub type PaceId = u64;

static NEXT_PACE_ID: AtomicU64 = AtomicU64::new(0);

fn fresh_pace_id() -> PaceId {
    NEXT_PACE_ID.fetch_add(1, Ordering::Relaxed)
}

/// One shared execution instance: the node it computes, plus its already
/// pace-assigned children (so that further sharing-aware consumers can be
/// attached without re-walking the tree).
pub struct ExecutionNode {
    pub node: Arc<OpNode>,
    pub pace_id: PaceId,
    pub children: Vec<Arc<ExecutionNode>>,
}

/// The result of a sharing pass: the root execution instance plus a count
/// of how many distinct (pace-id, node-id) instances were created (useful
/// for tests/tracing, equal to 1 plus the number of re-used subtrees avoided).
pub struct SharingPlan {
    pub root: Arc<ExecutionNode>,
    instances: HashMap<(PaceId, NodeId), Arc<ExecutionNode>>,
}

impl SharingPlan {
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

/// Builds a sharing-aware execution plan for `root`, as if reached from a
/// single fresh top-level pace id.
pub fn plan(root: &Arc<OpNode>) -> SharingPlan {
    let mut instances = HashMap::new();
    let root_node = walk(root, fresh_pace_id(), &mut instances);
    SharingPlan { root: root_node, instances }
}

fn walk(node: &Arc<OpNode>, pace_id: PaceId, instances: &mut HashMap<(PaceId, NodeId), Arc<ExecutionNode>>) -> Arc<ExecutionNode> {
    let key = (pace_id, node.id);
    if let Some(existing) = instances.get(&key) {
        return existing.clone();
    }

    let children = match node.kind.children_share_pace() {
        Some(true) => {
            let shared = if node.kind.pace_changing() { fresh_pace_id() } else { pace_id };
            node.children.iter().map(|c| walk(c, shared, instances)).collect()
        }
        Some(false) => node.children.iter().map(|c| walk(c, fresh_pace_id(), instances)).collect(),
        None => {
            // 0 or 1 child: inherit unless this op changes pace.
            let child_pace = if node.kind.pace_changing() { fresh_pace_id() } else { pace_id };
            node.children.iter().map(|c| walk(c, child_pace, instances)).collect()
        }
    };

    let exec = Arc::new(ExecutionNode { node: node.clone(), pace_id, children });
    instances.insert(key, exec.clone());
    exec
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::OpKind;
    use colonnade_core::ValueType;

    #[test]
    fn two_consumers_of_same_source_same_pace_share_one_instance() {
        let src = OpNode::source(ValueType::Integer, Some(10), "src");
        let append = OpNode::nary(OpKind::Append, vec![src.clone(), src.clone()], ValueType::Integer, "append");
        let sp = plan(&append);
        // append shares pace across both children -> both children resolve
        // to the same (pace_id, node_id) key -> 2 instances total (append + src).
        assert_eq!(sp.instance_count(), 2);
        assert!(Arc::ptr_eq(&sp.root.children[0], &sp.root.children[1]));
    }

    #[test]
    fn union_gives_each_child_independent_pace() {
        let a = OpNode::source(ValueType::Integer, Some(10), "a");
        let b = OpNode::source(ValueType::Integer, Some(10), "b");
        let u = OpNode::nary(OpKind::Union, vec![a, b], ValueType::Integer, "union");
        let sp = plan(&u);
        assert_eq!(sp.instance_count(), 3);
        assert!(!Arc::ptr_eq(&sp.root.children[0], &sp.root.children[1]));
    }

    #[test]
    fn filter_children_get_fresh_pace_even_when_shared() {
        let src = OpNode::source(ValueType::Integer, Some(10), "src");
        let f1 = OpNode::unary(OpKind::FilterByPredicate, src.clone(), ValueType::Integer, "f1");
        let f2 = OpNode::unary(OpKind::FilterByPredicate, src, ValueType::Integer, "f2");
        let append = OpNode::nary(OpKind::Append, vec![f1, f2], ValueType::Integer, "append");
        let sp = plan(&append);
        // f1 and f2 are distinct nodes (different node-id) so they never
        // share regardless of pace; but each reaches `src` with its OWN
        // fresh pace id (FilterByPredicate is pace-changing), so the two
        // `src` edges do not collapse either.
        assert_eq!(sp.instance_count(), 5); // append, f1, f2, src(via f1), src(via f2)
    }
}
