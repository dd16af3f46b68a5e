pub mod engine;
pub mod plan;
pub mod sharing;

pub use engine::{build_pool, execute, CancelToken, Pipeline, Step};
pub use plan::{next_node_id, NodeId, OpKind, OpNode};
pub use sharing::{plan, ExecutionNode, PaceId, SharingPlan};
