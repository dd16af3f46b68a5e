//! Groupby, sort, and join. All three always
//! materialize their output (`OpKind::GroupbySortJoin`), so unlike
//! `colonnade_frame::{SArray, SFrame}` these are free functions over an
//! already-built `&SFrame` rather than lazy builders. Since
//! `colonnade-frame` cannot depend back on this crate, they live here
//! instead of as inherent `SFrame` methods.

mod hashkey;
pub mod groupby;
pub mod join;
pub mod sort;

pub use groupby::{groupby, parse_reducer, Aggregate, Reducer};
pub use join::{join, JoinType};
pub use sort::{sort, SortKey};

#[cfg(test)]
pub(crate) mod test_support {
    use colonnade_frame::Context;
    use std::sync::Arc;

    pub fn test_context() -> (Arc<Context>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let temp = Arc::new(colonnade_cache::TempRegistry::with_base(dir.path()).unwrap());
        let ctx = Context::with_temp(colonnade_core::Config::default(), temp).unwrap();
        (ctx, dir)
    }
}
