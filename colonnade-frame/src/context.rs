//! Process-wide service objects, aggregated behind one handle rather than
//! static globals. Production code builds one
//! `Context` at startup; tests build a per-test `Context` against a
//! `tempfile::TempDir`.

use colonnade_cache::{CacheManager, HandlePool, TempRegistry};
use colonnade_core::{Config, ColonnadeResult};
use colonnade_query::{build_pool, CancelToken};
use colonnade_vfs::{DownloadCache, Vfs};
use std::sync::Arc;

pub struct Context {
    pub config: Config,
    pub cache: Arc<CacheManager>,
    pub handles: Arc<HandlePool>,
    pub temp: Arc<TempRegistry>,
    pub vfs: Arc<Vfs>,
    pub pool: rayon::ThreadPool,
}

impl Context {
    /// Builds the default process context, selecting a temp directory from
    /// `TMPDIR`/`/var/tmp`/`/tmp`.
    pub fn open(config: Config) -> ColonnadeResult<Arc<Self>> {
        let temp = Arc::new(TempRegistry::new()?);
        Self::with_temp(config, temp)
    }

    /// Builds a context rooted at an explicit temp base (tests use this
    /// against a `tempfile::TempDir`).
    pub fn with_temp(config: Config, temp: Arc<TempRegistry>) -> ColonnadeResult<Arc<Self>> {
        let values = config.snapshot();
        let cache = Arc::new(CacheManager::new(temp.clone(), values.cache_budget_bytes, values.cache_per_block_limit_bytes));
        let handles = Arc::new(HandlePool::new(values.file_handle_pool_sweep_interval));
        let download = DownloadCache::new(temp.clone());
        let vfs = Arc::new(Vfs::new(cache.clone(), download));
        let pool = build_pool(values.worker_threads)?;

        Ok(Arc::new(Self { config, cache, handles, temp, vfs, pool }))
    }

    /// Fresh cancellation token for one top-level materialization call.
    pub fn new_cancel_token(&self) -> CancelToken {
        CancelToken::new()
    }
}

#[cfg(test)]
pub(crate) fn test_context() -> (Arc<Context>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let temp = Arc::new(TempRegistry::with_base(dir.path()).unwrap());
    let ctx = Context::with_temp(Config::default(), temp).unwrap();
    (ctx, dir)
}
