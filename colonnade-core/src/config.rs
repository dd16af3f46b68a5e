//! Runtime-mutable, range-checked configuration. Every setter validates its
//! argument before committing it, rejecting out-of-range values outright
//! rather than clamping them silently.

use crate::error::{ColonnadeError, ColonnadeResult};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ConfigValues {
    /// Number of segments created when an SArray/SFrame is opened for write.
    pub default_num_segments: usize,
    /// Target size in bytes for a finished block (before compression).
    pub block_size_target: usize,
    /// Minimum elements buffered before considering a block flush.
    pub min_elements_per_block: usize,
    /// Elements-per-block used for the very first block of a column.
    pub bootstrap_elements_per_block: usize,
    /// If post-compression size / pre-compression size exceeds this,
    /// compression is disabled for that block.
    pub compression_disable_threshold: f32,
    /// Global cache manager budget, in bytes.
    pub cache_budget_bytes: u64,
    /// Per-block cache limit, in bytes, before the block spills to disk.
    pub cache_per_block_limit_bytes: u64,
    /// Max blocks kept resident in the decode buffer pool.
    pub max_blocks_in_decode_cache: usize,
    /// Number of handles tracked by the file-handle pool before a sweep.
    pub file_handle_pool_sweep_interval: usize,
    /// CSV parser read chunk size, in bytes.
    pub csv_read_chunk_size: usize,
    /// Row budget per groupby hash bucket before it is flushed to a sorted run.
    pub groupby_row_budget: usize,
    /// Cell budget per join partition.
    pub join_cells_budget: usize,
    /// Whether IO read-lock mode is enabled (serializes readers of large files).
    pub io_read_lock_enabled: bool,
    /// File size threshold, in bytes, above which the IO read lock applies.
    pub io_read_lock_threshold_bytes: u64,
    /// Sample size used to build the sort's quantile sketch.
    pub sort_pivot_sample_size: usize,
    /// Maximum number of sort output partitions.
    pub sort_max_segments: usize,
    /// Number of worker threads in the execution engine's thread pool.
    pub worker_threads: usize,
}

impl Default for ConfigValues {
    fn default() -> Self {
        let workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self {
            default_num_segments: 16,
            block_size_target: 64 * 1024,
            min_elements_per_block: 8,
            bootstrap_elements_per_block: 16,
            compression_disable_threshold: 0.9,
            cache_budget_bytes: 256 * 1024 * 1024,
            cache_per_block_limit_bytes: 16 * 1024 * 1024,
            max_blocks_in_decode_cache: 32 * workers.max(1),
            file_handle_pool_sweep_interval: 128,
            csv_read_chunk_size: 50 * 1024 * 1024,
            groupby_row_budget: 1024 * 1024,
            join_cells_budget: 50 * 1024 * 1024,
            io_read_lock_enabled: false,
            io_read_lock_threshold_bytes: 4 * 1024 * 1024,
            sort_pivot_sample_size: 2_000_000,
            sort_max_segments: 128,
            worker_threads: workers,
        }
    }
}

/// Shared, runtime-mutable configuration handle.
#[derive(Clone)]
pub struct Config(Arc<RwLock<ConfigValues>>);

impl Default for Config {
    fn default() -> Self {
        Self(Arc::new(RwLock::new(ConfigValues::default())))
    }
}

impl Config {
    pub fn new(values: ConfigValues) -> Self {
        Self(Arc::new(RwLock::new(values)))
    }

    pub fn snapshot(&self) -> ConfigValues {
        self.0.read().clone()
    }

    pub fn set_default_num_segments(&self, v: usize) -> ColonnadeResult<()> {
        if v < 1 {
            return Err(ColonnadeError::RangeError("default_num_segments must be >= 1".into()));
        }
        self.0.write().default_num_segments = v;
        Ok(())
    }

    pub fn set_block_size_target(&self, v: usize) -> ColonnadeResult<()> {
        if v == 0 {
            return Err(ColonnadeError::RangeError("block_size_target must be > 0".into()));
        }
        self.0.write().block_size_target = v;
        Ok(())
    }

    pub fn set_compression_disable_threshold(&self, v: f32) -> ColonnadeResult<()> {
        if !(0.0..=1.0).contains(&v) {
            return Err(ColonnadeError::RangeError("compression_disable_threshold must be in [0,1]".into()));
        }
        self.0.write().compression_disable_threshold = v;
        Ok(())
    }

    pub fn set_cache_budget_bytes(&self, v: u64) -> ColonnadeResult<()> {
        if v == 0 {
            return Err(ColonnadeError::RangeError("cache_budget_bytes must be > 0".into()));
        }
        self.0.write().cache_budget_bytes = v;
        Ok(())
    }

    pub fn set_cache_per_block_limit_bytes(&self, v: u64) -> ColonnadeResult<()> {
        if v == 0 {
            return Err(ColonnadeError::RangeError("cache_per_block_limit_bytes must be > 0".into()));
        }
        self.0.write().cache_per_block_limit_bytes = v;
        Ok(())
    }

    pub fn set_groupby_row_budget(&self, v: usize) -> ColonnadeResult<()> {
        if v == 0 {
            return Err(ColonnadeError::RangeError("groupby_row_budget must be > 0".into()));
        }
        self.0.write().groupby_row_budget = v;
        Ok(())
    }

    pub fn set_join_cells_budget(&self, v: usize) -> ColonnadeResult<()> {
        if v == 0 {
            return Err(ColonnadeError::RangeError("join_cells_budget must be > 0".into()));
        }
        self.0.write().join_cells_budget = v;
        Ok(())
    }

    pub fn set_io_read_lock_enabled(&self, v: bool) {
        self.0.write().io_read_lock_enabled = v;
    }

    pub fn set_sort_pivot_sample_size(&self, v: usize) -> ColonnadeResult<()> {
        if v == 0 {
            return Err(ColonnadeError::RangeError("sort_pivot_sample_size must be > 0".into()));
        }
        self.0.write().sort_pivot_sample_size = v;
        Ok(())
    }

    pub fn set_sort_max_segments(&self, v: usize) -> ColonnadeResult<()> {
        if v < 1 {
            return Err(ColonnadeError::RangeError("sort_max_segments must be >= 1".into()));
        }
        self.0.write().sort_max_segments = v;
        Ok(())
    }

    pub fn set_worker_threads(&self, v: usize) -> ColonnadeResult<()> {
        if v == 0 {
            return Err(ColonnadeError::RangeError("worker_threads must be > 0".into()));
        }
        self.0.write().worker_threads = v;
        Ok(())
    }
}
