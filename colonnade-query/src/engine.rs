//! Pull-based parallel execution engine: a `rayon::ThreadPool`
//! instead of an async runtime, cooperative cancellation via an atomic
//! flag, and "first error wins" propagation over a capacity-1
//! `crossbeam_channel`.

use colonnade_core::{ColonnadeError, ColonnadeResult, Value};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Elements processed between cancellation checks, modeling "operators
/// check a cancel flag between blocks" without a real on-disk block here.
const COOPERATIVE_CHECK_GRANULARITY: usize = 1024;

#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub enum Step {
    Transform(Arc<dyn Fn(&Value) -> ColonnadeResult<Value> + Send + Sync>),
    Filter(Arc<dyn Fn(&Value) -> ColonnadeResult<bool> + Send + Sync>),
}

/// A linear chain of 1-to-1/filtering steps applied to one source. Groupby/
/// sort/join consume whole materialized inputs instead of running through
/// this pipeline, since they always materialize their output.
#[derive(Default)]
pub struct Pipeline {
    pub steps: Vec<Step>,
}

impl Pipeline {
    fn apply(&self, value: Value) -> ColonnadeResult<Option<Value>> {
        let mut current = value;
        for step in &self.steps {
            match step {
                Step::Transform(f) => current = f(&current)?,
                Step::Filter(pred) => {
                    if !pred(&current)? {
                        return Ok(None);
                    }
                }
            }
        }
        Ok(Some(current))
    }
}

/// Builds the thread pool used for execution, sized per
/// `Config::worker_threads`.
pub fn build_pool(worker_threads: usize) -> ColonnadeResult<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(worker_threads.max(1))
        .build()
        .map_err(|e| ColonnadeError::Internal(format!("failed to build worker pool: {e}")))
}

/// Splits `source` into `degree_of_parallelism` contiguous row ranges,
/// applies `pipeline` to each range on a separate worker, and concatenates
/// results in original order. Order is preserved for filtering operators.
pub fn execute(
    pool: &rayon::ThreadPool,
    source: &[Value],
    pipeline: &Pipeline,
    degree_of_parallelism: usize,
    cancel: &CancelToken,
) -> ColonnadeResult<Vec<Value>> {
    if source.is_empty() {
        return Ok(Vec::new());
    }
    let dop = degree_of_parallelism.max(1).min(source.len());
    let chunk_size = source.len().div_ceil(dop);
    let chunks: Vec<&[Value]> = source.chunks(chunk_size).collect();

    let (err_tx, err_rx) = crossbeam_channel::bounded::<ColonnadeError>(1);

    let results: Vec<Option<Vec<Value>>> = pool.install(|| {
        chunks
            .par_iter()
            .map(|chunk| {
                if cancel.is_cancelled() {
                    return None;
                }
                match run_chunk(chunk, pipeline, cancel) {
                    Ok(out) => Some(out),
                    Err(e) => {
                        cancel.cancel();
                        let _ = err_tx.try_send(e);
                        None
                    }
                }
            })
            .collect()
    });

    if let Ok(first_error) = err_rx.try_recv() {
        return Err(first_error);
    }

    let mut out = Vec::with_capacity(source.len());
    for chunk_result in results {
        match chunk_result {
            Some(values) => out.extend(values),
            None => return Err(ColonnadeError::Cancelled),
        }
    }
    Ok(out)
}

fn run_chunk(chunk: &[Value], pipeline: &Pipeline, cancel: &CancelToken) -> ColonnadeResult<Vec<Value>> {
    let mut out = Vec::with_capacity(chunk.len());
    for (i, value) in chunk.iter().enumerate() {
        if i % COOPERATIVE_CHECK_GRANULARITY == 0 && cancel.is_cancelled() {
            return Err(ColonnadeError::Cancelled);
        }
        if let Some(transformed) = pipeline.apply(value.clone())? {
            out.push(transformed);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_preserves_order() {
        let pool = build_pool(4).unwrap();
        let source: Vec<_> = (0..100).map(Value::Integer).collect();
        let pipeline = Pipeline {
            steps: vec![Step::Transform(Arc::new(|v| match v {
                Value::Integer(i) => Ok(Value::Integer(i * 2)),
                _ => unreachable!(),
            }))],
        };
        let out = execute(&pool, &source, &pipeline, 8, &CancelToken::new()).unwrap();
        let expected: Vec<_> = (0..100).map(|i| Value::Integer(i * 2)).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn filter_never_reorders() {
        let pool = build_pool(4).unwrap();
        let source: Vec<_> = (0..50).map(Value::Integer).collect();
        let pipeline = Pipeline {
            steps: vec![Step::Filter(Arc::new(|v| match v {
                Value::Integer(i) => Ok(i % 2 == 0),
                _ => unreachable!(),
            }))],
        };
        let out = execute(&pool, &source, &pipeline, 4, &CancelToken::new()).unwrap();
        let expected: Vec<_> = (0..50).step_by(2).map(Value::Integer).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn first_error_wins() {
        let pool = build_pool(4).unwrap();
        let source: Vec<_> = (0..20).map(Value::Integer).collect();
        let pipeline = Pipeline {
            steps: vec![Step::Transform(Arc::new(|v| match v {
                Value::Integer(9) => Err(ColonnadeError::TypeError("boom".into())),
                Value::Integer(i) => Ok(Value::Integer(*i)),
                _ => unreachable!(),
            }))],
        };
        let err = execute(&pool, &source, &pipeline, 4, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, ColonnadeError::TypeError(_)));
    }
}
