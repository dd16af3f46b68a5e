//! SArray: one typed, immutable lazy column. Every
//! query-building method returns a new handle around a fresh lazy-op node;
//! the actual rows are computed once, on first access, and memoized.
//! `is_materialized()` reports whether that has happened yet.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use colonnade_core::{ColonnadeError, ColonnadeResult, Value, ValueType};
use colonnade_format::{SArrayIndex, SegmentReader, SegmentWriter};
use colonnade_query::{execute, OpKind, OpNode, Pipeline, Step};

use crate::context::Context;

type Compute = Arc<dyn Fn(&Context) -> ColonnadeResult<Vec<Value>> + Send + Sync>;

#[derive(Clone, Copy, Debug)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Clone)]
pub struct SArray {
    ctx: Arc<Context>,
    dtype: ValueType,
    node: Arc<OpNode>,
    /// Known without materializing only for additive ops (append) or
    /// identity-cadence ones (transform/astype/arith/clip/fill), independent
    /// of `OpNode::known_row_count`, which tracks the generic lazy-graph
    /// property rather than this handle's own size bookkeeping.
    size_hint: Option<u64>,
    compute: Compute,
    cache: Arc<OnceCell<Vec<Value>>>,
}

impl SArray {
    fn new(ctx: Arc<Context>, dtype: ValueType, node: Arc<OpNode>, size_hint: Option<u64>, compute: Compute) -> Self {
        Self { ctx, dtype, node, size_hint, compute, cache: Arc::new(OnceCell::new()) }
    }

    /// A literal, already-in-memory column (e.g. a CSV-parsed column, or the
    /// output of a sink operation held for further chaining).
    pub fn from_values(ctx: Arc<Context>, dtype: ValueType, values: Vec<Value>) -> Self {
        let node = OpNode::source(dtype, Some(values.len() as u64), "literal");
        let size_hint = Some(values.len() as u64);
        let cache = OnceCell::new();
        let _ = cache.set(values);
        Self { ctx, dtype, node, size_hint, compute: Arc::new(|_ctx| Ok(Vec::new())), cache: Arc::new(cache) }
    }

    /// Opens a column by its index file, reading segments lazily on first
    /// materialization.
    pub fn open(ctx: Arc<Context>, index_path: &Path) -> ColonnadeResult<Self> {
        let index = SArrayIndex::read(index_path)?;
        let dtype = index.element_type;
        let total_rows = index.total_rows();
        let segment_paths = index.segment_paths.clone();
        let node = OpNode::source(dtype, Some(total_rows), format!("sarray:{}", index_path.display()));
        let compute: Compute = Arc::new(move |_ctx| {
            let mut out = Vec::with_capacity(total_rows as usize);
            for path in &segment_paths {
                let reader = SegmentReader::open(path)?;
                out.extend(reader.read_rows(0, reader.total_rows())?);
            }
            Ok(out)
        });
        Ok(Self::new(ctx, dtype, node, Some(total_rows), compute))
    }

    pub fn dtype(&self) -> ValueType {
        self.dtype
    }

    /// Row count. Additive for `append` and preserved across 1-to-1 ops
    /// without forcing execution; otherwise
    /// materializes.
    pub fn size(&self) -> ColonnadeResult<u64> {
        if let Some(n) = self.size_hint {
            return Ok(n);
        }
        Ok(self.materialize()?.len() as u64)
    }

    pub fn is_materialized(&self) -> bool {
        self.cache.get().is_some()
    }

    /// Forces execution of the lazy chain behind this handle, memoizing the
    /// result, and returns it.
    pub fn materialize(&self) -> ColonnadeResult<&[Value]> {
        self.cache.get_or_try_init(|| (self.compute)(&self.ctx)).map(|v| v.as_slice())
    }

    pub fn head(&self, n: usize) -> ColonnadeResult<Vec<Value>> {
        Ok(self.materialize()?.iter().take(n).cloned().collect())
    }

    pub fn tail(&self, n: usize) -> ColonnadeResult<Vec<Value>> {
        let all = self.materialize()?;
        let start = all.len().saturating_sub(n);
        Ok(all[start..].to_vec())
    }

    /// 1-to-1 transform, run in parallel through the execution engine.
    pub fn transform<F>(&self, f: F, out_type: ValueType) -> Self
    where
        F: Fn(&Value) -> ColonnadeResult<Value> + Send + Sync + 'static,
    {
        let parent = self.clone();
        let f: Arc<dyn Fn(&Value) -> ColonnadeResult<Value> + Send + Sync> = Arc::new(f);
        let node = OpNode::unary(OpKind::Transform1to1, self.node.clone(), out_type, "transform");
        let size_hint = self.size_hint;
        let compute: Compute = Arc::new(move |ctx| {
            let source = parent.materialize()?;
            let pipeline = Pipeline { steps: vec![Step::Transform(f.clone())] };
            let dop = ctx.pool.current_num_threads();
            execute(&ctx.pool, source, &pipeline, dop, &ctx.new_cancel_token())
        });
        Self::new(self.ctx.clone(), out_type, node, size_hint, compute)
    }

    /// `filter(predicate)`: pace-changing,
    /// size unknown until materialized.
    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(&Value) -> ColonnadeResult<bool> + Send + Sync + 'static,
    {
        let parent = self.clone();
        let predicate: Arc<dyn Fn(&Value) -> ColonnadeResult<bool> + Send + Sync> = Arc::new(predicate);
        let dtype = self.dtype;
        let node = OpNode::unary(OpKind::FilterByPredicate, self.node.clone(), dtype, "filter");
        let compute: Compute = Arc::new(move |ctx| {
            let source = parent.materialize()?;
            let pipeline = Pipeline { steps: vec![Step::Filter(predicate.clone())] };
            let dop = ctx.pool.current_num_threads();
            execute(&ctx.pool, source, &pipeline, dop, &ctx.new_cancel_token())
        });
        Self::new(self.ctx.clone(), dtype, node, None, compute)
    }

    /// `logical_filter(mask)`: keep rows where `mask` is truthy (not NA, not
    /// zero). Never reorders.
    pub fn logical_filter(&self, mask: &SArray) -> ColonnadeResult<Self> {
        let parent = self.clone();
        let mask = mask.clone();
        let dtype = self.dtype;
        let node = OpNode::unary(OpKind::LogicalFilterOrDropMissing, self.node.clone(), dtype, "logical_filter");
        let compute: Compute = Arc::new(move |_ctx| {
            let source = parent.materialize()?;
            let mask_values = mask.materialize()?;
            if source.len() != mask_values.len() {
                return Err(ColonnadeError::RangeError(format!(
                    "logical_filter mask length {} does not match source length {}",
                    mask_values.len(),
                    source.len()
                )));
            }
            Ok(source.iter().zip(mask_values.iter()).filter(|(_, m)| truthy(m)).map(|(v, _)| v.clone()).collect())
        });
        Ok(Self::new(self.ctx.clone(), dtype, node, None, compute))
    }

    pub fn drop_missing(&self) -> Self {
        let parent = self.clone();
        let dtype = self.dtype;
        let node = OpNode::unary(OpKind::LogicalFilterOrDropMissing, self.node.clone(), dtype, "drop_missing");
        let compute: Compute = Arc::new(move |_ctx| Ok(parent.materialize()?.iter().filter(|v| !v.is_na()).cloned().collect()));
        Self::new(self.ctx.clone(), dtype, node, None, compute)
    }

    pub fn fill_missing(&self, value: Value) -> Self {
        let dtype = self.dtype;
        self.transform(move |v| Ok(if v.is_na() { value.clone() } else { v.clone() }), dtype)
    }

    pub fn astype(&self, target: ValueType) -> Self {
        self.transform(move |v| coerce_value(v, target), target)
    }

    pub fn clip(&self, lo: Option<Value>, hi: Option<Value>) -> Self {
        let dtype = self.dtype;
        self.transform(
            move |v| {
                if v.is_na() {
                    return Ok(v.clone());
                }
                let mut x = v
                    .as_f64()
                    .ok_or_else(|| ColonnadeError::TypeError("clip requires a numeric column".into()))?;
                if let Some(l) = lo.as_ref().and_then(Value::as_f64) {
                    x = x.max(l);
                }
                if let Some(h) = hi.as_ref().and_then(Value::as_f64) {
                    x = x.min(h);
                }
                Ok(if dtype == ValueType::Integer { Value::Integer(x as i64) } else { Value::Float(x) })
            },
            dtype,
        )
    }

    pub fn nonzero(&self) -> Self {
        self.filter(|v| Ok(!v.is_zero()))
    }

    pub fn add(&self, rhs: Value) -> Self {
        self.arith_scalar(ArithOp::Add, rhs)
    }

    pub fn sub(&self, rhs: Value) -> Self {
        self.arith_scalar(ArithOp::Sub, rhs)
    }

    pub fn mul(&self, rhs: Value) -> Self {
        self.arith_scalar(ArithOp::Mul, rhs)
    }

    pub fn div(&self, rhs: Value) -> Self {
        self.arith_scalar(ArithOp::Div, rhs)
    }

    fn arith_scalar(&self, op: ArithOp, rhs: Value) -> Self {
        let out_type = if self.dtype == ValueType::Integer && matches!(rhs, Value::Integer(_)) && !matches!(op, ArithOp::Div) {
            ValueType::Integer
        } else {
            ValueType::Float
        };
        self.transform(move |v| apply_arith(op, v, &rhs), out_type)
    }

    /// Elementwise arithmetic against another SArray, which must share this
    /// column's cadence (same length, same row alignment), the same
    /// precondition `Append` makes of its children, so the lazy node reuses
    /// `Append`'s pace-sharing rule rather than inventing a "zip" kind.
    pub fn arith_with(&self, other: &SArray, op: ArithOp) -> Self {
        let parent = self.clone();
        let rhs = other.clone();
        let node = OpNode::nary(OpKind::Append, vec![self.node.clone(), other.node.clone()], ValueType::Float, "zip_arith");
        let compute: Compute = Arc::new(move |_ctx| {
            let a = parent.materialize()?;
            let b = rhs.materialize()?;
            if a.len() != b.len() {
                return Err(ColonnadeError::RangeError(format!(
                    "elementwise arithmetic requires equal length columns: {} vs {}",
                    a.len(),
                    b.len()
                )));
            }
            a.iter().zip(b.iter()).map(|(x, y)| apply_arith(op, x, y)).collect()
        });
        Self::new(self.ctx.clone(), ValueType::Float, node, None, compute)
    }

    pub fn sum(&self) -> ColonnadeResult<f64> {
        Ok(self.numeric_values()?.iter().sum())
    }

    pub fn mean(&self) -> ColonnadeResult<f64> {
        let values = self.numeric_values()?;
        if values.is_empty() {
            return Err(ColonnadeError::RangeError("mean of an empty column".into()));
        }
        Ok(values.iter().sum::<f64>() / values.len() as f64)
    }

    /// Sample variance with a user-selectable denominator: `ddof = 0` for population
    /// variance, `ddof = 1` for the unbiased sample estimator.
    pub fn variance(&self, ddof: usize) -> ColonnadeResult<f64> {
        let values = self.numeric_values()?;
        if values.len() <= ddof {
            return Err(ColonnadeError::RangeError("not enough values for the requested ddof".into()));
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let sum_sq: f64 = values.iter().map(|x| (x - mean).powi(2)).sum();
        Ok(sum_sq / (values.len() - ddof) as f64)
    }

    pub fn stddev(&self, ddof: usize) -> ColonnadeResult<f64> {
        Ok(self.variance(ddof)?.sqrt())
    }

    pub fn min(&self) -> ColonnadeResult<Value> {
        self.materialize()?
            .iter()
            .filter(|v| !v.is_na())
            .cloned()
            .min_by(|a, b| a.compare_for_sort(b))
            .ok_or_else(|| ColonnadeError::RangeError("min of an empty (or all-missing) column".into()))
    }

    pub fn max(&self) -> ColonnadeResult<Value> {
        self.materialize()?
            .iter()
            .filter(|v| !v.is_na())
            .cloned()
            .max_by(|a, b| a.compare_for_sort(b))
            .ok_or_else(|| ColonnadeError::RangeError("max of an empty (or all-missing) column".into()))
    }

    fn numeric_values(&self) -> ColonnadeResult<Vec<f64>> {
        Ok(self.materialize()?.iter().filter(|v| !v.is_na()).filter_map(|v| v.as_f64()).collect())
    }

    /// Row indices of the top (or, with `reverse`, bottom) `k` values.
    pub fn topk_index(&self, k: usize, reverse: bool) -> ColonnadeResult<Vec<usize>> {
        let values = self.materialize()?;
        let mut idx: Vec<usize> = (0..values.len()).collect();
        idx.sort_by(|&a, &b| {
            let ord = values[a].compare_for_sort(&values[b]);
            if reverse {
                ord
            } else {
                ord.reverse()
            }
        });
        idx.truncate(k);
        Ok(idx)
    }

    /// Seeded uniform Bernoulli sampling.
    /// Always materializes the result into a literal, in-memory column
    /// (sampling is itself a sink; there is no useful lazy representation
    /// of "some random subset").
    pub fn sample(&self, frac: f64, seed: u64) -> ColonnadeResult<Self> {
        if !(0.0..=1.0).contains(&frac) {
            return Err(ColonnadeError::RangeError("sample fraction must be in [0,1]".into()));
        }
        let values = self.materialize()?;
        let mut rng = SmallRng::seed_from_u64(seed);
        let sampled: Vec<Value> = values.iter().filter(|_| rng.gen::<f64>() < frac).cloned().collect();
        Ok(Self::from_values(self.ctx.clone(), self.dtype, sampled))
    }

    pub fn append(&self, other: &SArray) -> ColonnadeResult<Self> {
        if self.dtype != other.dtype {
            return Err(ColonnadeError::TypeError(format!("cannot append a {:?} column onto a {:?} column", other.dtype, self.dtype)));
        }
        let parent = self.clone();
        let tail = other.clone();
        let size_hint = match (self.size_hint, other.size_hint) {
            (Some(a), Some(b)) => Some(a + b),
            _ => None,
        };
        let dtype = self.dtype;
        let node = OpNode::nary(OpKind::Append, vec![self.node.clone(), other.node.clone()], dtype, "append");
        let compute: Compute = Arc::new(move |_ctx| {
            let mut out = parent.materialize()?.to_vec();
            out.extend(tail.materialize()?.iter().cloned());
            Ok(out)
        });
        Ok(Self::new(self.ctx.clone(), dtype, node, size_hint, compute))
    }

    pub fn dict_keys(&self) -> ColonnadeResult<Self> {
        self.require_dtype(ValueType::Dict, "dict_keys")?;
        Ok(self.transform(|v| Ok(Value::List(v.dict_keys().unwrap_or_default())), ValueType::List))
    }

    pub fn dict_values(&self) -> ColonnadeResult<Self> {
        self.require_dtype(ValueType::Dict, "dict_values")?;
        Ok(self.transform(|v| Ok(Value::List(v.dict_values().unwrap_or_default())), ValueType::List))
    }

    pub fn item_length(&self) -> ColonnadeResult<Self> {
        if !matches!(self.dtype, ValueType::Dict | ValueType::List | ValueType::Vector | ValueType::String) {
            return Err(ColonnadeError::TypeError("item_length requires a Dict, List, Vector, or String column".into()));
        }
        Ok(self.transform(
            |v| Ok(v.item_length().map(|n| Value::Integer(n as i64)).unwrap_or(Value::Undefined)),
            ValueType::Integer,
        ))
    }

    pub fn trim_by_keys(&self, keys: Vec<Value>, exclude: bool) -> ColonnadeResult<Self> {
        self.require_dtype(ValueType::Dict, "trim_by_keys")?;
        Ok(self.transform(move |v| Ok(v.trim_by_keys(&keys, exclude).unwrap_or(Value::Undefined)), ValueType::Dict))
    }

    /// Expands a Dict/List/Vector column into one column per key (Dict) or
    /// index (List/Vector); the caller assembles these into an SFrame.
    pub fn unpack(&self, column_prefix: &str) -> ColonnadeResult<Vec<(String, Self)>> {
        match self.dtype {
            ValueType::Dict => {
                let mut keys: Vec<Value> = Vec::new();
                for v in self.materialize()? {
                    if let Value::Dict(entries) = v {
                        for (k, _) in entries {
                            if !keys.contains(k) {
                                keys.push(k.clone());
                            }
                        }
                    }
                }
                Ok(keys
                    .into_iter()
                    .map(|key| {
                        let name = format!("{column_prefix}.{}", key_label(&key));
                        let key_for_closure = key.clone();
                        let col = self.transform(
                            move |v| {
                                Ok(match v {
                                    Value::Dict(entries) => {
                                        entries.iter().find(|(k, _)| *k == key_for_closure).map(|(_, val)| val.clone()).unwrap_or(Value::Undefined)
                                    }
                                    _ => Value::Undefined,
                                })
                            },
                            ValueType::Undefined,
                        );
                        (name, col)
                    })
                    .collect())
            }
            ValueType::List | ValueType::Vector => {
                let max_len = self.materialize()?.iter().filter_map(|v| v.item_length()).max().unwrap_or(0);
                Ok((0..max_len)
                    .map(|i| {
                        let name = format!("{column_prefix}.{i}");
                        let col = self.transform(
                            move |v| {
                                Ok(match v {
                                    Value::List(items) => items.get(i).cloned().unwrap_or(Value::Undefined),
                                    Value::Vector(items) => items.get(i).map(|x| Value::Float(*x)).unwrap_or(Value::Undefined),
                                    _ => Value::Undefined,
                                })
                            },
                            ValueType::Undefined,
                        );
                        (name, col)
                    })
                    .collect())
            }
            other => Err(ColonnadeError::TypeError(format!("unpack requires a Dict, List, or Vector column, got {other:?}"))),
        }
    }

    pub fn bag_of_words(&self) -> ColonnadeResult<Self> {
        self.require_dtype(ValueType::String, "bag_of_words")?;
        Ok(self.transform(
            |v| match v {
                Value::String(s) => Ok(Value::Dict(count_tokens(s.split_whitespace().map(str::to_string)))),
                _ => Ok(Value::Undefined),
            },
            ValueType::Dict,
        ))
    }

    pub fn ngram_counts(&self, n: usize) -> ColonnadeResult<Self> {
        self.require_dtype(ValueType::String, "ngram_counts")?;
        if n == 0 {
            return Err(ColonnadeError::RangeError("ngram_counts requires n >= 1".into()));
        }
        Ok(self.transform(
            move |v| match v {
                Value::String(s) => {
                    let words: Vec<&str> = s.split_whitespace().collect();
                    if words.len() < n {
                        return Ok(Value::Dict(Vec::new()));
                    }
                    let grams = words.windows(n).map(|w| w.join(" "));
                    Ok(Value::Dict(count_tokens(grams)))
                }
                _ => Ok(Value::Undefined),
            },
            ValueType::Dict,
        ))
    }

    fn require_dtype(&self, expected: ValueType, op: &str) -> ColonnadeResult<()> {
        if self.dtype != expected {
            return Err(ColonnadeError::TypeError(format!("{op} requires a {expected:?} column, got {:?}", self.dtype)));
        }
        Ok(())
    }

    /// Writes this column out as `num_segments` segment files plus one index
    /// file at `index_path`.
    pub fn save(&self, index_path: &Path) -> ColonnadeResult<()> {
        let dir = index_path.parent().unwrap_or_else(|| Path::new("."));
        let num_segments = self.ctx.config.snapshot().default_num_segments;
        let base_name = index_path.file_stem().and_then(|s| s.to_str()).unwrap_or("sarray").to_string();
        let index = self.write_segments(dir, &base_name, num_segments)?;
        index.write(index_path)
    }

    fn write_segments(&self, dir: &Path, base_name: &str, num_segments: usize) -> ColonnadeResult<SArrayIndex> {
        let values = self.materialize()?;
        let cfg = self.ctx.config.snapshot();
        let num_segments = num_segments.max(1);
        let chunk_size = values.len().div_ceil(num_segments).max(1);

        let mut segment_paths = Vec::new();
        let mut segment_row_counts = Vec::new();
        for (i, chunk) in values.chunks(chunk_size).enumerate() {
            let path = dir.join(format!("{base_name}.{i}"));
            let mut writer = SegmentWriter::create(&path, self.dtype, cfg.compression_disable_threshold as f64, cfg.block_size_target as u64)?;
            for v in chunk {
                writer.append(v.clone())?;
            }
            segment_row_counts.push(writer.finish()?);
            segment_paths.push(path);
        }
        if segment_paths.is_empty() {
            let path = dir.join(format!("{base_name}.0"));
            let writer = SegmentWriter::create(&path, self.dtype, cfg.compression_disable_threshold as f64, cfg.block_size_target as u64)?;
            segment_row_counts.push(writer.finish()?);
            segment_paths.push(path);
        }

        Ok(SArrayIndex { version: 1, element_type: self.dtype, segment_row_counts, segment_paths, metadata: HashMap::new() })
    }
}

fn truthy(v: &Value) -> bool {
    !v.is_na() && !v.is_zero()
}

fn apply_arith(op: ArithOp, a: &Value, b: &Value) -> ColonnadeResult<Value> {
    if a.is_na() || b.is_na() {
        return Ok(Value::Undefined);
    }
    let (x, y) = match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x, y),
        _ => return Err(ColonnadeError::TypeError("arithmetic requires numeric operands".into())),
    };
    let result = match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => x / y,
    };
    if matches!(a, Value::Integer(_)) && matches!(b, Value::Integer(_)) && !matches!(op, ArithOp::Div) {
        Ok(Value::Integer(result as i64))
    } else {
        Ok(Value::Float(result))
    }
}

fn coerce_value(v: &Value, target: ValueType) -> ColonnadeResult<Value> {
    if v.is_na() {
        return Ok(Value::Undefined);
    }
    Ok(match (v, target) {
        (Value::Integer(i), ValueType::Integer) => Value::Integer(*i),
        (Value::Integer(i), ValueType::Float) => Value::Float(*i as f64),
        (Value::Integer(i), ValueType::String) => Value::String(i.to_string()),
        (Value::Float(f), ValueType::Float) => Value::Float(*f),
        (Value::Float(f), ValueType::Integer) => Value::Integer(*f as i64),
        (Value::Float(f), ValueType::String) => Value::String(f.to_string()),
        (Value::String(s), ValueType::Integer) => {
            Value::Integer(s.trim().parse().map_err(|_| ColonnadeError::TypeError(format!("cannot cast '{s}' to integer")))?)
        }
        (Value::String(s), ValueType::Float) => {
            Value::Float(s.trim().parse().map_err(|_| ColonnadeError::TypeError(format!("cannot cast '{s}' to float")))?)
        }
        (other, t) if other.dtype() == t => other.clone(),
        (other, t) => return Err(ColonnadeError::TypeError(format!("cannot cast {:?} to {t:?}", other.dtype()))),
    })
}

fn key_label(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Integer(i) => i.to_string(),
        other => format!("{other:?}"),
    }
}

fn count_tokens(tokens: impl Iterator<Item = String>) -> Vec<(Value, Value)> {
    let mut counts: Vec<(String, i64)> = Vec::new();
    for tok in tokens {
        match counts.iter_mut().find(|(k, _)| *k == tok) {
            Some(entry) => entry.1 += 1,
            None => counts.push((tok, 1)),
        }
    }
    counts.into_iter().map(|(k, v)| (Value::String(k), Value::Integer(v))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_context;

    fn ints(ctx: Arc<Context>, xs: &[i64]) -> SArray {
        SArray::from_values(ctx, ValueType::Integer, xs.iter().map(|i| Value::Integer(*i)).collect())
    }

    #[test]
    fn transform_then_filter_is_lazy_until_materialized() {
        let (ctx, _dir) = test_context();
        let a = ints(ctx, &[1, 2, 3, 4, 5]);
        let doubled = a.transform(|v| match v {
            Value::Integer(i) => Ok(Value::Integer(i * 2)),
            _ => unreachable!(),
        }, ValueType::Integer);
        assert!(!doubled.is_materialized());
        let kept = doubled.filter(|v| match v {
            Value::Integer(i) => Ok(*i > 5),
            _ => unreachable!(),
        });
        assert!(!kept.is_materialized());
        let rows = kept.materialize().unwrap().to_vec();
        assert_eq!(rows, vec![Value::Integer(6), Value::Integer(8), Value::Integer(10)]);
        assert!(kept.is_materialized());
    }

    #[test]
    fn append_size_is_additive_without_materializing() {
        let (ctx, _dir) = test_context();
        let a = ints(ctx.clone(), &[1, 2, 3]);
        let b = ints(ctx, &[4, 5]);
        let appended = a.append(&b).unwrap();
        assert_eq!(appended.size().unwrap(), 5);
        assert!(!appended.is_materialized());
        assert_eq!(appended.materialize().unwrap().to_vec(), vec![1, 2, 3, 4, 5].into_iter().map(Value::Integer).collect::<Vec<_>>());
    }

    #[test]
    fn round_trip_through_segments() {
        let (ctx, dir) = test_context();
        let a = ints(ctx.clone(), &[10, 20, 30, 40]);
        let index_path = dir.path().join("a.sidx");
        a.save(&index_path).unwrap();

        let back = SArray::open(ctx, &index_path).unwrap();
        assert_eq!(back.size().unwrap(), 4);
        assert_eq!(back.materialize().unwrap(), a.materialize().unwrap());
    }

    #[test]
    fn reductions() {
        let (ctx, _dir) = test_context();
        let a = ints(ctx, &[1, 2, 3, 4]);
        assert_eq!(a.sum().unwrap(), 10.0);
        assert_eq!(a.mean().unwrap(), 2.5);
        assert_eq!(a.min().unwrap(), Value::Integer(1));
        assert_eq!(a.max().unwrap(), Value::Integer(4));
        assert!((a.variance(0).unwrap() - 1.25).abs() < 1e-9);
    }

    #[test]
    fn clip_and_fill_missing() {
        let (ctx, _dir) = test_context();
        let a = SArray::from_values(ctx, ValueType::Integer, vec![Value::Integer(-5), Value::Undefined, Value::Integer(50)]);
        let clipped = a.clip(Some(Value::Integer(0)), Some(Value::Integer(10)));
        let filled = clipped.fill_missing(Value::Integer(0));
        assert_eq!(filled.materialize().unwrap(), vec![Value::Integer(0), Value::Integer(0), Value::Integer(10)]);
    }

    #[test]
    fn dict_keys_rejects_non_dict_column() {
        let (ctx, _dir) = test_context();
        let a = ints(ctx, &[1, 2]);
        assert!(a.dict_keys().is_err());
    }

    #[test]
    fn bag_of_words_counts_tokens() {
        let (ctx, _dir) = test_context();
        let a = SArray::from_values(ctx, ValueType::String, vec![Value::String("a b a".to_string())]);
        let bow = a.bag_of_words().unwrap();
        let rows = bow.materialize().unwrap();
        match &rows[0] {
            Value::Dict(entries) => {
                let get = |k: &str| entries.iter().find(|(kk, _)| kk == &Value::String(k.to_string())).map(|(_, v)| v.clone());
                assert_eq!(get("a"), Some(Value::Integer(2)));
                assert_eq!(get("b"), Some(Value::Integer(1)));
            }
            other => panic!("expected dict, got {other:?}"),
        }
    }

    #[test]
    fn topk_index_default_is_descending() {
        let (ctx, _dir) = test_context();
        let a = ints(ctx, &[3, 1, 4, 1, 5]);
        let idx = a.topk_index(2, false).unwrap();
        assert_eq!(idx, vec![4, 2]);
    }
}
