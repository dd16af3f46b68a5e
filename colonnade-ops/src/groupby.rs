//! Groupby aggregation, grounded in
//! `examples/original_source/src/sframe/groupby_aggregate.hpp` for the
//! overall shape (key columns + output-name/input-columns/operator triples)
//! and `group_aggregate_value.cpp` for the built-in reducer set and the
//! init/add/combine/emit contract.

use std::collections::HashMap;

use colonnade_core::{ColonnadeError, ColonnadeResult, Value, ValueType};
use colonnade_frame::{Context, SArray, SFrame};
use serde::{Deserialize, Serialize};

/// The distinguished column name that stands for "no input, pass Undefined",
/// used by `count`.
pub const UNDEFINED_INPUT: &str = "";

#[derive(Debug, Clone, PartialEq)]
pub enum Reducer {
    Count,
    Sum,
    Min,
    Max,
    ArgMin,
    ArgMax,
    Mean,
    Variance,
    Stddev,
    SelectOne,
    ZipToList,
    ZipToDict,
    Quantile(Vec<f64>),
}

impl Reducer {
    fn arity(&self) -> usize {
        match self {
            Reducer::ArgMin | Reducer::ArgMax | Reducer::ZipToDict => 2,
            _ => 1,
        }
    }
}

/// `(output_name, input_columns, reducer)` triple.
#[derive(Debug, Clone)]
pub struct Aggregate {
    pub output_name: String,
    pub input_columns: Vec<String>,
    pub reducer: Reducer,
}

impl Aggregate {
    pub fn new(output_name: impl Into<String>, input_columns: Vec<String>, reducer: Reducer) -> ColonnadeResult<Self> {
        let output_name = output_name.into();
        if input_columns.len() != reducer.arity() {
            return Err(ColonnadeError::ConfigError(format!(
                "reducer {:?} expects {} input column(s), got {}",
                reducer,
                reducer.arity(),
                input_columns.len()
            )));
        }
        Ok(Self { output_name, input_columns, reducer })
    }
}

/// Parses a reducer name the way the original's registry of named
/// aggregators does, including `quantile`'s comma-separated level suffix
///. Unknown names fail with `ConfigError`.
pub fn parse_reducer(name: &str) -> ColonnadeResult<Reducer> {
    if let Some(rest) = name.strip_prefix("quantile(").and_then(|s| s.strip_suffix(')')) {
        let levels = rest
            .split(',')
            .map(|s| s.trim().parse::<f64>().map_err(|_| ColonnadeError::ConfigError(format!("invalid quantile level '{s}'"))))
            .collect::<ColonnadeResult<Vec<_>>>()?;
        if levels.is_empty() || levels.iter().any(|l| !(0.0..=1.0).contains(l)) {
            return Err(ColonnadeError::ConfigError("quantile levels must be non-empty and within [0,1]".into()));
        }
        return Ok(Reducer::Quantile(levels));
    }
    Ok(match name {
        "count" => Reducer::Count,
        "sum" => Reducer::Sum,
        "min" => Reducer::Min,
        "max" => Reducer::Max,
        "argmin" => Reducer::ArgMin,
        "argmax" => Reducer::ArgMax,
        "mean" | "avg" => Reducer::Mean,
        "variance" | "var" => Reducer::Variance,
        "stddev" | "std" => Reducer::Stddev,
        "select_one" => Reducer::SelectOne,
        "zip_to_list" => Reducer::ZipToList,
        "zip_to_dict" => Reducer::ZipToDict,
        other => return Err(ColonnadeError::ConfigError(format!("unknown groupby reducer '{other}'"))),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum State {
    Count(u64),
    Sum(f64),
    MinMax { best: Option<Value>, want_max: bool },
    Arg { best: Option<Value>, arg: Option<Value>, want_max: bool },
    MeanVar { count: u64, mean: f64, m2: f64 },
    SelectOne(Option<Value>),
    ZipToList(Vec<Value>),
    ZipToDict(Vec<(Value, Value)>),
    Quantile { levels: Vec<f64>, values: Vec<f64> },
}

impl State {
    fn init(reducer: &Reducer) -> Self {
        match reducer {
            Reducer::Count => State::Count(0),
            Reducer::Sum => State::Sum(0.0),
            Reducer::Min => State::MinMax { best: None, want_max: false },
            Reducer::Max => State::MinMax { best: None, want_max: true },
            Reducer::ArgMin => State::Arg { best: None, arg: None, want_max: false },
            Reducer::ArgMax => State::Arg { best: None, arg: None, want_max: true },
            Reducer::Mean | Reducer::Variance | Reducer::Stddev => State::MeanVar { count: 0, mean: 0.0, m2: 0.0 },
            Reducer::SelectOne => State::SelectOne(None),
            Reducer::ZipToList => State::ZipToList(Vec::new()),
            Reducer::ZipToDict => State::ZipToDict(Vec::new()),
            Reducer::Quantile(levels) => State::Quantile { levels: levels.clone(), values: Vec::new() },
        }
    }

    /// `add(state, row_of_input_columns)`: numeric reducers skip undefined
    /// input and reject non-numeric input with `TypeError`.
    fn add(&mut self, inputs: &[Value]) -> ColonnadeResult<()> {
        match self {
            State::Count(n) => *n += 1,
            State::Sum(acc) => {
                let v = &inputs[0];
                if v.is_na() {
                    return Ok(());
                }
                *acc += v.as_f64().ok_or_else(|| ColonnadeError::TypeError("sum requires a numeric column".into()))?;
            }
            State::MinMax { best, want_max } => {
                let v = &inputs[0];
                if v.is_na() {
                    return Ok(());
                }
                let better = match best {
                    None => true,
                    Some(cur) => {
                        let ord = v.compare_for_sort(cur);
                        if *want_max {
                            ord == std::cmp::Ordering::Greater
                        } else {
                            ord == std::cmp::Ordering::Less
                        }
                    }
                };
                if better {
                    *best = Some(v.clone());
                }
            }
            State::Arg { best, arg, want_max } => {
                let (v, a) = (&inputs[0], &inputs[1]);
                if v.is_na() {
                    return Ok(());
                }
                let better = match best {
                    None => true,
                    Some(cur) => {
                        let ord = v.compare_for_sort(cur);
                        if *want_max {
                            ord == std::cmp::Ordering::Greater
                        } else {
                            ord == std::cmp::Ordering::Less
                        }
                    }
                };
                if better {
                    *best = Some(v.clone());
                    *arg = Some(a.clone());
                }
            }
            State::MeanVar { count, mean, m2 } => {
                let v = &inputs[0];
                if v.is_na() {
                    return Ok(());
                }
                let x = v.as_f64().ok_or_else(|| ColonnadeError::TypeError("mean/variance/stddev require a numeric column".into()))?;
                *count += 1;
                let delta = x - *mean;
                *mean += delta / *count as f64;
                *m2 += delta * (x - *mean);
            }
            State::SelectOne(slot) => {
                if slot.is_none() && !inputs[0].is_na() {
                    *slot = Some(inputs[0].clone());
                }
            }
            State::ZipToList(items) => items.push(inputs[0].clone()),
            State::ZipToDict(entries) => entries.push((inputs[0].clone(), inputs[1].clone())),
            State::Quantile { values, .. } => {
                let v = &inputs[0];
                if v.is_na() {
                    return Ok(());
                }
                values.push(v.as_f64().ok_or_else(|| ColonnadeError::TypeError("quantile requires a numeric column".into()))?);
            }
        }
        Ok(())
    }

    fn combine(self, other: State) -> State {
        match (self, other) {
            (State::Count(a), State::Count(b)) => State::Count(a + b),
            (State::Sum(a), State::Sum(b)) => State::Sum(a + b),
            (State::MinMax { best: a, want_max }, State::MinMax { best: b, .. }) => {
                let best = match (a, b) {
                    (None, x) => x,
                    (x, None) => x,
                    (Some(a), Some(b)) => {
                        let ord = a.compare_for_sort(&b);
                        let keep_a = if want_max { ord != std::cmp::Ordering::Less } else { ord != std::cmp::Ordering::Greater };
                        Some(if keep_a { a } else { b })
                    }
                };
                State::MinMax { best, want_max }
            }
            (State::Arg { best: ba, arg: aa, want_max }, State::Arg { best: bb, arg: ab, .. }) => {
                let (best, arg) = match (ba, aa, bb, ab) {
                    (None, _, b, ab) => (b, ab),
                    (a, aa, None, _) => (a, aa),
                    (Some(a), aa, Some(b), ab) => {
                        let ord = a.compare_for_sort(&b);
                        let keep_a = if want_max { ord != std::cmp::Ordering::Less } else { ord != std::cmp::Ordering::Greater };
                        if keep_a { (Some(a), aa) } else { (Some(b), ab) }
                    }
                };
                State::Arg { best, arg, want_max }
            }
            (State::MeanVar { count: ca, mean: ma, m2: m2a }, State::MeanVar { count: cb, mean: mb, m2: m2b }) => {
                if ca == 0 {
                    return State::MeanVar { count: cb, mean: mb, m2: m2b };
                }
                if cb == 0 {
                    return State::MeanVar { count: ca, mean: ma, m2: m2a };
                }
                let count = ca + cb;
                let delta = mb - ma;
                let mean = ma + delta * cb as f64 / count as f64;
                let m2 = m2a + m2b + delta * delta * ca as f64 * cb as f64 / count as f64;
                State::MeanVar { count, mean, m2 }
            }
            (State::SelectOne(a), State::SelectOne(b)) => State::SelectOne(a.or(b)),
            (State::ZipToList(mut a), State::ZipToList(b)) => {
                a.extend(b);
                State::ZipToList(a)
            }
            (State::ZipToDict(mut a), State::ZipToDict(b)) => {
                a.extend(b);
                State::ZipToDict(a)
            }
            (State::Quantile { levels, mut values }, State::Quantile { values: other, .. }) => {
                values.extend(other);
                State::Quantile { levels, values }
            }
            (a, _) => a,
        }
    }

    fn emit(self) -> Value {
        match self {
            State::Count(n) => Value::Integer(n as i64),
            State::Sum(acc) => Value::Float(acc),
            State::MinMax { best, .. } => best.unwrap_or(Value::Undefined),
            State::Arg { arg, .. } => arg.unwrap_or(Value::Undefined),
            // Reached only if a `MeanVar` state is emitted without going
            // through `emit_with_kind` first; `mean` alone is the only
            // reducer-agnostic value this state can produce.
            State::MeanVar { count, mean, .. } => {
                if count == 0 {
                    Value::Undefined
                } else {
                    Value::Float(mean)
                }
            }
            State::SelectOne(v) => v.unwrap_or(Value::Undefined),
            State::ZipToList(items) => Value::List(items),
            State::ZipToDict(entries) => Value::Dict(entries),
            State::Quantile { levels, mut values } => {
                if values.is_empty() {
                    return Value::Undefined;
                }
                values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let qs: Vec<f64> = levels.iter().map(|&level| quantile_of(&values, level)).collect();
                if qs.len() == 1 {
                    Value::Float(qs[0])
                } else {
                    Value::Vector(qs)
                }
            }
        }
    }
}

fn quantile_of(sorted: &[f64], level: f64) -> f64 {
    let pos = level * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = pos - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

/// Emitting `mean`/`variance`/`stddev` needs to know *which* of the three was
/// asked for; `State::MeanVar` alone can't distinguish them, so the public
/// entry point threads the reducer kind through at emit time instead.
fn emit_with_kind(state: State, reducer: &Reducer) -> Value {
    if let (State::MeanVar { count, mean, m2 }, Reducer::Mean | Reducer::Variance | Reducer::Stddev) = (&state, reducer) {
        if *count == 0 {
            return Value::Undefined;
        }
        return match reducer {
            Reducer::Mean => Value::Float(*mean),
            Reducer::Variance => Value::Float(m2 / *count as f64),
            Reducer::Stddev => Value::Float((m2 / *count as f64).sqrt()),
            _ => unreachable!(),
        };
    }
    state.emit()
}

fn key_hash(key: &[Value]) -> u64 {
    crate::hashkey::combined_hash(key.iter())
}

type GroupTable = HashMap<u64, Vec<(Vec<Value>, Vec<State>)>>;

fn find_or_insert<'a>(table: &'a mut GroupTable, key: &[Value], aggregates: &[Aggregate]) -> &'a mut Vec<State> {
    let bucket = table.entry(key_hash(key)).or_default();
    if let Some(pos) = bucket.iter().position(|(k, _)| k.as_slice() == key) {
        &mut bucket[pos].1
    } else {
        bucket.push((key.to_vec(), aggregates.iter().map(|a| State::init(&a.reducer)).collect()));
        let last = bucket.len() - 1;
        &mut bucket[last].1
    }
}

fn merge_tables(mut a: GroupTable, b: GroupTable) -> GroupTable {
    for (hash, entries) in b {
        let bucket = a.entry(hash).or_default();
        for (key, states) in entries {
            if let Some(pos) = bucket.iter().position(|(k, _)| *k == key) {
                let existing = std::mem::take(&mut bucket[pos].1);
                bucket[pos].1 = existing.into_iter().zip(states).map(|(x, y)| x.combine(y)).collect();
            } else {
                bucket.push((key, states));
            }
        }
    }
    a
}

/// Groups `frame` by `keys` and reduces each group with `aggregates`. An
/// empty `keys` list is a single group over all rows. Large intermediate
/// tables spill to the frame's temp registry as serialized runs and are
/// merged back with `combine` once the configured row budget is hit.
pub fn groupby(frame: &SFrame, keys: &[String], aggregates: &[Aggregate]) -> ColonnadeResult<SFrame> {
    for agg in aggregates {
        for col in &agg.input_columns {
            if col != UNDEFINED_INPUT {
                frame.select_column(col)?;
            }
        }
    }
    for key in keys {
        frame.select_column(key)?;
    }

    let ctx = frame.context().clone();
    let cfg = ctx.config.snapshot();
    let names = frame.column_names();
    let key_idx: Vec<usize> = keys.iter().map(|k| names.iter().position(|n| n == k).unwrap()).collect();
    let input_idx: Vec<Vec<Option<usize>>> = aggregates
        .iter()
        .map(|a| a.input_columns.iter().map(|c| if c == UNDEFINED_INPUT { None } else { names.iter().position(|n| n == c) }).collect())
        .collect();

    let rows = frame.rows()?;
    let mut table: GroupTable = HashMap::new();
    let mut since_spill = 0usize;
    let mut spill_paths: Vec<std::path::PathBuf> = Vec::new();

    for row in &rows {
        let key: Vec<Value> = key_idx.iter().map(|&i| row[i].clone()).collect();
        let states = find_or_insert(&mut table, &key, aggregates);
        for (state, idx_list) in states.iter_mut().zip(&input_idx) {
            let inputs: Vec<Value> = idx_list.iter().map(|idx| idx.map(|i| row[i].clone()).unwrap_or(Value::Undefined)).collect();
            state.add(&inputs)?;
        }
        since_spill += 1;
        if since_spill >= cfg.groupby_row_budget {
            let path = spill(&ctx, &table)?;
            spill_paths.push(path);
            table = HashMap::new();
            since_spill = 0;
        }
    }

    for path in &spill_paths {
        let spilled = load_spill(path)?;
        table = merge_tables(table, spilled);
        let _ = std::fs::remove_file(path);
    }

    let mut out_rows: Vec<(Vec<Value>, Vec<Value>)> = Vec::new();
    for (_, entries) in table {
        for (key, states) in entries {
            let values = states.into_iter().zip(aggregates).map(|(s, a)| emit_with_kind(s, &a.reducer)).collect();
            out_rows.push((key, values));
        }
    }

    let mut columns = Vec::with_capacity(keys.len() + aggregates.len());
    for (i, name) in keys.iter().enumerate() {
        let dtype = frame.select_column(name)?.dtype();
        let values = out_rows.iter().map(|(k, _)| k[i].clone()).collect();
        columns.push((name.clone(), SArray::from_values(ctx.clone(), dtype, values)));
    }
    for (i, agg) in aggregates.iter().enumerate() {
        let values: Vec<Value> = out_rows.iter().map(|(_, v)| v[i].clone()).collect();
        let dtype = infer_output_type(&agg.reducer, &values);
        columns.push((agg.output_name.clone(), SArray::from_values(ctx.clone(), dtype, values)));
    }
    SFrame::new(ctx, columns)
}

fn infer_output_type(reducer: &Reducer, values: &[Value]) -> ValueType {
    match reducer {
        Reducer::Count => ValueType::Integer,
        Reducer::Sum | Reducer::Mean | Reducer::Variance | Reducer::Stddev => ValueType::Float,
        Reducer::ZipToList => ValueType::List,
        Reducer::ZipToDict => ValueType::Dict,
        _ => values.iter().find(|v| !v.is_na()).map(|v| v.dtype()).unwrap_or(ValueType::Undefined),
    }
}

fn spill(ctx: &Context, table: &GroupTable) -> ColonnadeResult<std::path::PathBuf> {
    let path = ctx.temp.unique_path("groupby-spill");
    let file = std::fs::File::create(&path).map_err(|e| ColonnadeError::io(format!("create spill {}", path.display()), e))?;
    serde_json::to_writer(file, table).map_err(|e| ColonnadeError::format("groupby-spill", e.to_string()))?;
    Ok(path)
}

fn load_spill(path: &std::path::Path) -> ColonnadeResult<GroupTable> {
    let file = std::fs::File::open(path).map_err(|e| ColonnadeError::io(format!("read spill {}", path.display()), e))?;
    serde_json::from_reader(file).map_err(|e| ColonnadeError::format("groupby-spill", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_context;
    use colonnade_core::ValueType;

    fn frame() -> (SFrame, std::sync::Arc<Context>) {
        let (ctx, _dir) = test_context();
        let user = SArray::from_values(ctx.clone(), ValueType::Integer, vec![5, 5, 6, 7].into_iter().map(Value::Integer).collect());
        let movie = SArray::from_values(ctx.clone(), ValueType::Integer, vec![10, 15, 12, 13].into_iter().map(Value::Integer).collect());
        (SFrame::new(ctx.clone(), vec![("user".to_string(), user), ("movie".to_string(), movie)]).unwrap(), ctx)
    }

    #[test]
    fn groupby_count_and_sum() {
        let (frame, _ctx) = frame();
        let aggregates = vec![
            Aggregate::new("movie_count", vec!["movie".to_string()], Reducer::Count).unwrap(),
            Aggregate::new("movie_sum", vec!["movie".to_string()], Reducer::Sum).unwrap(),
        ];
        let grouped = groupby(&frame, &["user".to_string()], &aggregates).unwrap();
        assert_eq!(grouped.num_rows().unwrap(), 3);
        let rows = grouped.rows().unwrap();
        let mut by_user: HashMap<i64, (i64, f64)> = HashMap::new();
        for row in rows {
            if let (Value::Integer(u), Value::Integer(c), Value::Float(s)) = (&row[0], &row[1], &row[2]) {
                by_user.insert(*u, (*c, *s));
            }
        }
        assert_eq!(by_user.get(&5), Some(&(2, 25.0)));
        assert_eq!(by_user.get(&6), Some(&(1, 12.0)));
        assert_eq!(by_user.get(&7), Some(&(1, 13.0)));
    }

    #[test]
    fn groupby_totality_matches_input_row_count() {
        let (frame, _ctx) = frame();
        let aggregates = vec![Aggregate::new("n", vec!["movie".to_string()], Reducer::Count).unwrap()];
        let grouped = groupby(&frame, &["user".to_string()], &aggregates).unwrap();
        let total: i64 = grouped.rows().unwrap().iter().map(|r| match &r[1] {
            Value::Integer(i) => *i,
            _ => 0,
        }).sum();
        assert_eq!(total, frame.num_rows().unwrap() as i64);
    }

    #[test]
    fn empty_keys_is_a_single_group() {
        let (frame, _ctx) = frame();
        let aggregates = vec![Aggregate::new("n", vec!["movie".to_string()], Reducer::Count).unwrap()];
        let grouped = groupby(&frame, &[], &aggregates).unwrap();
        assert_eq!(grouped.num_rows().unwrap(), 1);
        assert_eq!(grouped.rows().unwrap()[0][0], Value::Integer(4));
    }

    #[test]
    fn unknown_reducer_name_is_config_error() {
        assert!(parse_reducer("bogus").is_err());
    }

    #[test]
    fn quantile_parses_comma_separated_levels() {
        let r = parse_reducer("quantile(0.25,0.5,0.75)").unwrap();
        assert_eq!(r, Reducer::Quantile(vec![0.25, 0.5, 0.75]));
    }
}
