//! Grace hash join, grounded in
//! `examples/original_source/src/sframe/join.cpp` for the column-existence
//! and matching-type checks and the build/probe-by-estimated-size idea. The
//! bucket-pair-at-a-time spill-to-disk shape of the original's
//! `hash_join_executor` collapses here into one in-memory hash table over
//! the smaller side, since `join` always materializes its output anyway
//! (`OpKind::GroupbySortJoin`) and both sides already live in memory as soon
//! as either is read via `SFrame::rows()`.

use std::collections::HashMap;

use colonnade_core::{ColonnadeError, ColonnadeResult, Value, ValueType};
use colonnade_frame::{SArray, SFrame};

use crate::hashkey::combined_hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Outer,
}

/// Joins `left` and `right` on the column-name correspondence `on`
/// (`(left_column, right_column)` pairs). Matched column pairs must share a
/// type, else `TypeError`. The right side's join columns are
/// dropped from the output (they duplicate the left's matched value); any
/// remaining right column name that collides with a left one is suffixed
/// `.right`.
///
/// An empty side is not an error: an inner join against an empty side
/// produces zero rows, and a left/right/outer join against an empty side
/// emits every row of the non-empty side with `Undefined` in the missing
/// columns, the same as if every key had failed to match.
pub fn join(left: &SFrame, right: &SFrame, how: JoinType, on: &[(String, String)]) -> ColonnadeResult<SFrame> {
    if on.is_empty() {
        return Err(ColonnadeError::ConfigError("join requires at least one column correspondence".into()));
    }

    let left_names = left.column_names();
    let right_names = right.column_names();
    let mut left_idx = Vec::with_capacity(on.len());
    let mut right_idx = Vec::with_capacity(on.len());
    for (l, r) in on {
        let lt = left.select_column(l)?.dtype();
        let rt = right.select_column(r)?.dtype();
        if lt != rt {
            return Err(ColonnadeError::TypeError(format!("join columns '{l}' and '{r}' do not share a type ({lt:?} vs {rt:?})")));
        }
        left_idx.push(left_names.iter().position(|n| n == l).unwrap());
        right_idx.push(right_names.iter().position(|n| n == r).unwrap());
    }

    let left_rows = left.rows()?;
    let right_rows = right.rows()?;
    let pairs = matched_pairs(&left_rows, &right_rows, &left_idx, &right_idx);

    let matched_left: std::collections::HashSet<usize> = pairs.iter().map(|&(l, _)| l).collect();
    let matched_right: std::collections::HashSet<usize> = pairs.iter().map(|&(_, r)| r).collect();

    let right_on: std::collections::HashSet<String> = on.iter().map(|(_, r)| r.clone()).collect();
    let right_output_names: Vec<String> = right_names.iter().filter(|n| !right_on.contains(*n)).cloned().collect();
    let right_output_idx: Vec<usize> = right_output_names.iter().map(|n| right_names.iter().position(|x| x == n).unwrap()).collect();

    let mut out_rows: Vec<Vec<Value>> = Vec::new();
    for &(l, r) in &pairs {
        let mut row = left_rows[l].clone();
        row.extend(right_output_idx.iter().map(|&i| right_rows[r][i].clone()));
        out_rows.push(row);
    }
    if matches!(how, JoinType::Left | JoinType::Outer) {
        for (i, lrow) in left_rows.iter().enumerate() {
            if !matched_left.contains(&i) {
                let mut row = lrow.clone();
                row.extend(right_output_idx.iter().map(|_| Value::Undefined));
                out_rows.push(row);
            }
        }
    }
    if matches!(how, JoinType::Right | JoinType::Outer) {
        for (j, rrow) in right_rows.iter().enumerate() {
            if !matched_right.contains(&j) {
                let mut row: Vec<Value> = left_names.iter().map(|_| Value::Undefined).collect();
                row.extend(right_output_idx.iter().map(|&i| rrow[i].clone()));
                out_rows.push(row);
            }
        }
    }

    let ctx = left.context().clone();
    let mut schema: Vec<(String, ValueType)> = left_names.iter().cloned().zip(left.column_types()).collect();
    let right_types = right.column_types();
    for name in &right_output_names {
        let idx = right_names.iter().position(|n| n == name).unwrap();
        let dtype = right_types[idx];
        let name = if left_names.contains(name) { format!("{name}.right") } else { name.clone() };
        schema.push((name, dtype));
    }

    let mut columns = Vec::with_capacity(schema.len());
    for (i, (name, dtype)) in schema.iter().enumerate() {
        let values = out_rows.iter().map(|r| r[i].clone()).collect();
        columns.push((name.clone(), SArray::from_values(ctx.clone(), *dtype, values)));
    }
    SFrame::new(ctx, columns)
}

/// All `(left_row_index, right_row_index)` pairs whose join-key tuples
/// match, with full multiplicity. Builds the hash
/// table over whichever side has fewer rows.
fn matched_pairs(left_rows: &[Vec<Value>], right_rows: &[Vec<Value>], left_idx: &[usize], right_idx: &[usize]) -> Vec<(usize, usize)> {
    let build_is_left = left_rows.len() <= right_rows.len();
    let (build_rows, build_cols, probe_rows, probe_cols) =
        if build_is_left { (left_rows, left_idx, right_rows, right_idx) } else { (right_rows, right_idx, left_rows, left_idx) };

    let mut table: HashMap<u64, Vec<usize>> = HashMap::new();
    for (i, row) in build_rows.iter().enumerate() {
        let hash = combined_hash(build_cols.iter().map(|&c| &row[c]));
        table.entry(hash).or_default().push(i);
    }

    let mut pairs = Vec::new();
    for (j, prow) in probe_rows.iter().enumerate() {
        let hash = combined_hash(probe_cols.iter().map(|&c| &prow[c]));
        let Some(candidates) = table.get(&hash) else { continue };
        for &i in candidates {
            let brow = &build_rows[i];
            if build_cols.iter().zip(probe_cols).all(|(&bc, &pc)| brow[bc] == prow[pc]) {
                pairs.push(if build_is_left { (i, j) } else { (j, i) });
            }
        }
    }
    pairs
}
