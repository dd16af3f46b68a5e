//! SFrame: an ordered set of row-aligned SArrays. Every
//! column must report the same row count once materialized; this module
//! enforces that invariant at construction and mutation time rather than
//! trusting callers.

use std::path::Path;
use std::sync::Arc;

use colonnade_core::{ColonnadeError, ColonnadeResult, CsvFormat, Value, ValueType};
use colonnade_format::SFrameIndex;
use tabled::builder::Builder as TableBuilder;

use crate::context::Context;
use crate::io::{csv as csv_io, json as json_io};
use crate::sarray::SArray;

#[derive(Clone)]
pub struct SFrame {
    ctx: Arc<Context>,
    columns: Vec<(String, SArray)>,
}

impl SFrame {
    pub fn new(ctx: Arc<Context>, columns: Vec<(String, SArray)>) -> ColonnadeResult<Self> {
        let frame = Self { ctx, columns };
        frame.check_alignment()?;
        Ok(frame)
    }

    pub fn empty(ctx: Arc<Context>) -> Self {
        Self { ctx, columns: Vec::new() }
    }

    /// Shared runtime handle (config, thread pool, temp registry) backing
    /// this frame's columns, needed by `colonnade_ops` to honor the same
    /// budgets and cancellation tokens the frame itself was built with.
    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    fn check_alignment(&self) -> ColonnadeResult<()> {
        let mut rows: Option<u64> = None;
        for (name, col) in &self.columns {
            let n = col.size()?;
            match rows {
                None => rows = Some(n),
                Some(expected) if expected != n => {
                    return Err(ColonnadeError::RangeError(format!(
                        "column '{name}' has {n} rows, expected {expected} to match the rest of the frame"
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn num_rows(&self) -> ColonnadeResult<u64> {
        match self.columns.first() {
            Some((_, col)) => col.size(),
            None => Ok(0),
        }
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn column_types(&self) -> Vec<ValueType> {
        self.columns.iter().map(|(_, col)| col.dtype()).collect()
    }

    fn position(&self, name: &str) -> ColonnadeResult<usize> {
        self.columns
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| ColonnadeError::RangeError(format!("no such column '{name}'")))
    }

    pub fn select_column(&self, name: &str) -> ColonnadeResult<SArray> {
        Ok(self.columns[self.position(name)?].1.clone())
    }

    pub fn select_columns(&self, names: &[String]) -> ColonnadeResult<Self> {
        let columns = names
            .iter()
            .map(|name| Ok((name.clone(), self.select_column(name)?)))
            .collect::<ColonnadeResult<Vec<_>>>()?;
        Self::new(self.ctx.clone(), columns)
    }

    pub fn add_column(&self, name: impl Into<String>, column: SArray) -> ColonnadeResult<Self> {
        let name = name.into();
        if self.columns.iter().any(|(n, _)| *n == name) {
            return Err(ColonnadeError::TypeError(format!("column '{name}' already exists")));
        }
        let mut columns = self.columns.clone();
        columns.push((name, column));
        Self::new(self.ctx.clone(), columns)
    }

    pub fn remove_column(&self, name: &str) -> ColonnadeResult<Self> {
        let idx = self.position(name)?;
        let mut columns = self.columns.clone();
        columns.remove(idx);
        Ok(Self { ctx: self.ctx.clone(), columns })
    }

    pub fn rename(&self, old: &str, new: impl Into<String>) -> ColonnadeResult<Self> {
        let idx = self.position(old)?;
        let new = new.into();
        if self.columns.iter().any(|(n, _)| *n == new) {
            return Err(ColonnadeError::TypeError(format!("column '{new}' already exists")));
        }
        let mut columns = self.columns.clone();
        columns[idx].0 = new;
        Ok(Self { ctx: self.ctx.clone(), columns })
    }

    pub fn swap_columns(&self, a: &str, b: &str) -> ColonnadeResult<Self> {
        let ia = self.position(a)?;
        let ib = self.position(b)?;
        let mut columns = self.columns.clone();
        columns.swap(ia, ib);
        Ok(Self { ctx: self.ctx.clone(), columns })
    }

    /// Applies the same row mask to every column.
    pub fn logical_filter(&self, mask: &SArray) -> ColonnadeResult<Self> {
        let columns = self
            .columns
            .iter()
            .map(|(name, col)| Ok((name.clone(), col.logical_filter(mask)?)))
            .collect::<ColonnadeResult<Vec<_>>>()?;
        Self::new(self.ctx.clone(), columns)
    }

    /// Builds one owned row (in column order) per materialized row index.
    /// Intended for `transform_row`/`flat_map`/the row iterator, all of
    /// which need whole-row access and therefore force materialization of
    /// every column.
    fn materialized_rows(&self) -> ColonnadeResult<Vec<Vec<Value>>> {
        let num_rows = self.num_rows()? as usize;
        let mut columns = Vec::with_capacity(self.columns.len());
        for (_, col) in &self.columns {
            columns.push(col.materialize()?);
        }
        let mut rows = Vec::with_capacity(num_rows);
        for i in 0..num_rows {
            rows.push(columns.iter().map(|c| c[i].clone()).collect());
        }
        Ok(rows)
    }

    pub fn rows(&self) -> ColonnadeResult<Vec<Vec<Value>>> {
        self.materialized_rows()
    }

    /// `transform_row(fn, out_type)`: one row (as a `Vec<Value>` in column
    /// order) in, one value out.
    pub fn transform_row<F>(&self, f: F, out_type: ValueType) -> ColonnadeResult<SArray>
    where
        F: Fn(&[Value]) -> ColonnadeResult<Value>,
    {
        let rows = self.materialized_rows()?;
        let values = rows.iter().map(|row| f(row)).collect::<ColonnadeResult<Vec<_>>>()?;
        Ok(SArray::from_values(self.ctx.clone(), out_type, values))
    }

    /// `flat_map(fn, out_schema)`: each input row may expand into zero or
    /// more output rows, producing a brand new SFrame with `out_schema`'s
    /// column names and declared types.
    pub fn flat_map<F>(&self, f: F, out_schema: &[(String, ValueType)]) -> ColonnadeResult<Self>
    where
        F: Fn(&[Value]) -> ColonnadeResult<Vec<Vec<Value>>>,
    {
        let rows = self.materialized_rows()?;
        let mut out_rows: Vec<Vec<Value>> = Vec::new();
        for row in &rows {
            out_rows.extend(f(row)?);
        }
        let mut columns = Vec::with_capacity(out_schema.len());
        for (i, (name, dtype)) in out_schema.iter().enumerate() {
            let values = out_rows.iter().map(|r| r.get(i).cloned().unwrap_or(Value::Undefined)).collect();
            columns.push((name.clone(), SArray::from_values(self.ctx.clone(), *dtype, values)));
        }
        Self::new(self.ctx.clone(), columns)
    }

    pub fn sample(&self, frac: f64, seed: u64) -> ColonnadeResult<Self> {
        if !(0.0..=1.0).contains(&frac) {
            return Err(ColonnadeError::RangeError("sample fraction must be in [0,1]".into()));
        }
        let num_rows = self.num_rows()? as usize;
        let keep: Vec<Value> = {
            use rand::rngs::SmallRng;
            use rand::{Rng, SeedableRng};
            let mut rng = SmallRng::seed_from_u64(seed);
            (0..num_rows).map(|_| Value::Integer(if rng.gen::<f64>() < frac { 1 } else { 0 })).collect()
        };
        let mask = SArray::from_values(self.ctx.clone(), ValueType::Integer, keep);
        self.logical_filter(&mask)
    }

    /// Splits rows into len(fractions) disjoint frames by a single seeded
    /// pass assigning each row to the first fraction bucket its draw falls
    /// into (remaining rows, if fractions don't sum to 1, go to neither).
    pub fn random_split(&self, fractions: &[f64], seed: u64) -> ColonnadeResult<Vec<Self>> {
        if fractions.iter().any(|f| !(0.0..=1.0).contains(f)) {
            return Err(ColonnadeError::RangeError("random_split fractions must be in [0,1]".into()));
        }
        let num_rows = self.num_rows()? as usize;
        use rand::rngs::SmallRng;
        use rand::{Rng, SeedableRng};
        let mut rng = SmallRng::seed_from_u64(seed);
        let draws: Vec<f64> = (0..num_rows).map(|_| rng.gen::<f64>()).collect();

        let mut out = Vec::with_capacity(fractions.len());
        let mut cumulative = 0.0;
        for &frac in fractions {
            let lower = cumulative;
            let upper = cumulative + frac;
            let mask_values: Vec<Value> = draws.iter().map(|d| Value::Integer(if *d >= lower && *d < upper { 1 } else { 0 })).collect();
            let mask = SArray::from_values(self.ctx.clone(), ValueType::Integer, mask_values);
            out.push(self.logical_filter(&mask)?);
            cumulative = upper;
        }
        Ok(out)
    }

    /// Combines several single-value columns into one Dict (named keys) or
    /// List (positional) column. The inverse of `stack`.
    pub fn pack_columns(&self, names: &[String], new_column_name: impl Into<String>, as_dict: bool) -> ColonnadeResult<Self> {
        let rows = self.materialized_rows()?;
        let indices = names.iter().map(|n| self.position(n)).collect::<ColonnadeResult<Vec<_>>>()?;
        let packed: Vec<Value> = rows
            .iter()
            .map(|row| {
                if as_dict {
                    Value::Dict(names.iter().zip(&indices).map(|(n, &i)| (Value::String(n.clone()), row[i].clone())).collect())
                } else {
                    Value::List(indices.iter().map(|&i| row[i].clone()).collect())
                }
            })
            .collect();
        let dtype = if as_dict { ValueType::Dict } else { ValueType::List };
        let mut remaining = self.clone();
        for name in names {
            remaining = remaining.remove_column(name)?;
        }
        remaining.add_column(new_column_name, SArray::from_values(self.ctx.clone(), dtype, packed))
    }

    /// Expands a List/Vector/Dict column into multiple rows, one per
    /// element, replicating every other column's value on that row. Rows
    /// whose packed column is empty or missing are dropped.
    pub fn stack(&self, column_name: &str, new_column_name: impl Into<String>) -> ColonnadeResult<Self> {
        let idx = self.position(column_name)?;
        let new_column_name = new_column_name.into();
        let rows = self.materialized_rows()?;
        let mut out_rows: Vec<Vec<Value>> = Vec::new();
        for row in &rows {
            let elements: Vec<Value> = match &row[idx] {
                Value::List(items) => items.clone(),
                Value::Vector(items) => items.iter().map(|x| Value::Float(*x)).collect(),
                Value::Dict(entries) => entries.iter().map(|(k, v)| Value::List(vec![k.clone(), v.clone()])).collect(),
                _ => Vec::new(),
            };
            for element in elements {
                let mut new_row: Vec<Value> = row.iter().enumerate().filter(|(i, _)| *i != idx).map(|(_, v)| v.clone()).collect();
                new_row.push(element);
                out_rows.push(new_row);
            }
        }

        let mut schema: Vec<(String, ValueType)> =
            self.columns.iter().enumerate().filter(|(i, _)| *i != idx).map(|(_, (name, col))| (name.clone(), col.dtype())).collect();
        schema.push((new_column_name, ValueType::Undefined));

        let mut columns = Vec::with_capacity(schema.len());
        for (i, (name, dtype)) in schema.iter().enumerate() {
            let values = out_rows.iter().map(|r| r[i].clone()).collect();
            columns.push((name.clone(), SArray::from_values(self.ctx.clone(), *dtype, values)));
        }
        Self::new(self.ctx.clone(), columns)
    }

    pub fn append(&self, other: &Self) -> ColonnadeResult<Self> {
        if self.column_names() != other.column_names() {
            return Err(ColonnadeError::TypeError("append requires both frames to have the same column names in the same order".into()));
        }
        let columns = self
            .columns
            .iter()
            .zip(other.columns.iter())
            .map(|((name, a), (_, b))| Ok((name.clone(), a.append(b)?)))
            .collect::<ColonnadeResult<Vec<_>>>()?;
        Self::new(self.ctx.clone(), columns)
    }

    /// Row slice `[start, end)` stepping by `step`.
    pub fn copy_range(&self, start: u64, step: u64, end: u64) -> ColonnadeResult<Self> {
        if step == 0 {
            return Err(ColonnadeError::RangeError("copy_range step must be > 0".into()));
        }
        let num_rows = self.num_rows()?;
        let end = end.min(num_rows);
        if start > end {
            return Err(ColonnadeError::RangeError(format!("copy_range start {start} is past end {end}")));
        }
        let mask_values: Vec<Value> = (0..num_rows)
            .map(|i| Value::Integer(if i >= start && i < end && (i - start) % step == 0 { 1 } else { 0 }))
            .collect();
        let mask = SArray::from_values(self.ctx.clone(), ValueType::Integer, mask_values);
        self.logical_filter(&mask)
    }

    pub fn read_csv(ctx: Arc<Context>, path: &Path, schema: Option<&[(String, ValueType)]>) -> ColonnadeResult<Self> {
        csv_io::read_csv(ctx, path, schema)
    }

    pub fn write_csv(&self, path: &Path) -> ColonnadeResult<()> {
        csv_io::write_csv(self, path)
    }

    pub fn read_json_lines(ctx: Arc<Context>, path: &Path) -> ColonnadeResult<Self> {
        json_io::read_json_lines(ctx, path)
    }

    pub fn write_json_lines(&self, path: &Path) -> ColonnadeResult<()> {
        json_io::write_json_lines(self, path)
    }

    pub fn save(&self, index_path: &Path) -> ColonnadeResult<()> {
        let dir = index_path.parent().unwrap_or_else(|| Path::new("."));
        let mut column_index_paths = Vec::with_capacity(self.columns.len());
        for (name, col) in &self.columns {
            let col_path = dir.join(format!("{name}.sidx"));
            col.save(&col_path)?;
            column_index_paths.push(col_path);
        }
        let index = SFrameIndex {
            version: 1,
            num_rows: self.num_rows()?,
            column_names: self.column_names(),
            column_index_paths,
            metadata: Default::default(),
        };
        index.write(index_path)
    }

    pub fn open(ctx: Arc<Context>, index_path: &Path) -> ColonnadeResult<Self> {
        let index = SFrameIndex::read(index_path)?;
        let columns = index
            .column_names
            .iter()
            .zip(index.column_index_paths.iter())
            .map(|(name, path)| Ok((name.clone(), SArray::open(ctx.clone(), path)?)))
            .collect::<ColonnadeResult<Vec<_>>>()?;
        Self::new(ctx, columns)
    }

    /// Bounded-row pretty table for debugging.
    pub fn print(&self, max_rows: usize) -> ColonnadeResult<String> {
        let mut builder = TableBuilder::default();
        builder.push_record(self.column_names());
        let rows = self.materialized_rows()?;
        for row in rows.iter().take(max_rows) {
            builder.push_record(row.iter().map(|v| v.to_csv_cell(&CsvFormat::default())));
        }
        let table = builder.build().to_string();
        if rows.len() > max_rows {
            Ok(format!("{table}\n... {} more rows", rows.len() - max_rows))
        } else {
            Ok(table)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_context;

    fn frame(ctx: Arc<Context>) -> SFrame {
        let a = SArray::from_values(ctx.clone(), ValueType::Integer, vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
        let b = SArray::from_values(
            ctx.clone(),
            ValueType::String,
            vec![Value::String("x".into()), Value::String("y".into()), Value::String("z".into())],
        );
        SFrame::new(ctx, vec![("a".to_string(), a), ("b".to_string(), b)]).unwrap()
    }

    #[test]
    fn rejects_misaligned_columns() {
        let (ctx, _dir) = test_context();
        let a = SArray::from_values(ctx.clone(), ValueType::Integer, vec![Value::Integer(1), Value::Integer(2)]);
        let b = SArray::from_values(ctx.clone(), ValueType::Integer, vec![Value::Integer(1)]);
        assert!(SFrame::new(ctx, vec![("a".to_string(), a), ("b".to_string(), b)]).is_err());
    }

    #[test]
    fn select_and_rename() {
        let (ctx, _dir) = test_context();
        let f = frame(ctx);
        assert_eq!(f.column_names(), vec!["a", "b"]);
        let renamed = f.rename("a", "first").unwrap();
        assert_eq!(renamed.column_names(), vec!["first", "b"]);
        assert!(f.select_column("a").is_ok());
    }

    #[test]
    fn logical_filter_keeps_alignment() {
        let (ctx, _dir) = test_context();
        let f = frame(ctx.clone());
        let mask = SArray::from_values(ctx, ValueType::Integer, vec![Value::Integer(1), Value::Integer(0), Value::Integer(1)]);
        let filtered = f.logical_filter(&mask).unwrap();
        assert_eq!(filtered.num_rows().unwrap(), 2);
        let a_vals = filtered.select_column("a").unwrap().materialize().unwrap().to_vec();
        assert_eq!(a_vals, vec![Value::Integer(1), Value::Integer(3)]);
    }

    #[test]
    fn pack_then_stack_round_trips_row_count() {
        let (ctx, _dir) = test_context();
        let f = frame(ctx);
        let packed = f.pack_columns(&["a".to_string(), "b".to_string()], "packed", true).unwrap();
        assert_eq!(packed.column_names(), vec!["packed"]);
        let stacked = packed.stack("packed", "unpacked").unwrap();
        assert_eq!(stacked.num_rows().unwrap(), 6);
    }

    #[test]
    fn copy_range_steps_rows() {
        let (ctx, _dir) = test_context();
        let a = SArray::from_values(
            ctx.clone(),
            ValueType::Integer,
            (0..10).map(Value::Integer).collect(),
        );
        let f = SFrame::new(ctx, vec![("a".to_string(), a)]).unwrap();
        let sliced = f.copy_range(0, 2, 10).unwrap();
        let vals = sliced.select_column("a").unwrap().materialize().unwrap().to_vec();
        assert_eq!(vals, vec![0, 2, 4, 6, 8].into_iter().map(Value::Integer).collect::<Vec<_>>());
    }
}
