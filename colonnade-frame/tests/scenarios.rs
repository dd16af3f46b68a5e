//! End-to-end lazy-graph behavior that doesn't need `colonnade-ops`:
//! transform/filter/append/materialization semantics and the invariants
//! they're expected to uphold.

use std::sync::Arc;

use colonnade_cache::TempRegistry;
use colonnade_core::{Config, Value, ValueType};
use colonnade_frame::{ArithOp, Context, SArray, SFrame};

fn test_context() -> (Arc<Context>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let temp = Arc::new(TempRegistry::with_base(dir.path()).unwrap());
    let ctx = Context::with_temp(Config::default(), temp).unwrap();
    (ctx, dir)
}

fn ints(ctx: &Arc<Context>, xs: &[i64]) -> SArray {
    SArray::from_values(ctx.clone(), ValueType::Integer, xs.iter().map(|&x| Value::Integer(x)).collect())
}

#[test]
fn transform_then_filter_materializes_three_rows_and_round_trips_through_save() {
    let (ctx, dir) = test_context();
    ctx.config.set_default_num_segments(1).unwrap();

    let a = ints(&ctx, &[1, 2, 3, 4, 5]);
    let doubled = a.transform(|v| Ok(Value::Integer(v.as_f64().unwrap() as i64 * 2)), ValueType::Integer);
    let big = doubled.filter(|v| Ok(v.as_f64().unwrap_or(0.0) > 5.0));

    assert_eq!(big.materialize().unwrap(), &[Value::Integer(6), Value::Integer(8), Value::Integer(10)]);

    let index_path = dir.path().join("s1.sidx");
    big.save(&index_path).unwrap();
    let reopened = SArray::open(ctx, &index_path).unwrap();
    assert_eq!(reopened.materialize().unwrap(), &[Value::Integer(6), Value::Integer(8), Value::Integer(10)]);
}

#[test]
fn append_then_size_is_additive_without_materializing() {
    let (ctx, _dir) = test_context();
    let a = ints(&ctx, &[1, 2, 3]);
    let b = ints(&ctx, &[4, 5]);
    let combined = a.append(&b).unwrap();

    assert_eq!(combined.size().unwrap(), 5);
    assert!(!combined.is_materialized());
    assert_eq!(
        combined.materialize().unwrap(),
        &[Value::Integer(1), Value::Integer(2), Value::Integer(3), Value::Integer(4), Value::Integer(5)]
    );
}

#[test]
fn all_false_mask_yields_zero_rows_preserving_schema() {
    let (ctx, _dir) = test_context();
    let user = ints(&ctx, &[5, 5, 6, 7]);
    let movie = ints(&ctx, &[10, 15, 12, 13]);
    let frame = SFrame::new(ctx.clone(), vec![("user".to_string(), user), ("movie".to_string(), movie)]).unwrap();

    let mask = SArray::from_values(ctx, ValueType::Integer, vec![Value::Integer(0); 4]);
    let filtered = frame.logical_filter(&mask).unwrap();

    assert_eq!(filtered.num_rows().unwrap(), 0);
    assert_eq!(filtered.column_names(), vec!["user".to_string(), "movie".to_string()]);
    assert_eq!(filtered.column_types(), vec![ValueType::Integer, ValueType::Integer]);
}

#[test]
fn select_column_matches_direct_column_and_preserves_order() {
    let (ctx, _dir) = test_context();
    let user = ints(&ctx, &[5, 5, 6, 7]);
    let movie = ints(&ctx, &[10, 15, 12, 13]);
    let frame = SFrame::new(ctx, vec![("user".to_string(), user), ("movie".to_string(), movie)]).unwrap();

    let selected = frame.select_column("movie").unwrap();
    assert_eq!(selected.materialize().unwrap(), frame.rows().unwrap().iter().map(|r| r[1].clone()).collect::<Vec<_>>().as_slice());

    let sub = frame.select_columns(&["movie".to_string(), "user".to_string()]).unwrap();
    assert_eq!(sub.column_names(), vec!["movie".to_string(), "user".to_string()]);
}

#[test]
fn filter_commutes_with_projection() {
    let (ctx, _dir) = test_context();
    let user = ints(&ctx, &[5, 5, 6, 7]);
    let movie = ints(&ctx, &[10, 15, 12, 13]);
    let frame = SFrame::new(ctx.clone(), vec![("user".to_string(), user), ("movie".to_string(), movie)]).unwrap();
    let mask = SArray::from_values(ctx, ValueType::Integer, vec![1, 0, 1, 0].into_iter().map(Value::Integer).collect());

    let filter_then_project = frame.logical_filter(&mask).unwrap().select_column("movie").unwrap();
    let project_then_filter = frame.select_column("movie").unwrap().logical_filter(&mask).unwrap();

    assert_eq!(filter_then_project.materialize().unwrap(), project_then_filter.materialize().unwrap());
}

#[test]
fn append_is_associative_row_wise() {
    let (ctx, _dir) = test_context();
    let a = ints(&ctx, &[1, 2]);
    let b = ints(&ctx, &[3, 4]);
    let c = ints(&ctx, &[5, 6]);

    let left = a.append(&b).unwrap().append(&c).unwrap();
    let right = a.append(&b.append(&c).unwrap()).unwrap();

    assert_eq!(left.materialize().unwrap(), right.materialize().unwrap());
}

#[test]
fn materializing_twice_is_idempotent() {
    let (ctx, _dir) = test_context();
    let a = ints(&ctx, &[1, 2, 3]);
    let doubled = a.transform(|v| Ok(Value::Integer(v.as_f64().unwrap() as i64 * 2)), ValueType::Integer);

    let first = doubled.materialize().unwrap().to_vec();
    let second = doubled.materialize().unwrap().to_vec();
    assert_eq!(first, second);
    assert!(doubled.is_materialized());
}

#[test]
fn round_trip_through_save_and_open_preserves_every_element() {
    let (ctx, dir) = test_context();
    let a = ints(&ctx, &[7, -3, 0, 42, 100]);
    let before = a.materialize().unwrap().to_vec();

    let path = dir.path().join("roundtrip.sidx");
    a.save(&path).unwrap();
    let reopened = SArray::open(ctx, &path).unwrap();

    assert_eq!(reopened.materialize().unwrap(), before.as_slice());
}

#[test]
fn two_consumers_at_same_cadence_match_independent_reexecution() {
    let (ctx, _dir) = test_context();
    let a = ints(&ctx, &[1, 2, 3, 4, 5]);
    let square = |v: &Value| Ok(Value::Integer(v.as_f64().unwrap() as i64 * v.as_f64().unwrap() as i64));

    // Two independent consumers of the same source node, driven to
    // materialization at the same cadence (once each, no partial pulls).
    let consumer_one = a.transform(square, ValueType::Integer);
    let consumer_two = a.transform(square, ValueType::Integer);

    // An entirely fresh re-execution over a separately constructed source.
    let fresh_source = ints(&ctx, &[1, 2, 3, 4, 5]);
    let independent = fresh_source.transform(square, ValueType::Integer);

    let r1 = consumer_one.materialize().unwrap();
    let r2 = consumer_two.materialize().unwrap();
    let r3 = independent.materialize().unwrap();
    assert_eq!(r1, r2);
    assert_eq!(r1, r3);
}

#[test]
fn arith_with_requires_equal_length_columns() {
    let (ctx, _dir) = test_context();
    let a = SArray::from_values(ctx.clone(), ValueType::Float, vec![Value::Float(1.0), Value::Float(2.0)]);
    let b = SArray::from_values(ctx, ValueType::Float, vec![Value::Float(1.0)]);
    let zipped = a.arith_with(&b, ArithOp::Add);
    assert!(zipped.materialize().is_err());
}
