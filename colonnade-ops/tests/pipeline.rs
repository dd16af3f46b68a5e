//! Integration-level coverage spanning more than one op at a time: groupby
//! totality and join row multiplicity exercised together with a downstream
//! sort, the way a real pipeline would chain them.

use std::sync::Arc;

use colonnade_cache::TempRegistry;
use colonnade_core::{Config, Value, ValueType};
use colonnade_frame::{Context, SArray, SFrame};
use colonnade_ops::{groupby, join, sort, Aggregate, JoinType, Reducer, SortKey};

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
fn groupby_then_sort_orders_aggregated_output() {
    let (ctx, _dir) = test_context();
    let user = ints(&ctx, &[5, 5, 6, 7]);
    let movie = ints(&ctx, &[10, 15, 12, 13]);
    let ratings = SFrame::new(ctx, vec![("user".to_string(), user), ("movie".to_string(), movie)]).unwrap();

    let agg = Aggregate::new("movie_count", vec!["movie".to_string()], Reducer::Count).unwrap();
    let sum_agg = Aggregate::new("movie_sum", vec!["movie".to_string()], Reducer::Sum).unwrap();
    let grouped = groupby(&ratings, &["user".to_string()], &[agg, sum_agg]).unwrap();
    assert_eq!(grouped.num_rows().unwrap(), 3);

    let sorted = sort(&grouped, &[SortKey::desc("movie_sum")]).unwrap();
    let sums: Vec<f64> = sorted
        .select_column("movie_sum")
        .unwrap()
        .materialize()
        .unwrap()
        .iter()
        .map(|v| match v {
            Value::Float(f) => *f,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(sums, vec![25.0, 13.0, 12.0]);
}

#[test]
fn join_then_groupby_aggregates_matched_rows() {
    let (ctx, _dir) = test_context();
    let left_id = ints(&ctx, &[1, 2, 2, 3]);
    let left = SFrame::new(ctx.clone(), vec![("id".to_string(), left_id)]).unwrap();

    let right_id = ints(&ctx, &[2, 2, 3, 5]);
    let right_score = ints(&ctx, &[10, 20, 30, 40]);
    let right = SFrame::new(ctx, vec![("id".to_string(), right_id), ("score".to_string(), right_score)]).unwrap();

    let joined = join(&left, &right, JoinType::Inner, &[("id".to_string(), "id".to_string())]).unwrap();
    assert_eq!(joined.num_rows().unwrap(), 5);

    let sum_agg = Aggregate::new("score_sum", vec!["score".to_string()], Reducer::Sum).unwrap();
    let grouped = groupby(&joined, &["id".to_string()], &[sum_agg]).unwrap();
    assert_eq!(grouped.num_rows().unwrap(), 2);

    let total: f64 = grouped
        .select_column("score_sum")
        .unwrap()
        .materialize()
        .unwrap()
        .iter()
        .map(|v| match v {
            Value::Float(f) => *f,
            _ => unreachable!(),
        })
        .sum();
    // id=2 rows contribute (10+20)*2 = 60, id=3 contributes 30.
    assert_eq!(total, 90.0);
}
