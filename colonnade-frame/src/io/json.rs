//! Newline-delimited JSON reader/writer. Column set and types are inferred from the union of keys and
//! first non-null value seen across all lines, the same "observe, don't
//! declare" policy `io::csv::infer_column_type` uses for untyped CSV.

use std::path::Path;
use std::sync::Arc;

use colonnade_core::{ColonnadeError, ColonnadeResult, Value, ValueType};
use serde_json::Map;

use crate::context::Context;
use crate::sarray::SArray;
use crate::sframe::SFrame;

pub fn read_json_lines(ctx: Arc<Context>, path: &Path) -> ColonnadeResult<SFrame> {
    let text = std::fs::read_to_string(path).map_err(|e| ColonnadeError::io(format!("read {}", path.display()), e))?;

    let mut column_order: Vec<String> = Vec::new();
    let mut rows: Vec<Map<String, serde_json::Value>> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed: serde_json::Value = serde_json::from_str(line).map_err(|e| ColonnadeError::format("json", e.to_string()))?;
        let serde_json::Value::Object(map) = parsed else {
            return Err(ColonnadeError::format("json", "each line must be a JSON object"));
        };
        for key in map.keys() {
            if !column_order.contains(key) {
                column_order.push(key.clone());
            }
        }
        rows.push(map);
    }

    let mut columns = Vec::with_capacity(column_order.len());
    for name in &column_order {
        let values: Vec<Value> = rows.iter().map(|row| row.get(name).map(json_to_value).unwrap_or(Value::Undefined)).collect();
        let dtype = values.iter().find(|v| !v.is_na()).map(|v| v.dtype()).unwrap_or(ValueType::Undefined);
        columns.push((name.clone(), SArray::from_values(ctx.clone(), dtype, values)));
    }
    SFrame::new(ctx, columns)
}

pub fn write_json_lines(frame: &SFrame, path: &Path) -> ColonnadeResult<()> {
    let names = frame.column_names();
    let mut out = String::new();
    for row in frame.rows()? {
        let mut map = Map::new();
        for (name, v) in names.iter().zip(row.iter()) {
            map.insert(name.clone(), v.to_json());
        }
        out.push_str(&serde_json::Value::Object(map).to_string());
        out.push('\n');
    }
    std::fs::write(path, out).map_err(|e| ColonnadeError::io(format!("write {}", path.display()), e))
}

fn json_to_value(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Undefined,
        serde_json::Value::Bool(b) => Value::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => n.as_i64().map(Value::Integer).unwrap_or_else(|| Value::Float(n.as_f64().unwrap_or(f64::NAN))),
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::List(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => Value::Dict(map.iter().map(|(k, v)| (Value::String(k.clone()), json_to_value(v))).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_context;

    #[test]
    fn round_trips_mixed_schema() {
        let (ctx, dir) = test_context();
        let path = dir.path().join("data.jsonl");
        std::fs::write(&path, "{\"a\":1,\"b\":\"x\"}\n{\"a\":2,\"b\":\"y\",\"c\":3.5}\n").unwrap();

        let frame = read_json_lines(ctx.clone(), &path).unwrap();
        assert_eq!(frame.num_rows().unwrap(), 2);
        assert_eq!(frame.column_names(), vec!["a", "b", "c"]);
        let c_vals = frame.select_column("c").unwrap().materialize().unwrap().to_vec();
        assert_eq!(c_vals, vec![Value::Undefined, Value::Float(3.5)]);

        let out_path = dir.path().join("out.jsonl");
        frame.write_json_lines(&out_path).unwrap();
        let back = read_json_lines(ctx, &out_path).unwrap();
        assert_eq!(back.num_rows().unwrap(), 2);
    }
}
