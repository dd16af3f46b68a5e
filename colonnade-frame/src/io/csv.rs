//! CSV reader/writer, built on the `csv` crate
//! rather than the hand-rolled escape policy in `colonnade_core::value`:
//! `csv::Writer` is the one authority deciding whether a field needs
//! quoting, so values are rendered to plain strings here and escaped once.

use std::path::Path;
use std::sync::Arc;

use colonnade_core::{ColonnadeError, ColonnadeResult, DateTimeValue, Value, ValueType};

use crate::context::Context;
use crate::sarray::SArray;
use crate::sframe::SFrame;

pub fn read_csv(ctx: Arc<Context>, path: &Path, schema: Option<&[(String, ValueType)]>) -> ColonnadeResult<SFrame> {
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| ColonnadeError::format("csv", format!("opening {}: {e}", path.display())))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ColonnadeError::format("csv", e.to_string()))?
        .iter()
        .map(String::from)
        .collect();

    let mut raw_columns: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for result in reader.records() {
        let record = result.map_err(|e| ColonnadeError::format("csv", e.to_string()))?;
        for (i, field) in record.iter().enumerate() {
            if let Some(col) = raw_columns.get_mut(i) {
                col.push(field.to_string());
            }
        }
    }

    let mut columns = Vec::with_capacity(headers.len());
    for (i, name) in headers.iter().enumerate() {
        let dtype = schema
            .and_then(|s| s.iter().find(|(n, _)| n == name).map(|(_, t)| *t))
            .unwrap_or_else(|| infer_column_type(&raw_columns[i]));
        let values = raw_columns[i].iter().map(|s| parse_cell(s, dtype)).collect::<ColonnadeResult<Vec<_>>>()?;
        columns.push((name.clone(), SArray::from_values(ctx.clone(), dtype, values)));
    }
    SFrame::new(ctx, columns)
}

pub fn write_csv(frame: &SFrame, path: &Path) -> ColonnadeResult<()> {
    let mut writer = ::csv::WriterBuilder::new()
        .from_path(path)
        .map_err(|e| ColonnadeError::format("csv", format!("creating {}: {e}", path.display())))?;
    writer
        .write_record(frame.column_names())
        .map_err(|e| ColonnadeError::format("csv", e.to_string()))?;
    for row in frame.rows()? {
        let record: Vec<String> = row.iter().map(cell_string).collect();
        writer.write_record(record).map_err(|e| ColonnadeError::format("csv", e.to_string()))?;
    }
    writer.flush().map_err(|e| ColonnadeError::io("flush csv", e))
}

fn cell_string(v: &Value) -> String {
    match v {
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::String(s) => s.clone(),
        Value::Vector(items) => format!("[{}]", items.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(",")),
        Value::List(items) => format!("[{}]", items.iter().map(cell_string).collect::<Vec<_>>().join(",")),
        Value::Dict(entries) => {
            format!("{{{}}}", entries.iter().map(|(k, v)| format!("{}:{}", cell_string(k), cell_string(v))).collect::<Vec<_>>().join(","))
        }
        Value::Image(_) => String::new(),
        Value::DateTime(dt) => dt.to_chrono().to_rfc3339(),
        Value::Undefined => String::new(),
    }
}

fn parse_cell(s: &str, dtype: ValueType) -> ColonnadeResult<Value> {
    if s.is_empty() {
        return Ok(Value::Undefined);
    }
    Ok(match dtype {
        ValueType::Integer => Value::Integer(s.parse().map_err(|_| ColonnadeError::format("csv", format!("cannot parse '{s}' as integer")))?),
        ValueType::Float => Value::Float(s.parse().map_err(|_| ColonnadeError::format("csv", format!("cannot parse '{s}' as float")))?),
        ValueType::String => Value::String(s.to_string()),
        ValueType::DateTime => {
            let dt = chrono::DateTime::parse_from_rfc3339(s).map_err(|_| ColonnadeError::format("csv", format!("cannot parse '{s}' as datetime")))?;
            Value::DateTime(DateTimeValue::new(dt.timestamp(), (dt.offset().local_minus_utc() / 1800) as i32))
        }
        other => return Err(ColonnadeError::UnsupportedOperation(format!("CSV columns of type {other:?} are not supported"))),
    })
}

fn infer_column_type(values: &[String]) -> ValueType {
    let nonempty: Vec<&String> = values.iter().filter(|s| !s.is_empty()).collect();
    if nonempty.is_empty() {
        return ValueType::String;
    }
    if nonempty.iter().all(|s| s.parse::<i64>().is_ok()) {
        return ValueType::Integer;
    }
    if nonempty.iter().all(|s| s.parse::<f64>().is_ok()) {
        return ValueType::Float;
    }
    ValueType::String
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_context;
    use std::io::Write;

    #[test]
    fn round_trips_inferred_types() {
        let (ctx, dir) = test_context();
        let path = dir.path().join("data.csv");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            writeln!(f, "a,b,c").unwrap();
            writeln!(f, "1,2.5,hello").unwrap();
            writeln!(f, "2,3.5,world").unwrap();
        }
        let frame = read_csv(ctx.clone(), &path, None).unwrap();
        assert_eq!(frame.column_types(), vec![ValueType::Integer, ValueType::Float, ValueType::String]);
        assert_eq!(frame.num_rows().unwrap(), 2);

        let out_path = dir.path().join("out.csv");
        frame.write_csv(&out_path).unwrap();
        let back = read_csv(ctx, &out_path, None).unwrap();
        assert_eq!(back.num_rows().unwrap(), 2);
    }

    #[test]
    fn empty_field_is_undefined() {
        let (ctx, dir) = test_context();
        let path = dir.path().join("data.csv");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            writeln!(f, "a,b").unwrap();
            writeln!(f, "1,x").unwrap();
            writeln!(f, ",y").unwrap();
        }
        let frame = read_csv(ctx, &path, None).unwrap();
        let vals = frame.select_column("a").unwrap().materialize().unwrap().to_vec();
        assert_eq!(vals, vec![Value::Integer(1), Value::Undefined]);
    }
}
