//! Hand-rolled INI-style index file parsing/writing. No INI crate appears in any
//! example's dependency set, so the format (flat `key=value` lines under
//! `[section]` headers) is parsed by hand; the metadata dictionary is
//! embedded as one JSON blob (`serde_json`).

use colonnade_core::{ColonnadeError, ColonnadeResult, Value, ValueType};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A parsed INI document: ordered sections, each an ordered list of
/// key/value pairs (order preserved for `[segment_sizes]`-style sequences).
#[derive(Debug, Default)]
pub struct IniDocument {
    sections: Vec<(String, Vec<(String, String)>)>,
}

impl IniDocument {
    pub fn parse(text: &str) -> ColonnadeResult<Self> {
        let mut doc = IniDocument::default();
        let mut current: Option<String> = None;

        for (lineno, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                doc.sections.push((name.to_string(), Vec::new()));
                current = Some(name.to_string());
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                ColonnadeError::format("index", format!("malformed line {} (expected key=value): {line}", lineno + 1))
            })?;
            let Some(section) = current.as_ref() else {
                return Err(ColonnadeError::format("index", format!("line {} precedes any [section]", lineno + 1)));
            };
            let entry = doc.sections.iter_mut().find(|(name, _)| name == section).unwrap();
            entry.1.push((key.trim().to_string(), value.trim().to_string()));
        }
        Ok(doc)
    }

    pub fn section(&self, name: &str) -> Option<&[(String, String)]> {
        self.sections.iter().find(|(n, _)| n == name).map(|(_, kvs)| kvs.as_slice())
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)?.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Ordered sequence from a section whose keys are `"0"`, `"1"`, ...,
    /// sorted numerically, not lexically.
    pub fn ordered_sequence(&self, section: &str) -> Vec<String> {
        let Some(kvs) = self.section(section) else { return Vec::new() };
        let mut indexed: Vec<(usize, &str)> = kvs
            .iter()
            .filter_map(|(k, v)| k.parse::<usize>().ok().map(|i| (i, v.as_str())))
            .collect();
        indexed.sort_by_key(|(i, _)| *i);
        indexed.into_iter().map(|(_, v)| v.to_string()).collect()
    }

    pub fn push_section(&mut self, name: &str, entries: Vec<(String, String)>) {
        self.sections.push((name.to_string(), entries));
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, entries) in &self.sections {
            out.push('[');
            out.push_str(name);
            out.push_str("]\n");
            for (k, v) in entries {
                out.push_str(k);
                out.push('=');
                out.push_str(v);
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }
}

fn ordered_entries(items: impl IntoIterator<Item = String>) -> Vec<(String, String)> {
    items.into_iter().enumerate().map(|(i, v)| (i.to_string(), v)).collect()
}

fn metadata_to_json(metadata: &HashMap<String, Value>) -> String {
    let map: serde_json::Map<String, serde_json::Value> =
        metadata.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
    serde_json::Value::Object(map).to_string()
}

fn metadata_from_json(text: &str) -> HashMap<String, Value> {
    let Ok(serde_json::Value::Object(map)) = serde_json::from_str(text) else {
        return HashMap::new();
    };
    map.into_iter()
        .map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => Value::String(s),
                serde_json::Value::Number(n) => n
                    .as_i64()
                    .map(Value::Integer)
                    .unwrap_or_else(|| Value::Float(n.as_f64().unwrap_or(f64::NAN))),
                serde_json::Value::Null => Value::Undefined,
                other => Value::String(other.to_string()),
            };
            (k, value)
        })
        .collect()
}

fn tag_to_element_type(tag: &str) -> ColonnadeResult<ValueType> {
    Ok(match tag {
        "integer" => ValueType::Integer,
        "float" => ValueType::Float,
        "string" => ValueType::String,
        "vector" => ValueType::Vector,
        "list" => ValueType::List,
        "dict" => ValueType::Dict,
        "image" => ValueType::Image,
        "datetime" => ValueType::DateTime,
        "undefined" => ValueType::Undefined,
        other => return Err(ColonnadeError::format("index", format!("unknown element type '{other}'"))),
    })
}

fn element_type_to_tag(t: ValueType) -> &'static str {
    match t {
        ValueType::Integer => "integer",
        ValueType::Float => "float",
        ValueType::String => "string",
        ValueType::Vector => "vector",
        ValueType::List => "list",
        ValueType::Dict => "dict",
        ValueType::Image => "image",
        ValueType::DateTime => "datetime",
        ValueType::Undefined => "undefined",
    }
}

/// Column index file. Segment paths are stored
/// relative to the index file and resolved against its directory on read.
#[derive(Debug, Clone)]
pub struct SArrayIndex {
    pub version: u32,
    pub element_type: ValueType,
    pub segment_row_counts: Vec<u64>,
    pub segment_paths: Vec<PathBuf>,
    pub metadata: HashMap<String, Value>,
}

impl SArrayIndex {
    pub fn total_rows(&self) -> u64 {
        self.segment_row_counts.iter().sum()
    }

    pub fn write(&self, index_path: &Path) -> ColonnadeResult<()> {
        let dir = index_path.parent().unwrap_or_else(|| Path::new("."));
        let mut doc = IniDocument::default();
        doc.push_section(
            "sarray",
            vec![
                ("version".to_string(), self.version.to_string()),
                ("num_segments".to_string(), self.segment_paths.len().to_string()),
                ("element_type".to_string(), element_type_to_tag(self.element_type).to_string()),
            ],
        );
        let sizes = ordered_entries(self.segment_row_counts.iter().map(|n| n.to_string()));
        doc.push_section("segment_sizes", sizes);
        let paths = ordered_entries(self.segment_paths.iter().map(|p| {
            pathdiff(p, dir).to_string_lossy().to_string()
        }));
        doc.push_section("segment_paths", paths);
        doc.push_section("metadata", vec![("json".to_string(), metadata_to_json(&self.metadata))]);

        std::fs::write(index_path, doc.render())
            .map_err(|e| ColonnadeError::io(format!("write index {}", index_path.display()), e))
    }

    pub fn read(index_path: &Path) -> ColonnadeResult<Self> {
        let text = std::fs::read_to_string(index_path)
            .map_err(|e| ColonnadeError::io(format!("read index {}", index_path.display()), e))?;
        let doc = IniDocument::parse(&text)?;
        let dir = index_path.parent().unwrap_or_else(|| Path::new("."));

        let version: u32 = doc
            .get("sarray", "version")
            .ok_or_else(|| ColonnadeError::format("index", "missing [sarray] version"))?
            .parse()
            .map_err(|_| ColonnadeError::format("index", "non-numeric version"))?;
        let element_type = tag_to_element_type(
            doc.get("sarray", "element_type")
                .ok_or_else(|| ColonnadeError::format("index", "missing element_type"))?,
        )?;

        let segment_row_counts: Vec<u64> = doc
            .ordered_sequence("segment_sizes")
            .into_iter()
            .map(|s| s.parse().map_err(|_| ColonnadeError::format("index", "non-numeric segment size")))
            .collect::<ColonnadeResult<_>>()?;
        let segment_paths: Vec<PathBuf> = doc
            .ordered_sequence("segment_paths")
            .into_iter()
            .map(|rel| dir.join(rel))
            .collect();

        let metadata = doc
            .get("metadata", "json")
            .map(metadata_from_json)
            .unwrap_or_default();

        Ok(Self { version, element_type, segment_row_counts, segment_paths, metadata })
    }
}

/// SFrame index file.
#[derive(Debug, Clone)]
pub struct SFrameIndex {
    pub version: u32,
    pub num_rows: u64,
    pub column_names: Vec<String>,
    pub column_index_paths: Vec<PathBuf>,
    pub metadata: HashMap<String, Value>,
}

impl SFrameIndex {
    pub fn write(&self, index_path: &Path) -> ColonnadeResult<()> {
        let dir = index_path.parent().unwrap_or_else(|| Path::new("."));
        let mut doc = IniDocument::default();
        doc.push_section(
            "sframe",
            vec![
                ("version".to_string(), self.version.to_string()),
                ("num_columns".to_string(), self.column_names.len().to_string()),
                ("num_rows".to_string(), self.num_rows.to_string()),
            ],
        );
        doc.push_section("column_names", ordered_entries(self.column_names.iter().cloned()));
        doc.push_section(
            "column_files",
            ordered_entries(self.column_index_paths.iter().map(|p| pathdiff(p, dir).to_string_lossy().to_string())),
        );
        doc.push_section("metadata", vec![("json".to_string(), metadata_to_json(&self.metadata))]);

        std::fs::write(index_path, doc.render())
            .map_err(|e| ColonnadeError::io(format!("write index {}", index_path.display()), e))
    }

    pub fn read(index_path: &Path) -> ColonnadeResult<Self> {
        let text = std::fs::read_to_string(index_path)
            .map_err(|e| ColonnadeError::io(format!("read index {}", index_path.display()), e))?;
        let doc = IniDocument::parse(&text)?;
        let dir = index_path.parent().unwrap_or_else(|| Path::new("."));

        let version: u32 = doc
            .get("sframe", "version")
            .ok_or_else(|| ColonnadeError::format("index", "missing [sframe] version"))?
            .parse()
            .map_err(|_| ColonnadeError::format("index", "non-numeric version"))?;
        let num_rows: u64 = doc
            .get("sframe", "num_rows")
            .ok_or_else(|| ColonnadeError::format("index", "missing num_rows"))?
            .parse()
            .map_err(|_| ColonnadeError::format("index", "non-numeric num_rows"))?;

        let column_names = doc.ordered_sequence("column_names");
        let column_index_paths = doc.ordered_sequence("column_files").into_iter().map(|rel| dir.join(rel)).collect();
        let metadata = doc.get("metadata", "json").map(metadata_from_json).unwrap_or_default();

        if column_names.len() != doc.ordered_sequence("column_files").len() {
            return Err(ColonnadeError::format("index", "column_names and column_files length mismatch"));
        }

        Ok(Self { version, num_rows, column_names, column_index_paths, metadata })
    }
}

/// Relative path from `base` to `target`, falling back to the absolute
/// target when they share no common ancestor (e.g. different drives).
fn pathdiff(target: &Path, base: &Path) -> PathBuf {
    target.strip_prefix(base).map(|p| p.to_path_buf()).unwrap_or_else(|_| target.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sarray_index_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("a.sidx");
        let mut metadata = HashMap::new();
        metadata.insert("created_by".to_string(), Value::String("colonnade".to_string()));

        let idx = SArrayIndex {
            version: 2,
            element_type: ValueType::Integer,
            segment_row_counts: vec![10, 20, 5],
            segment_paths: vec![dir.path().join("a.0"), dir.path().join("a.1"), dir.path().join("a.2")],
            metadata,
        };
        idx.write(&index_path).unwrap();

        let back = SArrayIndex::read(&index_path).unwrap();
        assert_eq!(back.version, 2);
        assert_eq!(back.element_type, ValueType::Integer);
        assert_eq!(back.segment_row_counts, vec![10, 20, 5]);
        assert_eq!(back.total_rows(), 35);
        assert_eq!(back.segment_paths, idx.segment_paths);
        assert_eq!(back.metadata.get("created_by"), Some(&Value::String("colonnade".to_string())));
    }

    #[test]
    fn sframe_index_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("f.frame_idx");
        let idx = SFrameIndex {
            version: 1,
            num_rows: 100,
            column_names: vec!["a".to_string(), "b".to_string()],
            column_index_paths: vec![dir.path().join("a.sidx"), dir.path().join("b.sidx")],
            metadata: HashMap::new(),
        };
        idx.write(&index_path).unwrap();

        let back = SFrameIndex::read(&index_path).unwrap();
        assert_eq!(back.num_rows, 100);
        assert_eq!(back.column_names, vec!["a", "b"]);
        assert_eq!(back.column_index_paths, idx.column_index_paths);
    }

    #[test]
    fn malformed_line_is_format_error() {
        assert!(IniDocument::parse("[sarray]\nnotakeyvalue\n").is_err());
    }
}
