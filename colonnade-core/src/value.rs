//! The flexible value: a tagged dynamic cell value used in cells and keys.
//!
//! Hashing is pattern-matching over the tag plus payload, fed through
//! BLAKE3 rather than a hand-rolled mix function.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Element type tag for a column or a single value. `Undefined` is a valid
/// per-cell value for any declared type, never a type on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Integer,
    Float,
    String,
    Vector,
    List,
    Dict,
    Image,
    DateTime,
    Undefined,
}

impl ValueType {
    pub fn tag_byte(self) -> u8 {
        match self {
            ValueType::Integer => 0,
            ValueType::Float => 1,
            ValueType::String => 2,
            ValueType::Vector => 3,
            ValueType::List => 4,
            ValueType::Dict => 5,
            ValueType::Image => 6,
            ValueType::DateTime => 7,
            ValueType::Undefined => 8,
        }
    }
}

/// An embedded image blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub format: ImageFormat,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    Raw,
    Png,
    Jpeg,
}

impl PartialEq for ImageData {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.channels == other.channels
            && self.format == other.format
            && self.data == other.data
    }
}

/// Date-time as (seconds-since-epoch, half-hour-offset), matching the
/// original `flex_date_time` representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateTimeValue {
    pub seconds_since_epoch: i64,
    /// Offset from UTC in units of 30 minutes, e.g. `+2` is UTC+01:00.
    pub half_hour_offset: i32,
}

impl DateTimeValue {
    pub fn new(seconds_since_epoch: i64, half_hour_offset: i32) -> Self {
        Self { seconds_since_epoch, half_hour_offset }
    }

    pub fn to_chrono(&self) -> DateTime<FixedOffset> {
        let offset_secs = self.half_hour_offset * 1800;
        let tz = FixedOffset::east_opt(offset_secs).unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
        tz.timestamp_opt(self.seconds_since_epoch, 0)
            .single()
            .unwrap_or_else(|| tz.timestamp_opt(0, 0).unwrap())
    }

    pub fn from_chrono(dt: DateTime<Utc>) -> Self {
        Self { seconds_since_epoch: dt.timestamp(), half_hour_offset: 0 }
    }
}

/// One cell value. Every variant is Clone/Serialize so columns can spill
/// to disk and rows can cross thread boundaries without extra wrapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(String),
    Vector(Vec<f64>),
    List(Vec<Value>),
    /// Stored as an ordered vector of pairs; equality and hashing over this
    /// variant are order-independent (see `eq` and `hash64`).
    Dict(Vec<(Value, Value)>),
    Image(ImageData),
    DateTime(DateTimeValue),
    Undefined,
}

impl Value {
    pub fn dtype(&self) -> ValueType {
        match self {
            Value::Integer(_) => ValueType::Integer,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::Vector(_) => ValueType::Vector,
            Value::List(_) => ValueType::List,
            Value::Dict(_) => ValueType::Dict,
            Value::Image(_) => ValueType::Image,
            Value::DateTime(_) => ValueType::DateTime,
            Value::Undefined => ValueType::Undefined,
        }
    }

    /// NaN floats and `Undefined` both report "is-na".
    pub fn is_na(&self) -> bool {
        match self {
            Value::Undefined => true,
            Value::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Value::Integer(i) => *i == 0,
            Value::Float(f) => *f == 0.0,
            Value::String(s) => s.is_empty(),
            Value::Vector(v) => v.iter().all(|x| *x == 0.0),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// 64-bit hash. Stable per process version:
    /// `hash64(Undefined)` is a fixed constant across calls and processes.
    pub fn hash64(&self) -> u64 {
        let digest = self.digest();
        u64::from_le_bytes(digest[0..8].try_into().unwrap())
    }

    /// 128-bit hash. Need not relate to `hash64` bit-for-bit, but both are
    /// deterministic.
    pub fn hash128(&self) -> u128 {
        let digest = self.digest();
        u128::from_le_bytes(digest[0..16].try_into().unwrap())
    }

    /// BLAKE3 digest over a tag-prefixed canonical encoding. Cross-type
    /// values never collide on the tag byte alone (integer 3 hashes
    /// differently from string "3").
    fn digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[self.dtype().tag_byte()]);
        match self {
            Value::Integer(i) => hasher.update(&i.to_le_bytes()),
            Value::Float(f) => hasher.update(&f.to_bits().to_le_bytes()),
            Value::String(s) => hasher.update(s.as_bytes()),
            Value::Vector(v) => {
                for x in v {
                    hasher.update(&x.to_bits().to_le_bytes());
                }
                &mut hasher
            }
            Value::List(items) => {
                for item in items {
                    hasher.update(&item.hash64().to_le_bytes());
                }
                &mut hasher
            }
            Value::Dict(entries) => {
                // XOR-fold: order-independent, but this means {a:1,b:2}
                // collides with {a:2,b:1}. Documented, not "fixed" (DESIGN.md).
                let mut fold: u64 = 0;
                for (k, v) in entries {
                    fold ^= k.hash64().rotate_left(1) ^ v.hash64();
                }
                hasher.update(&fold.to_le_bytes())
            }
            Value::Image(img) => {
                hasher.update(&img.width.to_le_bytes());
                hasher.update(&img.height.to_le_bytes());
                hasher.update(&[img.channels]);
                hasher.update(&img.data)
            }
            Value::DateTime(dt) => {
                hasher.update(&dt.seconds_since_epoch.to_le_bytes());
                hasher.update(&dt.half_hour_offset.to_le_bytes())
            }
            Value::Undefined => &mut hasher,
        };
        *hasher.finalize().as_bytes()
    }

    /// Ordering used by the sort and groupby key-comparison paths.
    /// `Undefined` always sorts last regardless of ascending/descending
    /// (an Open Question resolved in DESIGN.md).
    pub fn compare_for_sort(&self, other: &Self) -> Ordering {
        match (self.is_na(), other.is_na()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => {}
        }
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.seconds_since_epoch.cmp(&b.seconds_since_epoch),
            (Value::Vector(a), Value::Vector(b)) => a
                .iter()
                .zip(b.iter())
                .find_map(|(x, y)| x.partial_cmp(y).filter(|o| *o != Ordering::Equal))
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            _ => Ordering::Equal,
        }
    }

    // --- dict/list accessors ---

    pub fn dict_keys(&self) -> Option<Vec<Value>> {
        match self {
            Value::Dict(entries) => Some(entries.iter().map(|(k, _)| k.clone()).collect()),
            _ => None,
        }
    }

    pub fn dict_values(&self) -> Option<Vec<Value>> {
        match self {
            Value::Dict(entries) => Some(entries.iter().map(|(_, v)| v.clone()).collect()),
            _ => None,
        }
    }

    pub fn item_length(&self) -> Option<usize> {
        match self {
            Value::Dict(entries) => Some(entries.len()),
            Value::List(items) => Some(items.len()),
            Value::Vector(v) => Some(v.len()),
            Value::String(s) => Some(s.chars().count()),
            _ => None,
        }
    }

    /// Keep only dict entries whose key is in `keys`.
    pub fn trim_by_keys(&self, keys: &[Value], exclude: bool) -> Option<Value> {
        match self {
            Value::Dict(entries) => {
                let kept: Vec<_> = entries
                    .iter()
                    .filter(|(k, _)| keys.contains(k) != exclude)
                    .cloned()
                    .collect();
                Some(Value::Dict(kept))
            }
            _ => None,
        }
    }

    /// JSON emission.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Integer(i) => J::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f).map(J::Number).unwrap_or(J::Null),
            Value::String(s) => J::String(s.clone()),
            Value::Vector(v) => J::Array(v.iter().map(|x| serde_json::json!(x)).collect()),
            Value::List(items) => J::Array(items.iter().map(|v| v.to_json()).collect()),
            Value::Dict(entries) => {
                let mut map = serde_json::Map::new();
                for (k, v) in entries {
                    map.insert(k.to_csv_cell(&CsvFormat::default()), v.to_json());
                }
                J::Object(map)
            }
            Value::Image(_) => J::String("<image>".to_string()),
            Value::DateTime(dt) => J::String(dt.to_chrono().to_rfc3339()),
            Value::Undefined => J::Null,
        }
    }

    /// CSV cell emission with a configurable escape/quote/double-quote
    /// policy.
    pub fn to_csv_cell(&self, format: &CsvFormat) -> String {
        let raw = match self {
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::Vector(v) => format!("[{}]", v.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(",")),
            Value::List(items) => format!(
                "[{}]",
                items.iter().map(|v| v.to_csv_cell(format)).collect::<Vec<_>>().join(",")
            ),
            Value::Dict(entries) => format!(
                "{{{}}}",
                entries
                    .iter()
                    .map(|(k, v)| format!("{}:{}", k.to_csv_cell(format), v.to_csv_cell(format)))
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            Value::Image(_) => String::new(),
            Value::DateTime(dt) => dt.to_chrono().to_rfc3339(),
            Value::Undefined => String::new(),
        };
        format.escape(&raw)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Vector(a), Value::Vector(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => dict_eq(a, b),
            (Value::Image(a), Value::Image(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Undefined, Value::Undefined) => true,
            _ => false,
        }
    }
}
impl Eq for Value {}

/// Order-independent dict equality.
fn dict_eq(a: &[(Value, Value)], b: &[(Value, Value)]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let to_map = |entries: &[(Value, Value)]| -> HashMap<u64, Vec<&(Value, Value)>> {
        let mut m: HashMap<u64, Vec<&(Value, Value)>> = HashMap::new();
        for entry in entries {
            m.entry(entry.0.hash64()).or_default().push(entry);
        }
        m
    };
    let ma = to_map(a);
    let mb = to_map(b);
    if ma.len() != mb.len() {
        return false;
    }
    for (hash, entries_a) in &ma {
        match mb.get(hash) {
            Some(entries_b) if entries_a.len() == entries_b.len() => {
                for (ka, va) in entries_a {
                    if !entries_b.iter().any(|(kb, vb)| ka == kb && va == vb) {
                        return false;
                    }
                }
            }
            _ => return false,
        }
    }
    true
}

/// CSV escape/quote policy.
#[derive(Debug, Clone)]
pub struct CsvFormat {
    pub quote_char: char,
    pub escape_char: char,
    pub double_quote: bool,
    pub always_quote: bool,
}

impl Default for CsvFormat {
    fn default() -> Self {
        Self { quote_char: '"', escape_char: '\\', double_quote: true, always_quote: false }
    }
}

impl CsvFormat {
    pub fn escape(&self, raw: &str) -> String {
        let needs_quote = self.always_quote
            || raw.contains(',')
            || raw.contains('\n')
            || raw.contains(self.quote_char);
        if !needs_quote {
            return raw.to_string();
        }
        let mut out = String::with_capacity(raw.len() + 2);
        out.push(self.quote_char);
        for ch in raw.chars() {
            if ch == self.quote_char {
                if self.double_quote {
                    out.push(self.quote_char);
                } else {
                    out.push(self.escape_char);
                }
            }
            out.push(ch);
        }
        out.push(self.quote_char);
        out
    }
}
