//! The tagged value model (spec §3 "Value") and three-valued logic (3VL).

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{Error, Result};

/// 2D point, reused by the `Geometry` variant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// WKB-equivalent geometry payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Geometry {
    Point(Point),
    LineString(Vec<Point>),
    Polygon(Vec<Point>),
}

/// Fixed-point decimal: `mantissa * 10^-scale`. Binary (not string) storage,
/// resolving spec §9's open question on DECIMAL representation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Decimal {
    pub mantissa: i128,
    pub scale: u32,
}

impl Decimal {
    pub fn to_f64(self) -> f64 {
        self.mantissa as f64 / 10f64.powi(self.scale as i32)
    }
}

/// The engine's unified tagged value type (spec §3 C1). Integer widths and
/// signedness are carried by the declared column type (`ColumnType`), not by
/// separate `Value` variants — `Value::Integer` stores any width in an i64
/// and `ColumnType` validates bounds on coercion; this keeps evaluator match
/// arms linear in the number of *kinds*, not widths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Blob(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    /// Datetime/timestamp with nanosecond resolution, always UTC-normalized.
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
    Uuid(uuid::Uuid),
    Decimal(Decimal),
    /// Interval stored as whole microseconds.
    Interval(i64),
    Geometry(Geometry),
    /// An array value, produced e.g. by `SPLIT()`.
    Array(Vec<Value>),
}

/// Three-valued logic truth value (spec §4.9, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tribool {
    True,
    False,
    Unknown,
}

impl Tribool {
    pub fn from_bool(b: bool) -> Self {
        if b { Tribool::True } else { Tribool::False }
    }

    pub fn is_true(self) -> bool {
        matches!(self, Tribool::True)
    }

    pub fn not(self) -> Tribool {
        match self {
            Tribool::True => Tribool::False,
            Tribool::False => Tribool::True,
            Tribool::Unknown => Tribool::Unknown,
        }
    }

    pub fn and(self, other: Tribool) -> Tribool {
        use Tribool::*;
        match (self, other) {
            (False, _) | (_, False) => False,
            (True, True) => True,
            _ => Unknown,
        }
    }

    pub fn or(self, other: Tribool) -> Tribool {
        use Tribool::*;
        match (self, other) {
            (True, _) | (_, True) => True,
            (False, False) => False,
            _ => Unknown,
        }
    }

    pub fn to_value(self) -> Value {
        match self {
            Tribool::True => Value::Bool(true),
            Tribool::False => Value::Bool(false),
            Tribool::Unknown => Value::Null,
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness used by WHERE/HAVING/join-ON (spec §4.8/§4.9): NULL and
    /// type mismatches yield Unknown, never a hard error, at this layer.
    pub fn as_tribool(&self) -> Tribool {
        match self {
            Value::Null => Tribool::Unknown,
            Value::Bool(b) => Tribool::from_bool(*b),
            _ => Tribool::Unknown,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Bool(_) => "boolean",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "timestamp",
            Value::Json(_) => "json",
            Value::Uuid(_) => "uuid",
            Value::Decimal(_) => "decimal",
            Value::Interval(_) => "interval",
            Value::Geometry(_) => "geometry",
            Value::Array(_) => "array",
        }
    }

    /// Best-effort numeric coercion, used by arithmetic and CAST.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Decimal(d) => Some(d.to_f64()),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            Value::Decimal(d) => Some(d.to_f64() as i64),
            Value::Bool(b) => Some(if *b { 1 } else { 0 }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_text_like(&self) -> bool {
        matches!(self, Value::Text(_))
    }

    /// Stringify for the `+`/`||` textual-concatenation rule (spec §4.2, §4.9).
    pub fn display_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Text(s) => s.clone(),
            Value::Blob(b) => format!("0x{}", hex::encode(b)),
            Value::Date(d) => d.to_string(),
            Value::Time(t) => t.to_string(),
            Value::Timestamp(ts) => ts.to_rfc3339(),
            Value::Json(j) => j.to_string(),
            Value::Uuid(u) => u.to_string(),
            Value::Decimal(d) => format!("{}", d.to_f64()),
            Value::Interval(us) => format!("{us} us"),
            Value::Geometry(_) => "<geometry>".to_string(),
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().map(Value::display_text).collect();
                format!("[{}]", parts.join(","))
            }
        }
    }

    /// Explicit CAST(v AS type_name). Empty strings to numeric types error
    /// rather than silently coercing to zero (spec §4.9).
    pub fn cast(&self, type_name: &str) -> Result<Value> {
        let tn = type_name.to_ascii_uppercase();
        if matches!(self, Value::Null) {
            return Ok(Value::Null);
        }
        match tn.as_str() {
            "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" => {
                match self {
                    Value::Text(s) => {
                        let t = s.trim();
                        if t.is_empty() {
                            return Err(Error::ty("cannot cast empty string to INTEGER"));
                        }
                        t.parse::<i64>()
                            .map(Value::Integer)
                            .map_err(|_| Error::ty(format!("cannot cast '{s}' to INTEGER")))
                    }
                    _ => self
                        .as_i64()
                        .map(Value::Integer)
                        .ok_or_else(|| Error::ty(format!("cannot cast {} to INTEGER", self.type_name()))),
                }
            }
            "FLOAT" | "DOUBLE" | "REAL" => match self {
                Value::Text(s) => {
                    let t = s.trim();
                    if t.is_empty() {
                        return Err(Error::ty("cannot cast empty string to FLOAT"));
                    }
                    t.parse::<f64>()
                        .map(Value::Float)
                        .map_err(|_| Error::ty(format!("cannot cast '{s}' to FLOAT")))
                }
                _ => self
                    .as_f64()
                    .map(Value::Float)
                    .ok_or_else(|| Error::ty(format!("cannot cast {} to FLOAT", self.type_name()))),
            },
            "TEXT" | "VARCHAR" | "STRING" => Ok(Value::Text(self.display_text())),
            "BOOL" | "BOOLEAN" => match self {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                Value::Integer(i) => Ok(Value::Bool(*i != 0)),
                Value::Text(s) => match s.to_ascii_lowercase().as_str() {
                    "true" | "t" | "1" => Ok(Value::Bool(true)),
                    "false" | "f" | "0" => Ok(Value::Bool(false)),
                    _ => Err(Error::ty(format!("cannot cast '{s}' to BOOLEAN"))),
                },
                _ => Err(Error::ty(format!("cannot cast {} to BOOLEAN", self.type_name()))),
            },
            "TIMESTAMP" | "DATETIME" => match self {
                Value::Timestamp(_) => Ok(self.clone()),
                Value::Text(s) => crate::sql::functions::parse_timestamp(s)
                    .map(Value::Timestamp)
                    .ok_or_else(|| Error::ty(format!("cannot cast '{s}' to TIMESTAMP"))),
                _ => Err(Error::ty(format!("cannot cast {} to TIMESTAMP", self.type_name()))),
            },
            "JSON" => match self {
                Value::Json(_) => Ok(self.clone()),
                Value::Text(s) => serde_json::from_str(s)
                    .map(Value::Json)
                    .map_err(|e| Error::ty(format!("cannot cast '{s}' to JSON: {e}"))),
                other => Ok(Value::Json(serde_json::Value::String(other.display_text()))),
            },
            other => Err(Error::ty(format!("unknown cast target type '{other}'"))),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for Value {
    /// Codepoint-wise string comparison, IEEE-754 numeric comparison. Two
    /// NULLs do not compare equal here (SQL equality, used only in contexts
    /// that already handle NULL separately); GROUP BY/DISTINCT key equality
    /// uses `Value::group_key_eq`, which treats NULL as equal to NULL.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Null, Null) => None,
            (Integer(a), Integer(b)) => a.partial_cmp(b),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Integer(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Decimal(a), Decimal(b)) => a.to_f64().partial_cmp(&b.to_f64()),
            (Decimal(a), Integer(b)) => a.to_f64().partial_cmp(&(*b as f64)),
            (Integer(a), Decimal(b)) => (*a as f64).partial_cmp(&b.to_f64()),
            (Decimal(a), Float(b)) => a.to_f64().partial_cmp(b),
            (Float(a), Decimal(b)) => a.partial_cmp(&b.to_f64()),
            (Text(a), Text(b)) => a.partial_cmp(b),
            (Bool(a), Bool(b)) => a.partial_cmp(b),
            (Date(a), Date(b)) => a.partial_cmp(b),
            (Time(a), Time(b)) => a.partial_cmp(b),
            (Timestamp(a), Timestamp(b)) => a.partial_cmp(b),
            (Uuid(a), Uuid(b)) => a.partial_cmp(b),
            (Interval(a), Interval(b)) => a.partial_cmp(b),
            (Blob(a), Blob(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl Value {
    /// GROUP BY / DISTINCT key equality: NULL equals NULL (spec §4.8).
    pub fn group_key_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            _ => self.partial_cmp(other) == Some(Ordering::Equal),
        }
    }

    /// A hashable projection of the value for use as a GROUP BY / DISTINCT
    /// key component. NaN and -0.0/0.0 are normalized.
    pub fn group_key_repr(&self) -> String {
        match self {
            Value::Null => "\u{0}N".to_string(),
            Value::Float(f) => format!("F{:.17e}", if *f == 0.0 { 0.0 } else { *f }),
            Value::Decimal(d) => format!("F{:.17e}", d.to_f64()),
            other => format!("{:?}", other),
        }
    }
}

/// Three-valued equality comparison used by `=`/`!=` predicates.
pub fn tribool_eq(a: &Value, b: &Value) -> Tribool {
    if a.is_null() || b.is_null() {
        return Tribool::Unknown;
    }
    match a.partial_cmp(b) {
        Some(Ordering::Equal) => Tribool::True,
        Some(_) => Tribool::False,
        None => Tribool::Unknown,
    }
}

pub fn tribool_cmp(a: &Value, b: &Value, f: impl Fn(Ordering) -> bool) -> Tribool {
    if a.is_null() || b.is_null() {
        return Tribool::Unknown;
    }
    match a.partial_cmp(b) {
        Some(ord) => Tribool::from_bool(f(ord)),
        None => Tribool::Unknown,
    }
}
