//! Core types for sqlguard

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A parameter or column value, independent of the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    /// NUMERIC kept as text so no precision is lost
    Decimal(String),
    String(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    /// Timestamp without time zone
    DateTime(NaiveDateTime),
    /// Timestamp with time zone, normalised to UTC
    DateTimeUtc(DateTime<Utc>),
    Json(serde_json::Value),
    /// Backend array; elements may themselves be arrays
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow the text of a `String` value
    pub fn as_str(&self) -> Option<&str> {
        if let Value::String(text) = self {
            Some(text)
        } else {
            None
        }
    }

    /// Integer view; text and decimals are parsed
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int16(n) => Some(i64::from(n)),
            Value::Int32(n) => Some(i64::from(n)),
            Value::Int64(n) => Some(n),
            Value::Decimal(ref text) | Value::String(ref text) => text.parse().ok(),
            _ => None,
        }
    }

    /// Floating point view; integers widen, text and decimals are parsed
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float32(x) => Some(f64::from(x)),
            Value::Float64(x) => Some(x),
            Value::Decimal(ref text) | Value::String(ref text) => text.parse().ok(),
            _ => self.as_i64().map(|n| n as f64),
        }
    }

    /// Boolean view; integers are true when non-zero
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            Value::Int16(_) | Value::Int32(_) | Value::Int64(_) => self.as_i64().map(|n| n != 0),
            _ => None,
        }
    }

    /// Short name of the variant, used in conversion error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::DateTime(_) => "datetime",
            Value::DateTimeUtc(_) => "datetime_utc",
            Value::Json(_) => "json",
            Value::Array(_) => "array",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => fmt::Display::fmt(v, f),
            Value::Int16(v) => fmt::Display::fmt(v, f),
            Value::Int32(v) => fmt::Display::fmt(v, f),
            Value::Int64(v) => fmt::Display::fmt(v, f),
            Value::Float32(v) => fmt::Display::fmt(v, f),
            Value::Float64(v) => fmt::Display::fmt(v, f),
            Value::Decimal(text) | Value::String(text) => f.write_str(text),
            Value::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::Uuid(v) => fmt::Display::fmt(v, f),
            Value::Date(v) => fmt::Display::fmt(v, f),
            Value::Time(v) => fmt::Display::fmt(v, f),
            Value::DateTime(v) => fmt::Display::fmt(v, f),
            Value::DateTimeUtc(v) => fmt::Display::fmt(v, f),
            Value::Json(v) => fmt::Display::fmt(v, f),
            Value::Array(items) => write!(f, "[{} items]", items.len()),
        }
    }
}

macro_rules! impl_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_value_from! {
    bool => Bool,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    String => String,
    Vec<u8> => Bytes,
    Uuid => Uuid,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => DateTime,
    DateTime<Utc> => DateTimeUtc,
    serde_json::Value => Json,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Build a `Vec<Value>` from heterogeneous expressions.
///
/// ```
/// use sqlguard_core::{values, Value};
///
/// let row = values![1_i64, "a", None::<i32>];
/// assert_eq!(row, vec![Value::Int64(1), Value::String("a".into()), Value::Null]);
/// ```
#[macro_export]
macro_rules! values {
    ($($value:expr),* $(,)?) => {
        vec![$($crate::Value::from($value)),*]
    };
}

/// One fetched row; column names are shared by every row of a result
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<Value>,
    columns: Arc<[String]>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// First column called `name`
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let index = self.columns.iter().position(|column| column == name)?;
        self.values.get(index)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Column name to value; later duplicates win
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.columns
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

/// Name and declared type of a result column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ColumnMeta {
    pub name: String,
    /// Type name as the backend reports it, e.g. `int4` or `INTEGER`
    pub data_type: String,
    pub ordinal: usize,
}

/// Rows returned by a query, fully fetched from the driver
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Row>,
    /// Wall time from prepare to the last fetched row
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            execution_time_ms: 0,
        }
    }

    pub fn has_rows(&self) -> bool {
        !self.rows.is_empty()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

impl IntoIterator for QueryResult {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// Outcome of a statement that returns no rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatementResult {
    pub affected_rows: u64,
}
