//! Conversions between [`Value`] and Rust types
//!
//! `FromValue` / `FromRow` back the row-scanning capability, `ToValue` backs
//! the driver-value capability. Failures are ordinary [`SqlError::Conversion`]
//! errors so they flow through the same boundary as any other driver failure.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use uuid::Uuid;

use crate::{Result, Row, SqlError, Value};

fn mismatch(expected: &str, value: &Value) -> SqlError {
    SqlError::Conversion(format!(
        "cannot convert {} value to {}",
        value.type_name(),
        expected
    ))
}

fn unexpected_null(expected: &str) -> SqlError {
    SqlError::Conversion(format!("unexpected NULL for non-optional {}", expected))
}

/// Types that can be decoded from a single column value
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Err(unexpected_null("i64")),
            other => other.as_i64().ok_or_else(|| mismatch("i64", other)),
        }
    }
}

macro_rules! impl_from_value_narrow_int {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: &Value) -> Result<Self> {
                    let wide = i64::from_value(value)?;
                    <$ty>::try_from(wide).map_err(|_| {
                        SqlError::Conversion(format!(
                            "value {} out of range for {}",
                            wide,
                            stringify!($ty)
                        ))
                    })
                }
            }
        )*
    };
}

impl_from_value_narrow_int!(i16, i32, u32, u64, usize);

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Err(unexpected_null("f64")),
            other => other.as_f64().ok_or_else(|| mismatch("f64", other)),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self> {
        f64::from_value(value).map(|v| v as f32)
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Err(unexpected_null("bool")),
            other => other.as_bool().ok_or_else(|| mismatch("bool", other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) | Value::Decimal(s) => Ok(s.clone()),
            Value::Uuid(u) => Ok(u.to_string()),
            Value::Null => Err(unexpected_null("String")),
            other => Err(mismatch("String", other)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            // SQLite blobs that are valid UTF-8 come back as text
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            Value::Null => Err(unexpected_null("Vec<u8>")),
            other => Err(mismatch("Vec<u8>", other)),
        }
    }
}

impl FromValue for Uuid {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Uuid(u) => Ok(*u),
            Value::String(s) => {
                Uuid::parse_str(s).map_err(|e| SqlError::Conversion(format!("invalid uuid: {}", e)))
            }
            Value::Null => Err(unexpected_null("Uuid")),
            other => Err(mismatch("Uuid", other)),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Json(j) => Ok(j.clone()),
            Value::String(s) => serde_json::from_str(s)
                .map_err(|e| SqlError::Conversion(format!("invalid json: {}", e))),
            Value::Null => Err(unexpected_null("json")),
            other => Err(mismatch("json", other)),
        }
    }
}

macro_rules! impl_from_value_temporal {
    ($ty:ty, $variant:ident, $name:literal, |$s:ident| $parse:expr) => {
        impl FromValue for $ty {
            fn from_value(value: &Value) -> Result<Self> {
                match value {
                    Value::$variant(v) => Ok(*v),
                    Value::String($s) => $parse.map_err(|e| {
                        SqlError::Conversion(format!("invalid {}: {}", $name, e))
                    }),
                    Value::Null => Err(unexpected_null($name)),
                    other => Err(mismatch($name, other)),
                }
            }
        }
    };
}

impl_from_value_temporal!(NaiveDate, Date, "date", |s| NaiveDate::parse_from_str(
    s, "%Y-%m-%d"
));
impl_from_value_temporal!(NaiveTime, Time, "time", |s| NaiveTime::parse_from_str(
    s, "%H:%M:%S%.f"
));
impl_from_value_temporal!(NaiveDateTime, DateTime, "datetime", |s| {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
});
impl_from_value_temporal!(DateTime<Utc>, DateTimeUtc, "datetime_utc", |s| {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
});

/// Types that can be decoded from a whole row
pub trait FromRow: Sized {
    fn from_values(values: &[Value]) -> Result<Self>;
}

impl FromRow for Vec<Value> {
    fn from_values(values: &[Value]) -> Result<Self> {
        Ok(values.to_vec())
    }
}

macro_rules! impl_from_row_tuple {
    ($len:literal => $($name:ident : $idx:tt),+) => {
        impl<$($name: FromValue),+> FromRow for ($($name,)+) {
            fn from_values(values: &[Value]) -> Result<Self> {
                if values.len() != $len {
                    return Err(SqlError::Conversion(format!(
                        "expected {} columns, row has {}",
                        $len,
                        values.len()
                    )));
                }
                Ok(($($name::from_value(&values[$idx])?,)+))
            }
        }
    };
}

impl_from_row_tuple!(1 => A: 0);
impl_from_row_tuple!(2 => A: 0, B: 1);
impl_from_row_tuple!(3 => A: 0, B: 1, C: 2);
impl_from_row_tuple!(4 => A: 0, B: 1, C: 2, D: 3);
impl_from_row_tuple!(5 => A: 0, B: 1, C: 2, D: 3, E: 4);
impl_from_row_tuple!(6 => A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_from_row_tuple!(7 => A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_from_row_tuple!(8 => A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);

/// Something that can hand out the values of one row for scanning
pub trait RowScanner {
    fn row_values(&self) -> &[Value];

    /// Decode the row into `T`
    fn scan<T: FromRow>(&self) -> Result<T>
    where
        Self: Sized,
    {
        T::from_values(self.row_values())
    }
}

impl RowScanner for Row {
    fn row_values(&self) -> &[Value] {
        &self.values
    }
}

impl RowScanner for [Value] {
    fn row_values(&self) -> &[Value] {
        self
    }
}

impl RowScanner for Vec<Value> {
    fn row_values(&self) -> &[Value] {
        self
    }
}

/// Types that can convert themselves into a driver value.
///
/// Implement this for domain types whose conversion can fail (validation,
/// encoding). The conversion error surfaces like any driver failure.
pub trait ToValue {
    fn to_value(&self) -> Result<Value>;
}

impl ToValue for Value {
    fn to_value(&self) -> Result<Value> {
        Ok(self.clone())
    }
}

impl ToValue for str {
    fn to_value(&self) -> Result<Value> {
        Ok(Value::String(self.to_string()))
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Result<Value> {
        match self {
            Some(v) => v.to_value(),
            None => Ok(Value::Null),
        }
    }
}

macro_rules! impl_to_value_via_from {
    ($($ty:ty),*) => {
        $(
            impl ToValue for $ty {
                fn to_value(&self) -> Result<Value> {
                    Ok(Value::from(self.clone()))
                }
            }
        )*
    };
}

impl_to_value_via_from!(
    bool,
    i16,
    i32,
    i64,
    f32,
    f64,
    String,
    Vec<u8>,
    Uuid,
    NaiveDate,
    NaiveTime,
    NaiveDateTime,
    DateTime<Utc>,
    serde_json::Value
);
