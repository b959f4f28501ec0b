//! Conversions between `Value` and PostgreSQL wire types

use bytes::BytesMut;
use sqlguard_core::{Result, Value};
use tokio_postgres::Row as PgRow;
use tokio_postgres::types::{FromSql, IsNull, ToSql, Type};

type BoxError = Box<dyn std::error::Error + Sync + Send>;

/// Parameter wrapper that writes the binary width the server expects
#[derive(Debug)]
pub(crate) enum PgValue {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    Json(serde_json::Value),
    DateTimeUtc(chrono::DateTime<chrono::Utc>),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
    DateTime(chrono::NaiveDateTime),
}

impl PgValue {
    /// Convert a `Value` into the variant matching the statement's declared
    /// parameter type, so an `i64` bound to an INT4 column is written as 4 bytes.
    pub(crate) fn from_value_for_type(value: &Value, target_type: &Type) -> Self {
        match value {
            Value::Null => PgValue::Null,
            Value::Bool(v) => PgValue::Bool(*v),

            Value::Int16(v) => Self::coerce_int(i64::from(*v), target_type),
            Value::Int32(v) => Self::coerce_int(i64::from(*v), target_type),
            Value::Int64(v) => Self::coerce_int(*v, target_type),

            Value::Float32(v) => match *target_type {
                Type::FLOAT8 => PgValue::Float64(f64::from(*v)),
                _ => PgValue::Float32(*v),
            },
            Value::Float64(v) => match *target_type {
                Type::FLOAT4 => PgValue::Float32(*v as f32),
                _ => PgValue::Float64(*v),
            },

            Value::String(v) => Self::coerce_string(v, target_type),
            other => Self::from_value(other),
        }
    }

    fn coerce_int(value: i64, target_type: &Type) -> Self {
        match *target_type {
            Type::INT2 => PgValue::Int16(value as i16),
            Type::INT4 => PgValue::Int32(value as i32),
            Type::FLOAT4 => PgValue::Float32(value as f32),
            Type::FLOAT8 => PgValue::Float64(value as f64),
            _ => PgValue::Int64(value),
        }
    }

    /// Text bound to a typed parameter is parsed into that type when it can be
    fn coerce_string(value: &str, target_type: &Type) -> Self {
        let fallback = || PgValue::String(value.to_string());
        match *target_type {
            Type::JSON | Type::JSONB => serde_json::from_str(value)
                .map(PgValue::Json)
                .unwrap_or_else(|_| fallback()),
            Type::UUID => uuid::Uuid::parse_str(value)
                .map(PgValue::Uuid)
                .unwrap_or_else(|_| fallback()),
            Type::DATE => chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map(PgValue::Date)
                .unwrap_or_else(|_| fallback()),
            Type::TIME => chrono::NaiveTime::parse_from_str(value, "%H:%M:%S%.f")
                .map(PgValue::Time)
                .unwrap_or_else(|_| fallback()),
            Type::TIMESTAMP => parse_naive_timestamp(value)
                .map(PgValue::DateTime)
                .unwrap_or_else(fallback),
            Type::TIMESTAMPTZ => chrono::DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|ts| ts.with_timezone(&chrono::Utc))
                .or_else(|| parse_naive_timestamp(value).map(|ts| ts.and_utc()))
                .map(PgValue::DateTimeUtc)
                .unwrap_or_else(fallback),
            _ => fallback(),
        }
    }

    /// Used when the target type is unknown
    pub(crate) fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => PgValue::Null,
            Value::Bool(v) => PgValue::Bool(*v),
            Value::Int16(v) => PgValue::Int16(*v),
            Value::Int32(v) => PgValue::Int32(*v),
            Value::Int64(v) => PgValue::Int64(*v),
            Value::Float32(v) => PgValue::Float32(*v),
            Value::Float64(v) => PgValue::Float64(*v),
            Value::Decimal(v) | Value::String(v) => PgValue::String(v.clone()),
            Value::Bytes(v) => PgValue::Bytes(v.clone()),
            Value::Uuid(v) => PgValue::Uuid(*v),
            Value::Json(v) => PgValue::Json(v.clone()),
            Value::DateTimeUtc(v) => PgValue::DateTimeUtc(*v),
            Value::Date(v) => PgValue::Date(*v),
            Value::Time(v) => PgValue::Time(*v),
            Value::DateTime(v) => PgValue::DateTime(*v),
            Value::Array(_) => PgValue::String(crate::copy::array_literal(value)),
        }
    }
}

fn parse_naive_timestamp(value: &str) -> Option<chrono::NaiveDateTime> {
    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

impl ToSql for PgValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match self {
            PgValue::Null => Ok(IsNull::Yes),
            PgValue::Bool(v) => v.to_sql(ty, out),
            PgValue::Int16(v) => v.to_sql(ty, out),
            PgValue::Int32(v) => v.to_sql(ty, out),
            PgValue::Int64(v) => v.to_sql(ty, out),
            PgValue::Float32(v) => v.to_sql(ty, out),
            PgValue::Float64(v) => v.to_sql(ty, out),
            PgValue::String(v) => v.to_sql(ty, out),
            PgValue::Bytes(v) => v.to_sql(ty, out),
            PgValue::Uuid(v) => v.to_sql(ty, out),
            PgValue::Json(v) => v.to_sql(ty, out),
            PgValue::DateTimeUtc(v) => v.to_sql(ty, out),
            PgValue::Date(v) => v.to_sql(ty, out),
            PgValue::Time(v) => v.to_sql(ty, out),
            PgValue::DateTime(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    postgres_types::to_sql_checked!();
}

/// Bind `params` against the statement's declared parameter types
pub(crate) fn bind_params(param_types: &[Type], params: &[Value]) -> Vec<PgValue> {
    params
        .iter()
        .enumerate()
        .map(|(i, value)| match param_types.get(i) {
            Some(target_type) => PgValue::from_value_for_type(value, target_type),
            None => PgValue::from_value(value),
        })
        .collect()
}

/// NUMERIC decoded from the binary wire format into its decimal text
#[derive(Debug)]
struct PgNumericString(String);

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

impl PgNumericString {
    /// Decode the binary NUMERIC wire format into decimal text.
    ///
    /// The payload is a header of four i16s (group count, weight of the
    /// first group, sign, display scale) followed by base-10000 groups.
    fn parse(raw: &[u8]) -> std::result::Result<String, BoxError> {
        let word = |at: usize| u16::from_be_bytes([raw[at], raw[at + 1]]);
        if raw.len() < 8 {
            return Err("NUMERIC value shorter than its header".into());
        }
        let count = word(0) as usize;
        let weight = word(2) as i16 as i64;
        let sign = word(4);
        let scale = word(6) as usize;

        match sign {
            NUMERIC_NAN => return Ok("NaN".into()),
            NUMERIC_PINF => return Ok("Infinity".into()),
            NUMERIC_NINF => return Ok("-Infinity".into()),
            _ => {}
        }
        if raw.len() < 8 + count * 2 {
            return Err(format!("NUMERIC value declares {count} groups but is truncated").into());
        }

        let mut digits = String::with_capacity(count * 4);
        for i in 0..count {
            let group = word(8 + i * 2);
            if group > 9999 {
                return Err(format!("NUMERIC group {group} is not a base-10000 digit").into());
            }
            digits.push_str(&format!("{group:04}"));
        }

        // Decimal point sits after (weight + 1) groups; pad either side
        let point = (weight + 1) * 4;
        if point < 0 {
            digits.insert_str(0, &"0".repeat(point.unsigned_abs() as usize));
        } else if point as usize > digits.len() {
            digits.push_str(&"0".repeat(point as usize - digits.len()));
        }
        let split = point.max(0) as usize;
        let (whole, fraction) = digits.split_at(split);

        let whole = whole.trim_start_matches('0');
        let mut fraction: String = fraction.chars().take(scale).collect();
        while fraction.ends_with('0') {
            fraction.pop();
        }

        let mut text = String::new();
        if sign == NUMERIC_NEG && !(whole.is_empty() && fraction.is_empty()) {
            text.push('-');
        }
        text.push_str(if whole.is_empty() { "0" } else { whole });
        if !fraction.is_empty() {
            text.push('.');
            text.push_str(&fraction);
        }
        Ok(text)
    }
}

impl<'a> FromSql<'a> for PgNumericString {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        Ok(Self(Self::parse(raw)?))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Raw UTF-8 payload of types we have no decoder for (enums, domains, ...)
#[derive(Debug)]
struct PgFallbackString(String);

impl<'a> FromSql<'a> for PgFallbackString {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        Ok(Self(String::from_utf8(raw.to_vec())?))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

fn get<'a, T: FromSql<'a>>(row: &'a PgRow, idx: usize) -> Result<Option<T>> {
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        sqlguard_core::SqlError::Conversion(format!(
            "column {} ({}): {}",
            row.columns()[idx].name(),
            row.columns()[idx].type_().name(),
            e
        ))
    })
}

fn array<'a, T, F>(row: &'a PgRow, idx: usize, wrap: F) -> Result<Value>
where
    T: FromSql<'a>,
    F: Fn(T) -> Value,
{
    Ok(get::<Vec<T>>(row, idx)?
        .map(|items| Value::Array(items.into_iter().map(wrap).collect()))
        .unwrap_or(Value::Null))
}

/// Convert PostgreSQL row value to our Value type
pub(crate) fn postgres_to_value(row: &PgRow, idx: usize) -> Result<Value> {
    let type_name = row.columns()[idx].type_().name();

    let value = match type_name {
        "bool" => get(row, idx)?.map(Value::Bool),
        "int2" => get(row, idx)?.map(Value::Int16),
        "int4" => get(row, idx)?.map(Value::Int32),
        "int8" => get(row, idx)?.map(Value::Int64),
        "float4" => get(row, idx)?.map(Value::Float32),
        "float8" => get(row, idx)?.map(Value::Float64),
        "text" | "varchar" | "bpchar" | "name" => get(row, idx)?.map(Value::String),
        "bytea" => get(row, idx)?.map(Value::Bytes),
        "uuid" => get(row, idx)?.map(Value::Uuid),
        "json" | "jsonb" => get(row, idx)?.map(Value::Json),
        "date" => get(row, idx)?.map(Value::Date),
        "time" => get(row, idx)?.map(Value::Time),
        "timestamp" => get(row, idx)?.map(Value::DateTime),
        "timestamptz" => get(row, idx)?.map(Value::DateTimeUtc),
        "numeric" => get::<PgNumericString>(row, idx)?.map(|n| Value::Decimal(n.0)),
        "_text" | "_varchar" | "_bpchar" | "_name" => {
            return array::<String, _>(row, idx, Value::String);
        }
        "_int2" => return array::<i16, _>(row, idx, Value::Int16),
        "_int4" => return array::<i32, _>(row, idx, Value::Int32),
        "_int8" => return array::<i64, _>(row, idx, Value::Int64),
        "_bool" => return array::<bool, _>(row, idx, Value::Bool),
        _ => get::<PgFallbackString>(row, idx)?.map(|s| Value::String(s.0)),
    };

    Ok(value.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn numeric(ndigits: i16, weight: i16, sign: u16, dscale: i16, groups: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&ndigits.to_be_bytes());
        raw.extend_from_slice(&weight.to_be_bytes());
        raw.extend_from_slice(&sign.to_be_bytes());
        raw.extend_from_slice(&dscale.to_be_bytes());
        for group in groups {
            raw.extend_from_slice(&group.to_be_bytes());
        }
        raw
    }

    #[test]
    fn test_numeric_with_fraction() {
        // 12345.67 = [1, 2345, 6700], weight 1, dscale 2
        let raw = numeric(3, 1, 0, 2, &[1, 2345, 6700]);
        assert_eq!(PgNumericString::parse(&raw).unwrap(), "12345.67");
    }

    #[test]
    fn test_numeric_negative_small_fraction() {
        // -0.0005 = [5], weight -1 ... group 0005 at 10^-4
        let raw = numeric(1, -1, 0x4000, 4, &[5]);
        assert_eq!(PgNumericString::parse(&raw).unwrap(), "-0.0005");
    }

    #[test]
    fn test_numeric_trailing_zero_groups_and_infinity() {
        // 100000000 = [1], weight 2
        let raw = numeric(1, 2, 0, 0, &[1]);
        assert_eq!(PgNumericString::parse(&raw).unwrap(), "100000000");
        assert_eq!(PgNumericString::parse(&numeric(0, 0, 0, 0, &[])).unwrap(), "0");
        assert_eq!(
            PgNumericString::parse(&numeric(0, 0, 0xF000, 0, &[])).unwrap(),
            "-Infinity"
        );
    }

    #[test]
    fn test_numeric_nan() {
        let raw = numeric(0, 0, 0xC000, 0, &[]);
        assert_eq!(PgNumericString::parse(&raw).unwrap(), "NaN");
    }

    #[test]
    fn test_int_is_narrowed_to_declared_width() {
        assert!(matches!(
            PgValue::from_value_for_type(&Value::Int64(7), &Type::INT4),
            PgValue::Int32(7)
        ));
        assert!(matches!(
            PgValue::from_value_for_type(&Value::Int64(7), &Type::INT2),
            PgValue::Int16(7)
        ));
    }

    #[test]
    fn test_text_bound_to_typed_parameter_is_parsed() {
        assert!(matches!(
            PgValue::from_value_for_type(&Value::String("2024-01-31".into()), &Type::DATE),
            PgValue::Date(_)
        ));
        assert!(matches!(
            PgValue::from_value_for_type(&Value::String("not a date".into()), &Type::DATE),
            PgValue::String(_)
        ));
    }

    #[test]
    fn test_bind_params_without_declared_type_uses_value_type() {
        let bound = bind_params(&[Type::INT8], &[Value::Int32(1), Value::Bool(true)]);
        assert!(matches!(bound[0], PgValue::Int64(1)));
        assert!(matches!(bound[1], PgValue::Bool(true)));
    }
}
