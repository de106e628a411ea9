//! Value and data type mapping between request text, PostgreSQL and JSON.
//!
//! [`SqlValue`] is the single currency for bound parameters and fetched
//! columns. [`DataType`] is the closed set of attribute types a filter can
//! decode a raw query-string value into.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{Arguments, Column, Postgres, Row as SqlxRow, TypeInfo};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::{Result, TesseraError};

/// A value bound into a query or extracted from a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL value
    Null,
    /// Boolean (BOOLEAN)
    Bool(bool),
    /// Integer (INTEGER, SMALLINT)
    Int(i32),
    /// Big integer (BIGINT)
    BigInt(i64),
    /// Double-precision float (DOUBLE PRECISION, REAL)
    Double(f64),
    /// Variable-length string (VARCHAR, TEXT)
    String(String),
    /// UUID (UUID)
    Uuid(Uuid),
    /// Date (DATE)
    Date(NaiveDate),
    /// Time (TIME)
    Time(NaiveTime),
    /// Timestamp without timezone (TIMESTAMP)
    Timestamp(NaiveDateTime),
    /// Timestamp with timezone (TIMESTAMPTZ)
    TimestampTz(DateTime<Utc>),
    /// Decimal/Numeric (NUMERIC, DECIMAL)
    Decimal(Decimal),
    /// JSON/JSONB (JSON, JSONB)
    Json(JsonValue),
}

impl SqlValue {
    /// Returns the PostgreSQL type name for this value.
    pub fn pg_type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "NULL",
            SqlValue::Bool(_) => "BOOLEAN",
            SqlValue::Int(_) => "INTEGER",
            SqlValue::BigInt(_) => "BIGINT",
            SqlValue::Double(_) => "DOUBLE PRECISION",
            SqlValue::String(_) => "TEXT",
            SqlValue::Uuid(_) => "UUID",
            SqlValue::Date(_) => "DATE",
            SqlValue::Time(_) => "TIME",
            SqlValue::Timestamp(_) => "TIMESTAMP",
            SqlValue::TimestampTz(_) => "TIMESTAMPTZ",
            SqlValue::Decimal(_) => "NUMERIC",
            SqlValue::Json(_) => "JSONB",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Textual key used for resource ids and for regrouping batched rows by parent.
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Bind this value to a sqlx argument list.
    ///
    /// # Errors
    ///
    /// Returns error if binding fails (e.g., type incompatibility).
    pub fn bind_to_arguments(&self, arguments: &mut PgArguments) -> Result<()> {
        let bound = match self {
            // Untyped NULL: postgres infers the parameter type from context
            SqlValue::Null => arguments.add(Option::<i32>::None),
            SqlValue::Bool(v) => arguments.add(*v),
            SqlValue::Int(v) => arguments.add(*v),
            SqlValue::BigInt(v) => arguments.add(*v),
            SqlValue::Double(v) => arguments.add(*v),
            SqlValue::String(v) => arguments.add(v.clone()),
            SqlValue::Uuid(v) => arguments.add(*v),
            SqlValue::Date(v) => arguments.add(*v),
            SqlValue::Time(v) => arguments.add(*v),
            SqlValue::Timestamp(v) => arguments.add(*v),
            SqlValue::TimestampTz(v) => arguments.add(*v),
            SqlValue::Decimal(v) => arguments.add(*v),
            SqlValue::Json(v) => arguments.add(v.clone()),
        };
        bound.map_err(|e| {
            TesseraError::Database(format!("Failed to bind {}: {}", self.pg_type_name(), e))
        })
    }

    /// Converts the value into its JSON representation for a response document.
    pub fn to_json(&self) -> JsonValue {
        match self {
            SqlValue::Null => JsonValue::Null,
            SqlValue::Bool(v) => JsonValue::Bool(*v),
            SqlValue::Int(v) => JsonValue::Number((*v).into()),
            SqlValue::BigInt(v) => JsonValue::Number((*v).into()),
            SqlValue::Double(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            SqlValue::Decimal(v) => v
                .to_f64()
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(v.to_string())),
            SqlValue::Json(v) => v.clone(),
            other => JsonValue::String(other.to_string()),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("null"),
            SqlValue::Bool(v) => write!(f, "{}", v),
            SqlValue::Int(v) => write!(f, "{}", v),
            SqlValue::BigInt(v) => write!(f, "{}", v),
            SqlValue::Double(v) => write!(f, "{}", v),
            SqlValue::String(v) => f.write_str(v),
            SqlValue::Uuid(v) => write!(f, "{}", v.hyphenated()),
            SqlValue::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            SqlValue::Time(v) => f.write_str(&render_time(v)),
            SqlValue::Timestamp(v) => f.write_str(&render_datetime(v)),
            SqlValue::TimestampTz(v) => write!(f, "{}Z", render_datetime(&v.naive_utc())),
            SqlValue::Decimal(v) => write!(f, "{}", v),
            SqlValue::Json(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::BigInt(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Double(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::String(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::String(v)
    }
}

impl From<Uuid> for SqlValue {
    fn from(v: Uuid) -> Self {
        SqlValue::Uuid(v)
    }
}

fn render_datetime(v: &NaiveDateTime) -> String {
    if v.nanosecond() == 0 {
        v.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else {
        v.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }
}

fn render_time(v: &NaiveTime) -> String {
    if v.nanosecond() == 0 {
        v.format("%H:%M:%S").to_string()
    } else {
        v.format("%H:%M:%S%.6f").to_string()
    }
}

/// Raw filter text that does not decode into the expected data type.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot decode '{value}' as {expected}")]
pub struct DecodeError {
    pub value: String,
    pub expected: &'static str,
}

/// Attribute data type. Decides how filter values are decoded and which
/// filter operators apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    Integer,
    Float,
    String,
    Date,
    DateTime,
    Time,
    Uuid,
}

const TRUE_VALUES: &[&str] = &["t", "true", "on", "1"];
const FALSE_VALUES: &[&str] = &["f", "false", "off", "0"];
const NULL_VALUES: &[&str] = &["null", "none", "na"];

// (length, format, suffix appended before parsing)
const DATE_FORMATS: &[(usize, &str, &str)] = &[
    (4, "%Y-%m-%d", "-01-01"),
    (7, "%Y-%m-%d", "-01"),
    (10, "%Y-%m-%d", ""),
];

const DATETIME_FORMATS: &[(usize, &str)] = &[
    (16, "%Y-%m-%dT%H:%M"),
    (19, "%Y-%m-%dT%H:%M:%S"),
    (26, "%Y-%m-%dT%H:%M:%S%.f"),
];

const TIME_FORMATS: &[(usize, &str)] = &[
    (5, "%H:%M"),
    (8, "%H:%M:%S"),
    (15, "%H:%M:%S%.f"),
];

impl DataType {
    /// Infers the data type from a PostgreSQL type name.
    pub fn from_pg_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_uppercase().as_str() {
            "BOOL" | "BOOLEAN" => DataType::Bool,
            "INT2" | "INT4" | "INT8" | "SMALLINT" | "INTEGER" | "INT" | "BIGINT" | "SERIAL"
            | "BIGSERIAL" => DataType::Integer,
            "FLOAT4" | "FLOAT8" | "REAL" | "DOUBLE PRECISION" | "NUMERIC" | "DECIMAL" => {
                DataType::Float
            }
            "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" | "CITEXT" | "CHARACTER VARYING"
            | "CHARACTER" => DataType::String,
            "DATE" => DataType::Date,
            "TIMESTAMP" | "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" | "TIMESTAMP WITHOUT TIME ZONE" => {
                DataType::DateTime
            }
            "TIME" | "TIMETZ" | "TIME WITH TIME ZONE" | "TIME WITHOUT TIME ZONE" => DataType::Time,
            "UUID" => DataType::Uuid,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataType::Bool => "boolean",
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::String => "string",
            DataType::Date => "date",
            DataType::DateTime => "datetime",
            DataType::Time => "time",
            DataType::Uuid => "uuid",
        }
    }

    /// Decodes raw request text into a typed value.
    ///
    /// Every type except `String` maps `null`, `none` and `na` to SQL NULL.
    pub fn decode(&self, raw: &str) -> std::result::Result<SqlValue, DecodeError> {
        let err = || DecodeError {
            value: raw.to_string(),
            expected: self.name(),
        };

        if *self == DataType::String {
            return Ok(SqlValue::String(raw.to_string()));
        }
        let lowered = raw.to_ascii_lowercase();
        if NULL_VALUES.contains(&lowered.as_str()) {
            return Ok(SqlValue::Null);
        }

        match self {
            DataType::Bool => {
                if TRUE_VALUES.contains(&lowered.as_str()) {
                    Ok(SqlValue::Bool(true))
                } else if FALSE_VALUES.contains(&lowered.as_str()) {
                    Ok(SqlValue::Bool(false))
                } else {
                    Err(err())
                }
            }
            DataType::Integer => raw.parse::<i64>().map(SqlValue::BigInt).map_err(|_| err()),
            DataType::Float => match raw.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(SqlValue::Double(v)),
                _ => Err(err()),
            },
            DataType::Date => decode_date(raw).map(SqlValue::Date).ok_or_else(err),
            DataType::DateTime => decode_datetime(raw).ok_or_else(err),
            DataType::Time => TIME_FORMATS
                .iter()
                .find(|(len, _)| *len == raw.len())
                .and_then(|(_, fmt)| NaiveTime::parse_from_str(raw, fmt).ok())
                .map(SqlValue::Time)
                .ok_or_else(err),
            DataType::Uuid => Uuid::parse_str(raw).map(SqlValue::Uuid).map_err(|_| err()),
            DataType::String => Ok(SqlValue::String(raw.to_string())),
        }
    }

    /// Renders a value back into request text that [`DataType::decode`] accepts.
    ///
    /// Returns `None` when the value does not belong to this data type.
    pub fn render(&self, value: &SqlValue) -> Option<String> {
        let fits = matches!(
            (self, value),
            (_, SqlValue::Null)
                | (DataType::Bool, SqlValue::Bool(_))
                | (DataType::Integer, SqlValue::Int(_) | SqlValue::BigInt(_))
                | (DataType::Float, SqlValue::Double(_) | SqlValue::Decimal(_))
                | (DataType::String, SqlValue::String(_))
                | (DataType::Date, SqlValue::Date(_))
                | (DataType::DateTime, SqlValue::Timestamp(_) | SqlValue::TimestampTz(_))
                | (DataType::Time, SqlValue::Time(_))
                | (DataType::Uuid, SqlValue::Uuid(_))
        );
        if !fits || (*self == DataType::String && value.is_null()) {
            return None;
        }
        Some(value.to_string())
    }
}

fn decode_date(raw: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find(|(len, _, _)| *len == raw.len())
        .and_then(|(_, fmt, suffix)| {
            NaiveDate::parse_from_str(&format!("{}{}", raw, suffix), fmt).ok()
        })
}

fn decode_datetime(raw: &str) -> Option<SqlValue> {
    // Accept "YYYY-MM-DD HH:MM" as well as the ISO "T" separator
    let text = if raw.len() > 10 && raw.as_bytes()[10] == b' ' {
        format!("{}T{}", &raw[..10], &raw[11..])
    } else {
        raw.to_string()
    };

    if text.len() == 10 {
        return decode_date(&text)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(SqlValue::Timestamp);
    }
    if let Some(naive) = text.strip_suffix('Z') {
        return parse_naive_datetime(naive)
            .map(|dt| SqlValue::TimestampTz(Utc.from_utc_datetime(&dt)));
    }
    parse_naive_datetime(&text).map(SqlValue::Timestamp)
}

fn parse_naive_datetime(text: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find(|(len, _)| *len == text.len())
        .and_then(|(_, fmt)| NaiveDateTime::parse_from_str(text, fmt).ok())
}

fn extract<'r, T>(
    row: &'r PgRow,
    idx: usize,
    column: &str,
    map: impl FnOnce(T) -> SqlValue,
) -> Result<SqlValue>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    match row.try_get::<Option<T>, _>(idx) {
        Ok(Some(v)) => Ok(map(v)),
        Ok(None) => Ok(SqlValue::Null),
        Err(e) => Err(TesseraError::Deserialization(format!(
            "Failed to extract column '{}': {}",
            column, e
        ))),
    }
}

/// Convert a PgRow to a map of column name -> SqlValue.
///
/// # Errors
///
/// Returns error if a column has an unsupported type or fails to decode.
pub fn row_to_values(row: &PgRow) -> Result<HashMap<String, SqlValue>> {
    let mut columns = HashMap::with_capacity(row.columns().len());

    for (idx, column) in row.columns().iter().enumerate() {
        let name = column.name();
        let value = match column.type_info().name() {
            "BOOL" => extract::<bool>(row, idx, name, SqlValue::Bool)?,
            "INT2" => extract::<i16>(row, idx, name, |v| SqlValue::Int(v.into()))?,
            "INT4" => extract::<i32>(row, idx, name, SqlValue::Int)?,
            "INT8" => extract::<i64>(row, idx, name, SqlValue::BigInt)?,
            "FLOAT4" => extract::<f32>(row, idx, name, |v| SqlValue::Double(v.into()))?,
            "FLOAT8" => extract::<f64>(row, idx, name, SqlValue::Double)?,
            "NUMERIC" => extract::<Decimal>(row, idx, name, SqlValue::Decimal)?,
            "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => {
                extract::<String>(row, idx, name, SqlValue::String)?
            }
            "UUID" => extract::<Uuid>(row, idx, name, SqlValue::Uuid)?,
            "DATE" => extract::<NaiveDate>(row, idx, name, SqlValue::Date)?,
            "TIME" => extract::<NaiveTime>(row, idx, name, SqlValue::Time)?,
            "TIMESTAMP" => extract::<NaiveDateTime>(row, idx, name, SqlValue::Timestamp)?,
            "TIMESTAMPTZ" => extract::<DateTime<Utc>>(row, idx, name, SqlValue::TimestampTz)?,
            "JSON" | "JSONB" => extract::<JsonValue>(row, idx, name, SqlValue::Json)?,
            other => {
                return Err(TesseraError::Deserialization(format!(
                    "Unsupported PostgreSQL type '{}' in column '{}'",
                    other, name
                )))
            }
        };
        columns.insert(name.to_string(), value);
    }

    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_bool() {
        for raw in ["t", "TRUE", "On", "1"] {
            assert_eq!(DataType::Bool.decode(raw), Ok(SqlValue::Bool(true)));
        }
        for raw in ["f", "false", "OFF", "0"] {
            assert_eq!(DataType::Bool.decode(raw), Ok(SqlValue::Bool(false)));
        }
        for raw in ["null", "None", "NA"] {
            assert_eq!(DataType::Bool.decode(raw), Ok(SqlValue::Null));
        }
        assert!(DataType::Bool.decode("yes").is_err());
    }

    #[test]
    fn test_decode_integer() {
        assert_eq!(DataType::Integer.decode("0"), Ok(SqlValue::BigInt(0)));
        assert_eq!(DataType::Integer.decode("-17"), Ok(SqlValue::BigInt(-17)));
        assert_eq!(DataType::Integer.decode("null"), Ok(SqlValue::Null));
        let err = DataType::Integer.decode("4.5").unwrap_err();
        assert_eq!(err.to_string(), "cannot decode '4.5' as integer");
    }

    #[test]
    fn test_decode_float_rejects_non_finite() {
        assert_eq!(DataType::Float.decode("2.5"), Ok(SqlValue::Double(2.5)));
        assert!(DataType::Float.decode("inf").is_err());
        assert!(DataType::Float.decode("NaN").is_err());
    }

    #[test]
    fn test_decode_string_is_identity() {
        assert_eq!(
            DataType::String.decode("null"),
            Ok(SqlValue::String("null".to_string()))
        );
    }

    #[test]
    fn test_decode_date_formats_by_length() {
        let d = |y, m, day| SqlValue::Date(NaiveDate::from_ymd_opt(y, m, day).unwrap());
        assert_eq!(DataType::Date.decode("2024-02-29"), Ok(d(2024, 2, 29)));
        assert_eq!(DataType::Date.decode("2024-02"), Ok(d(2024, 2, 1)));
        assert_eq!(DataType::Date.decode("2024"), Ok(d(2024, 1, 1)));
        assert!(DataType::Date.decode("2023-02-29").is_err());
        assert!(DataType::Date.decode("2024-2-1").is_err());
    }

    #[test]
    fn test_decode_datetime_formats() {
        let midnight = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(
            DataType::DateTime.decode("2024-03-01"),
            Ok(SqlValue::Timestamp(midnight))
        );
        assert_eq!(
            DataType::DateTime.decode("2024-03-01 00:00"),
            Ok(SqlValue::Timestamp(midnight))
        );
        assert_eq!(
            DataType::DateTime.decode("2024-03-01T00:00:00Z"),
            Ok(SqlValue::TimestampTz(Utc.from_utc_datetime(&midnight)))
        );
        assert!(DataType::DateTime.decode("2024-03-01T00").is_err());
    }

    #[test]
    fn test_decode_time() {
        let t = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
        assert_eq!(DataType::Time.decode("00:00"), Ok(SqlValue::Time(t)));
        assert_eq!(DataType::Time.decode("00:00:00"), Ok(SqlValue::Time(t)));
        assert!(DataType::Time.decode("25:00").is_err());
        assert!(DataType::Time.decode("0:00").is_err());
    }

    #[test]
    fn test_render_decode_round_trip() {
        let date = NaiveDate::from_ymd_opt(2000, 2, 29).unwrap();
        let cases = vec![
            (DataType::Bool, SqlValue::Bool(true)),
            (DataType::Bool, SqlValue::Bool(false)),
            (DataType::Integer, SqlValue::BigInt(0)),
            (DataType::Integer, SqlValue::BigInt(-42)),
            (DataType::Integer, SqlValue::BigInt(i64::MIN)),
            (DataType::Float, SqlValue::Double(-0.5)),
            (DataType::Float, SqlValue::Double(1e-7)),
            (DataType::String, SqlValue::String("hello, world".to_string())),
            (DataType::Date, SqlValue::Date(date)),
            (
                DataType::DateTime,
                SqlValue::Timestamp(date.and_hms_opt(0, 0, 0).unwrap()),
            ),
            (
                DataType::DateTime,
                SqlValue::Timestamp(date.and_hms_micro_opt(23, 59, 59, 999_999).unwrap()),
            ),
            (
                DataType::DateTime,
                SqlValue::TimestampTz(Utc.from_utc_datetime(&date.and_hms_opt(12, 0, 0).unwrap())),
            ),
            (DataType::Time, SqlValue::Time(NaiveTime::from_hms_opt(0, 0, 0).unwrap())),
            (
                DataType::Time,
                SqlValue::Time(NaiveTime::from_hms_micro_opt(8, 30, 0, 250).unwrap()),
            ),
            (DataType::Uuid, SqlValue::Uuid(Uuid::nil())),
            (DataType::Integer, SqlValue::Null),
        ];

        for (data_type, value) in cases {
            let text = data_type.render(&value).unwrap();
            assert_eq!(data_type.decode(&text), Ok(value), "round trip of '{}'", text);
        }
    }

    #[test]
    fn test_render_rejects_foreign_values() {
        assert_eq!(DataType::Integer.render(&SqlValue::Bool(true)), None);
        assert_eq!(DataType::String.render(&SqlValue::Null), None);
    }

    #[test]
    fn test_to_json() {
        assert_eq!(SqlValue::BigInt(7).to_json(), serde_json::json!(7));
        assert_eq!(SqlValue::Null.to_json(), JsonValue::Null);
        assert_eq!(
            SqlValue::Decimal(Decimal::new(125, 2)).to_json(),
            serde_json::json!(1.25)
        );
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert_eq!(SqlValue::Date(date).to_json(), serde_json::json!("2024-01-05"));
    }

    #[test]
    fn test_from_pg_name() {
        assert_eq!(DataType::from_pg_name("int8"), Some(DataType::Integer));
        assert_eq!(DataType::from_pg_name("TIMESTAMPTZ"), Some(DataType::DateTime));
        assert_eq!(DataType::from_pg_name("tsvector"), None);
    }
}
