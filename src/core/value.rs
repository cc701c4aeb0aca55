/// Canonical Values and Type Normalization
///
/// Drivers report values in whatever representation their engine uses: SQLite
/// hands back dates as text and booleans as integers, MySQL sends numbers as
/// byte strings. This module folds those into one closed set of canonical
/// values, driven by the column type the driver reported.
use crate::core::db::table::Column;
use crate::core::{DbxError, Result};
use crate::driver::RawValue;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::Serialize;
use std::fmt;

/// Canonical column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Boolean,
    DateTime,
    Binary,
    /// No declared type (e.g. an expression column); values keep their
    /// natural representation.
    Dynamic,
}

impl ColumnType {
    /// Maps an engine type name to a canonical type.
    ///
    /// Follows SQLite's affinity rules, checked in order, with boolean and
    /// date/time names recognized first. Time-of-day names (`TIME`, `TIMETZ`)
    /// carry no date and decode as text.
    pub fn from_decl_type(decl: Option<&str>) -> Self {
        let decl = match decl {
            Some(d) if !d.trim().is_empty() => d.to_uppercase(),
            _ => return ColumnType::Dynamic,
        };

        if decl.starts_with("BOOL") || decl == "BIT" {
            ColumnType::Boolean
        } else if decl.starts_with("DATE") || decl.starts_with("TIMESTAMP") {
            ColumnType::DateTime
        } else if decl.starts_with("TIME") {
            ColumnType::Text
        } else if decl.contains("INT") {
            ColumnType::Integer
        } else if decl.contains("CHAR") || decl.contains("CLOB") || decl.contains("TEXT") {
            ColumnType::Text
        } else if decl.contains("BLOB") || decl.contains("BINARY") || decl == "BYTEA" {
            ColumnType::Binary
        } else if decl.contains("REAL")
            || decl.contains("FLOA")
            || decl.contains("DOUB")
            || decl.starts_with("DECIMAL")
            || decl.starts_with("NUMERIC")
        {
            ColumnType::Float
        } else {
            ColumnType::Dynamic
        }
    }
}

/// A normalized value. Also used for bound statement parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    DateTime(DateTime<Utc>),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::DateTime(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::DateTime(t) => f.write_str(&format_datetime(t)),
            Value::Bytes(b) => write!(f, "<BLOB: {} bytes>", b.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Text form used when a timestamp is written to an engine without a native
/// timestamp type.
pub fn format_datetime(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Converts a raw driver value to the canonical value for `column`.
///
/// Nulls pass through for every column type. Any other value that cannot be
/// represented exactly in the column's type is a `Conversion` error naming
/// the column.
pub fn convert(raw: RawValue, column: &Column) -> Result<Value> {
    if let RawValue::Null = raw {
        return Ok(Value::Null);
    }

    let reject = |raw: &RawValue| {
        DbxError::conversion(
            &column.name,
            format!("cannot convert {} to {:?}", raw.kind(), column.kind),
        )
    };

    match column.kind {
        ColumnType::Integer => to_integer(raw, column, reject),
        ColumnType::Float => to_float(raw, column, reject),
        ColumnType::Text => to_text(raw, column, reject),
        ColumnType::Boolean => to_boolean(raw, column, reject),
        ColumnType::DateTime => to_datetime(raw, column, reject),
        ColumnType::Binary => match raw {
            RawValue::Blob(b) => Ok(Value::Bytes(b)),
            RawValue::Text(s) => Ok(Value::Bytes(s.into_bytes())),
            other => Err(reject(&other)),
        },
        ColumnType::Dynamic => Ok(natural(raw)),
    }
}

fn natural(raw: RawValue) -> Value {
    match raw {
        RawValue::Null => Value::Null,
        RawValue::Integer(i) => Value::Int(i),
        RawValue::Real(f) => Value::Float(f),
        RawValue::Text(s) => Value::Text(s),
        RawValue::Blob(b) => Value::Bytes(b),
        RawValue::Bool(b) => Value::Bool(b),
        RawValue::Timestamp(t) => Value::DateTime(t),
    }
}

fn utf8(bytes: Vec<u8>, column: &Column) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|e| DbxError::conversion(&column.name, format!("invalid UTF-8: {}", e)))
}

fn to_integer(raw: RawValue, column: &Column, reject: impl Fn(&RawValue) -> DbxError) -> Result<Value> {
    let parse = |s: &str| {
        s.trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| DbxError::conversion(&column.name, format!("'{}': {}", s, e)))
    };

    match raw {
        RawValue::Integer(i) => Ok(Value::Int(i)),
        RawValue::Bool(b) => Ok(Value::Int(i64::from(b))),
        RawValue::Text(s) => parse(&s),
        RawValue::Blob(b) => parse(&utf8(b, column)?),
        // i64::MAX as f64 rounds up to 2^63, hence the exclusive upper bound
        RawValue::Real(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
            Ok(Value::Int(f as i64))
        }
        RawValue::Real(f) => Err(DbxError::conversion(
            &column.name,
            format!("{} is not an integer", f),
        )),
        other => Err(reject(&other)),
    }
}

fn to_float(raw: RawValue, column: &Column, reject: impl Fn(&RawValue) -> DbxError) -> Result<Value> {
    let parse = |s: &str| {
        s.trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| DbxError::conversion(&column.name, format!("'{}': {}", s, e)))
    };

    match raw {
        RawValue::Real(f) => Ok(Value::Float(f)),
        RawValue::Integer(i) => {
            let f = i as f64;
            if f as i128 == i as i128 {
                Ok(Value::Float(f))
            } else {
                Err(DbxError::conversion(
                    &column.name,
                    format!("{} cannot be represented exactly as a float", i),
                ))
            }
        }
        RawValue::Text(s) => parse(&s),
        RawValue::Blob(b) => parse(&utf8(b, column)?),
        other => Err(reject(&other)),
    }
}

fn to_text(raw: RawValue, column: &Column, reject: impl Fn(&RawValue) -> DbxError) -> Result<Value> {
    match raw {
        RawValue::Text(s) => Ok(Value::Text(s)),
        RawValue::Blob(b) => utf8(b, column).map(Value::Text),
        RawValue::Integer(i) => Ok(Value::Text(i.to_string())),
        RawValue::Real(f) => Ok(Value::Text(f.to_string())),
        RawValue::Timestamp(t) => Ok(Value::Text(format_datetime(&t))),
        other => Err(reject(&other)),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "t" | "true" | "y" | "yes" => Some(true),
        "0" | "f" | "false" | "n" | "no" => Some(false),
        _ => None,
    }
}

fn to_boolean(raw: RawValue, column: &Column, reject: impl Fn(&RawValue) -> DbxError) -> Result<Value> {
    let parse = |s: &str| {
        parse_bool(s)
            .map(Value::Bool)
            .ok_or_else(|| DbxError::conversion(&column.name, format!("'{}' is not a boolean", s)))
    };

    match raw {
        RawValue::Bool(b) => Ok(Value::Bool(b)),
        RawValue::Integer(0) => Ok(Value::Bool(false)),
        RawValue::Integer(1) => Ok(Value::Bool(true)),
        RawValue::Integer(i) => Err(DbxError::conversion(
            &column.name,
            format!("{} is not a boolean", i),
        )),
        RawValue::Text(s) => parse(&s),
        RawValue::Blob(b) => parse(&utf8(b, column)?),
        other => Err(reject(&other)),
    }
}

/// Parses the textual timestamp layouts engines commonly emit. Values without
/// an offset are taken as UTC.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    for layout in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(Utc.from_utc_datetime(&t));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| Utc.from_utc_datetime(&t))
}

fn to_datetime(raw: RawValue, column: &Column, reject: impl Fn(&RawValue) -> DbxError) -> Result<Value> {
    let parse = |s: &str| {
        parse_datetime(s)
            .map(Value::DateTime)
            .ok_or_else(|| DbxError::conversion(&column.name, format!("'{}' is not a date/time", s)))
    };

    match raw {
        RawValue::Timestamp(t) => Ok(Value::DateTime(t)),
        RawValue::Text(s) => parse(&s),
        RawValue::Blob(b) => parse(&utf8(b, column)?),
        RawValue::Integer(secs) => Utc
            .timestamp_opt(secs, 0)
            .single()
            .map(Value::DateTime)
            .ok_or_else(|| {
                DbxError::conversion(&column.name, format!("{} is out of the timestamp range", secs))
            }),
        other => Err(reject(&other)),
    }
}
