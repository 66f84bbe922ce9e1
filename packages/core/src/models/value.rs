//! Scalar Values
//!
//! This module defines `Value`, the scalar domain shared by predicates, bind
//! parameters and persisted rows. Every entity column is expressed as a
//! `Value`, which keeps the predicate tree and the storage collaborators free of
//! per-entity generics.
//!
//! # Comparison Semantics
//!
//! - Comparisons between values of different kinds are *unknown* (`None`),
//!   mirroring SQL where a mismatched comparison never matches
//! - `Null` compares as unknown against everything, including `Null`
//! - `Bool` and `Int` interoperate (`0`/`1`) because SQLite stores booleans
//!   as integers
//! - `Timestamp` and `Text` interoperate through timestamp parsing because
//!   SQLite stores timestamps as text

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A persisted row: column name to value
pub type Row = BTreeMap<String, Value>;

/// Scalar value stored in a column or bound to a predicate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Whether this is the SQL NULL value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Boolean view; integers are read as `0 = false`
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Timestamp view; text columns are parsed with [`parse_timestamp`]
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            Value::Text(s) => parse_timestamp(s),
            _ => None,
        }
    }

    /// SQL-style comparison
    ///
    /// Returns `None` when either side is `Null` or when the kinds cannot be
    /// compared.
    pub fn sql_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Bool(_), Value::Int(_)) | (Value::Int(_), Value::Bool(_)) => {
                Some(self.as_i64()?.cmp(&other.as_i64()?))
            }
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Timestamp(_), Value::Text(_)) | (Value::Text(_), Value::Timestamp(_)) => {
                Some(self.as_timestamp()?.cmp(&other.as_timestamp()?))
            }
            _ => None,
        }
    }

    /// Total order used for ORDER BY and DISTINCT
    ///
    /// NULL sorts first, then booleans, numbers, text and timestamps.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        self.sql_cmp(other)
            .unwrap_or_else(|| self.kind_rank().cmp(&other.kind_rank()))
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Text(_) => 3,
            Value::Timestamp(_) => 4,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Text(s) => write!(f, "'{}'", s),
            Value::Timestamp(ts) => write!(f, "'{}'", format_timestamp(ts)),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Format a timestamp the way it is persisted in text columns
///
/// Fixed microsecond precision keeps lexicographic order equal to
/// chronological order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse timestamp text - handles both SQLite and RFC3339 formats
///
/// SQLite CURRENT_TIMESTAMP returns: "YYYY-MM-DD HH:MM:SS"
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
