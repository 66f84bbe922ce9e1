//! Boundary Adapters
//!
//! Text and JSON encodings for filter values exchanged with clients. Every
//! encoding round-trips exactly; malformed input fails with
//! [`FormatError`].
//!
//! # Formats
//!
//! - **Range / DateRange**: four `;`-joined fields `start;end;min;max`, empty
//!   for an absent bound. Timestamps are ISO-8601 in UTC.
//! - **FilterStringField (text)**: `"<MATCHING>: <value>"`, or `"<MATCHING>:"`
//!   when the value is absent
//! - **FilterStringField (JSON)**: `{"value": <string|null>, "matching": "<MATCHING>"}`
//! - **Locale**: BCP-47 language tag (see [`Locale`](crate::models::Locale))

use crate::models::filter::{FilterStringField, Matching};
use crate::models::range::Range;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

const RANGE_SEPARATOR: char = ';';
const RANGE_FIELDS: usize = 4;

/// Malformed boundary input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Range text did not have exactly four fields
    #[error("Invalid range '{input}': expected {RANGE_FIELDS} fields separated by '{RANGE_SEPARATOR}', found {found}")]
    RangeFieldCount { input: String, found: usize },

    /// A range bound could not be parsed
    #[error("Invalid range bound '{bound}': {reason}")]
    InvalidBound { bound: String, reason: String },

    /// Unknown matching name
    #[error("Unknown matching '{0}'")]
    UnknownMatching(String),

    /// Filter string field text without the `<MATCHING>:` prefix
    #[error("Invalid filter string field '{0}'")]
    InvalidStringField(String),

    /// Malformed JSON representation
    #[error("Invalid JSON: {0}")]
    Json(String),

    /// Unparsable locale tag
    #[error("Invalid locale '{0}'")]
    InvalidLocale(String),
}

impl FormatError {
    pub fn invalid_bound(bound: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidBound {
            bound: bound.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_locale(tag: impl Into<String>) -> Self {
        Self::InvalidLocale(tag.into())
    }
}

/// A type that can appear as a range bound in the text encoding
pub trait RangeBound: Sized {
    fn format_bound(&self) -> String;
    fn parse_bound(text: &str) -> Result<Self, FormatError>;
}

impl RangeBound for i64 {
    fn format_bound(&self) -> String {
        self.to_string()
    }

    fn parse_bound(text: &str) -> Result<Self, FormatError> {
        text.trim()
            .parse()
            .map_err(|e| FormatError::invalid_bound(text, e))
    }
}

impl RangeBound for i32 {
    fn format_bound(&self) -> String {
        self.to_string()
    }

    fn parse_bound(text: &str) -> Result<Self, FormatError> {
        text.trim()
            .parse()
            .map_err(|e| FormatError::invalid_bound(text, e))
    }
}

impl RangeBound for DateTime<Utc> {
    fn format_bound(&self) -> String {
        self.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    fn parse_bound(text: &str) -> Result<Self, FormatError> {
        DateTime::parse_from_rfc3339(text.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| FormatError::invalid_bound(text, e))
    }
}

/// Encode a range as `start;end;min;max`
///
/// The requested (unclamped) bounds are written so that decoding restores an
/// equal range.
pub fn marshal_range<T: Ord + RangeBound>(range: &Range<T>) -> String {
    [
        range.raw_start(),
        range.raw_end(),
        range.min_value(),
        range.max_value(),
    ]
    .iter()
    .map(|bound| bound.map(RangeBound::format_bound).unwrap_or_default())
    .collect::<Vec<_>>()
    .join(&RANGE_SEPARATOR.to_string())
}

/// Decode `start;end;min;max`
pub fn unmarshal_range<T: Ord + RangeBound>(text: &str) -> Result<Range<T>, FormatError> {
    let items: Vec<&str> = text.split(RANGE_SEPARATOR).collect();
    if items.len() != RANGE_FIELDS {
        return Err(FormatError::RangeFieldCount {
            input: text.to_string(),
            found: items.len(),
        });
    }

    let parse = |item: &str| -> Result<Option<T>, FormatError> {
        if item.is_empty() {
            Ok(None)
        } else {
            T::parse_bound(item).map(Some)
        }
    };

    Ok(Range::new(
        parse(items[0])?,
        parse(items[1])?,
        parse(items[2])?,
        parse(items[3])?,
    ))
}

/// Encode as `"<MATCHING>: <value>"` (or `"<MATCHING>:"` without a value)
pub fn marshal_string_field(field: &FilterStringField) -> String {
    match field.value() {
        Some(value) => format!("{}: {}", field.matching().name(), value),
        None => format!("{}:", field.matching().name()),
    }
}

/// Decode the text form produced by [`marshal_string_field`]
pub fn unmarshal_string_field(text: &str) -> Result<FilterStringField, FormatError> {
    let (name, rest) = text
        .split_once(':')
        .ok_or_else(|| FormatError::InvalidStringField(text.to_string()))?;
    let matching = Matching::from_name(name)?;
    let value = match rest {
        "" => None,
        _ => Some(
            rest.strip_prefix(' ')
                .ok_or_else(|| FormatError::InvalidStringField(text.to_string()))?
                .to_string(),
        ),
    };
    Ok(FilterStringField::new(value, Some(matching)))
}

/// Encode as `{"value": ..., "matching": ...}`
pub fn marshal_string_field_json(field: &FilterStringField) -> String {
    serde_json::json!({
        "value": field.value(),
        "matching": field.matching().name(),
    })
    .to_string()
}

/// Decode the JSON form; a missing `matching` defaults to `EXACT`
pub fn unmarshal_string_field_json(json: &str) -> Result<FilterStringField, FormatError> {
    serde_json::from_str(json).map_err(|e| FormatError::Json(e.to_string()))
}
