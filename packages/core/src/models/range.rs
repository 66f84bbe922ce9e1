//! Value Ranges
//!
//! `Range<T>` is an immutable interval over an ordered type with optional
//! requested bounds (`start`, `end`) and optional limits (`min_value`,
//! `max_value`). The effective bounds clamp the requested bounds into the
//! limits; inverted bounds are kept as-is rather than rejected.
//!
//! | requested | limit | effective start |
//! |-----------|-------|-----------------|
//! | `Some(s)` | `Some(m)` | `max(s, m)` |
//! | `Some(s)` | `None` | `s` |
//! | `None` | `Some(m)` | `m` |
//! | `None` | `None` | unbounded |
//!
//! # Examples
//!
//! ```rust
//! use criteria_core::models::Range;
//!
//! let range = Range::new(Some(1i64), Some(50), Some(5), Some(10));
//! assert_eq!(range.start(), Some(&5));
//! assert_eq!(range.end(), Some(&10));
//! assert!(Range::<i64>::unbounded().is_empty());
//! ```

use crate::models::adapters::{self, RangeBound};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Interval with optional bounds and clamping limits
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Range<T> {
    start: Option<T>,
    end: Option<T>,
    min_value: Option<T>,
    max_value: Option<T>,
}

/// Range of UTC timestamps
pub type DateRange = Range<DateTime<Utc>>;

impl<T: Ord> Range<T> {
    pub fn new(start: Option<T>, end: Option<T>, min_value: Option<T>, max_value: Option<T>) -> Self {
        Self {
            start,
            end,
            min_value,
            max_value,
        }
    }

    /// Range from `start` to `end` without limits
    pub fn between(start: T, end: T) -> Self {
        Self::new(Some(start), Some(end), None, None)
    }

    pub fn at_least(start: T) -> Self {
        Self::new(Some(start), None, None, None)
    }

    pub fn at_most(end: T) -> Self {
        Self::new(None, Some(end), None, None)
    }

    pub fn unbounded() -> Self {
        Self::new(None, None, None, None)
    }

    /// Effective lower bound
    pub fn start(&self) -> Option<&T> {
        match (&self.start, &self.min_value) {
            (Some(start), Some(min)) => Some(start.max(min)),
            (start, min) => start.as_ref().or(min.as_ref()),
        }
    }

    /// Effective upper bound
    pub fn end(&self) -> Option<&T> {
        match (&self.end, &self.max_value) {
            (Some(end), Some(max)) => Some(end.min(max)),
            (end, max) => end.as_ref().or(max.as_ref()),
        }
    }

    /// Requested lower bound before clamping
    pub fn raw_start(&self) -> Option<&T> {
        self.start.as_ref()
    }

    /// Requested upper bound before clamping
    pub fn raw_end(&self) -> Option<&T> {
        self.end.as_ref()
    }

    pub fn min_value(&self) -> Option<&T> {
        self.min_value.as_ref()
    }

    pub fn max_value(&self) -> Option<&T> {
        self.max_value.as_ref()
    }

    /// True when no bound at all is set
    pub fn is_empty(&self) -> bool {
        self.start().is_none() && self.end().is_none()
    }

    /// True when both effective bounds are present and equal
    pub fn is_single_value(&self) -> bool {
        matches!((self.start(), self.end()), (Some(s), Some(e)) if s == e)
    }

    /// Whether `value` lies within the effective bounds (inclusive)
    pub fn contains(&self, value: &T) -> bool {
        self.start().map_or(true, |s| value >= s) && self.end().map_or(true, |e| value <= e)
    }
}

impl<T: Ord> Default for Range<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<T: Ord + RangeBound> fmt::Display for Range<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&adapters::marshal_range(self))
    }
}

impl<T: Ord + RangeBound> FromStr for Range<T> {
    type Err = adapters::FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        adapters::unmarshal_range(s)
    }
}

impl<T: Ord + RangeBound> Serialize for Range<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&adapters::marshal_range(self))
    }
}

impl<'de, T: Ord + RangeBound> Deserialize<'de> for Range<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        adapters::unmarshal_range(&text).map_err(serde::de::Error::custom)
    }
}
