//! Filter Value Objects
//!
//! Pure-data filters handed to the query engine. A filter never builds
//! predicates itself; the caller's query factory turns its fields into
//! predicates through a [`PredicateBuilder`](crate::services::PredicateBuilder).
//!
//! # Composition
//!
//! - [`PageableFilter`] - distinct flag, pagination and locale
//! - [`IdentifiableEntityFilter`] - adds an id set
//! - [`AuditableEntityFilter`] - adds creators, editors, audit dates, version
//!   and deletion state
//!
//! Each composite embeds the previous level (flattened in JSON) and every
//! level implements [`Filter`].
//!
//! # Examples
//!
//! ```rust
//! use criteria_core::models::{AuditableEntityFilter, Filter, Range};
//!
//! let filter = AuditableEntityFilter::new()
//!     .with_ids([1, 2, 3])
//!     .with_deleted(false)
//!     .with_version(Range::between(1, 5));
//! assert_eq!(filter.max_results(), 0);
//! ```

use crate::models::adapters::{self, FormatError};
use crate::models::locale::Locale;
use crate::models::range::{DateRange, Range};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// String comparison mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Matching {
    /// Equality on the raw value
    #[default]
    Exact,
    /// Case-insensitive prefix match
    StartsWith,
    /// Case-insensitive suffix match
    EndsWith,
    /// Case-insensitive substring match
    Like,
    /// LIKE with a caller-supplied, already escaped pattern
    Custom,
}

impl Matching {
    pub const ALL: [Matching; 5] = [
        Matching::Exact,
        Matching::StartsWith,
        Matching::EndsWith,
        Matching::Like,
        Matching::Custom,
    ];

    /// Wire name, e.g. `STARTS_WITH`
    pub fn name(self) -> &'static str {
        match self {
            Matching::Exact => "EXACT",
            Matching::StartsWith => "STARTS_WITH",
            Matching::EndsWith => "ENDS_WITH",
            Matching::Like => "LIKE",
            Matching::Custom => "CUSTOM",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, FormatError> {
        Self::ALL
            .into_iter()
            .find(|m| m.name() == name)
            .ok_or_else(|| FormatError::UnknownMatching(name.to_string()))
    }
}

impl fmt::Display for Matching {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Matching {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

/// A string value paired with how it should be matched
///
/// A blank or absent value means "no constraint".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FilterStringField {
    value: Option<String>,
    #[serde(default)]
    matching: Matching,
}

impl FilterStringField {
    /// `matching` defaults to [`Matching::Exact`]
    pub fn new(value: Option<String>, matching: Option<Matching>) -> Self {
        Self {
            value,
            matching: matching.unwrap_or_default(),
        }
    }

    pub fn exact(value: impl Into<String>) -> Self {
        Self::new(Some(value.into()), Some(Matching::Exact))
    }

    pub fn starts_with(value: impl Into<String>) -> Self {
        Self::new(Some(value.into()), Some(Matching::StartsWith))
    }

    pub fn ends_with(value: impl Into<String>) -> Self {
        Self::new(Some(value.into()), Some(Matching::EndsWith))
    }

    pub fn like(value: impl Into<String>) -> Self {
        Self::new(Some(value.into()), Some(Matching::Like))
    }

    pub fn custom(pattern: impl Into<String>) -> Self {
        Self::new(Some(pattern.into()), Some(Matching::Custom))
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn matching(&self) -> Matching {
        self.matching
    }

    /// True when the value is absent or whitespace only
    pub fn is_blank(&self) -> bool {
        self.value.as_deref().map_or(true, |v| v.trim().is_empty())
    }
}

impl fmt::Display for FilterStringField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&adapters::marshal_string_field(self))
    }
}

impl FromStr for FilterStringField {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        adapters::unmarshal_string_field(s)
    }
}

/// Common read access to every filter level
pub trait Filter {
    fn page(&self) -> &PageableFilter;

    fn distinct(&self) -> bool {
        self.page().distinct
    }

    /// Zero or negative means "from the beginning"
    fn first_result(&self) -> i64 {
        self.page().first_result
    }

    /// Zero or negative means "no limit"
    fn max_results(&self) -> i64 {
        self.page().max_results
    }

    /// The requested locale, or the system default resolved now
    fn locale(&self) -> Locale {
        self.page()
            .locale
            .clone()
            .unwrap_or_else(Locale::system_default)
    }
}

/// Distinct flag, pagination and locale
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageableFilter {
    #[serde(default)]
    pub distinct: bool,

    #[serde(default)]
    pub first_result: i64,

    #[serde(default)]
    pub max_results: i64,

    /// Unset means the system default at read time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<Locale>,
}

impl PageableFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    pub fn with_first_result(mut self, first_result: i64) -> Self {
        self.first_result = first_result;
        self
    }

    pub fn with_max_results(mut self, max_results: i64) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = Some(locale);
        self
    }
}

impl Filter for PageableFilter {
    fn page(&self) -> &PageableFilter {
        self
    }
}

/// Pageable filter restricted to a set of ids
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifiableEntityFilter {
    #[serde(flatten)]
    pub page: PageableFilter,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<BTreeSet<i64>>,
}

impl IdentifiableEntityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, page: PageableFilter) -> Self {
        self.page = page;
        self
    }

    pub fn with_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }
}

impl Filter for IdentifiableEntityFilter {
    fn page(&self) -> &PageableFilter {
        &self.page
    }
}

impl AsRef<PageableFilter> for IdentifiableEntityFilter {
    fn as_ref(&self) -> &PageableFilter {
        &self.page
    }
}

/// Filter over the audit columns shared by every auditable entity
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditableEntityFilter {
    #[serde(flatten)]
    pub identity: IdentifiableEntityFilter,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creators: Option<BTreeSet<i64>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editors: Option<BTreeSet<i64>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateRange>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited: Option<DateRange>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Range<i64>>,

    /// `None` leaves deletion state unfiltered; `Some(false)` also matches
    /// rows whose flag is NULL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
}

impl AuditableEntityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, page: PageableFilter) -> Self {
        self.identity.page = page;
        self
    }

    pub fn with_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.identity = self.identity.with_ids(ids);
        self
    }

    pub fn with_creators(mut self, creators: impl IntoIterator<Item = i64>) -> Self {
        self.creators = Some(creators.into_iter().collect());
        self
    }

    pub fn with_editors(mut self, editors: impl IntoIterator<Item = i64>) -> Self {
        self.editors = Some(editors.into_iter().collect());
        self
    }

    pub fn with_created(mut self, created: DateRange) -> Self {
        self.created = Some(created);
        self
    }

    pub fn with_edited(mut self, edited: DateRange) -> Self {
        self.edited = Some(edited);
        self
    }

    pub fn with_version(mut self, version: Range<i64>) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_deleted(mut self, deleted: bool) -> Self {
        self.deleted = Some(deleted);
        self
    }

    pub fn ids(&self) -> Option<&BTreeSet<i64>> {
        self.identity.ids.as_ref()
    }
}

impl Filter for AuditableEntityFilter {
    fn page(&self) -> &PageableFilter {
        &self.identity.page
    }
}

impl AsRef<IdentifiableEntityFilter> for AuditableEntityFilter {
    fn as_ref(&self) -> &IdentifiableEntityFilter {
        &self.identity
    }
}

impl AsRef<PageableFilter> for AuditableEntityFilter {
    fn as_ref(&self) -> &PageableFilter {
        &self.identity.page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_defaults_to_exact() {
        let field = FilterStringField::new(Some("x".into()), None);
        assert_eq!(field.matching(), Matching::Exact);
        assert_eq!(Matching::default(), Matching::Exact);
    }

    #[test]
    fn test_matching_names() {
        for matching in Matching::ALL {
            assert_eq!(Matching::from_name(matching.name()).unwrap(), matching);
        }
        assert!(Matching::from_name("starts_with").is_err());
    }

    #[test]
    fn test_blank_values() {
        assert!(FilterStringField::new(None, None).is_blank());
        assert!(FilterStringField::like("   ").is_blank());
        assert!(!FilterStringField::like(" a ").is_blank());
    }

    #[test]
    fn test_unset_locale_resolves_at_read_time() {
        let a = PageableFilter::new();
        let b = PageableFilter::new();
        assert_eq!(a, b);
        assert_eq!(a.locale(), Locale::system_default());

        let tr = Locale::new("tr", Some("TR"));
        assert_eq!(a.with_locale(tr.clone()).locale(), tr);
    }

    #[test]
    fn test_composite_reads_page() {
        let filter = AuditableEntityFilter::new()
            .with_page(PageableFilter::new().with_first_result(10).with_max_results(5))
            .with_ids([3, 1, 2]);
        assert_eq!(filter.first_result(), 10);
        assert_eq!(filter.max_results(), 5);
        assert_eq!(
            filter.ids().map(|ids| ids.iter().copied().collect::<Vec<_>>()),
            Some(vec![1, 2, 3])
        );
        let page: &PageableFilter = filter.as_ref();
        assert_eq!(page.first_result, 10);
    }

    #[test]
    fn test_auditable_filter_json() {
        let filter = AuditableEntityFilter::new()
            .with_page(PageableFilter::new().with_distinct(true))
            .with_ids([1, 2])
            .with_version(Range::between(1, 5))
            .with_deleted(false);
        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(json["distinct"], true);
        assert_eq!(json["ids"], serde_json::json!([1, 2]));
        assert_eq!(json["version"], "1;5;;");
        assert_eq!(json["deleted"], false);
        assert!(json.get("locale").is_none());

        let back: AuditableEntityFilter = serde_json::from_value(json).unwrap();
        assert_eq!(back, filter);
    }
}
