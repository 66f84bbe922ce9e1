//! Predicate Builder
//!
//! Stateful helper that turns filter primitives into [`Predicate`] nodes.
//! Every operation is a no-op when its value input is absent or blank, so a
//! partially filled filter never degenerates into "match nothing".
//!
//! # Architecture
//!
//! The builder is an explicit tree: a flat list of predicates that are
//! AND-combined at the top level, plus nested OR-groups opened with
//! [`PredicateBuilder::or`]. Resolving the builder folds every non-empty
//! group into a single `OR` node appended to the parent list.
//!
//! String matching is case-insensitive: patterns are folded with the
//! builder's [`Locale`] (lower case only) and compared against
//! `lower(column)`.
//!
//! # Examples
//!
//! ```rust
//! use criteria_core::db::Field;
//! use criteria_core::models::Locale;
//! use criteria_core::services::PredicateBuilder;
//!
//! const NAME: Field<String> = Field::new("name");
//! const AGE: Field<i64> = Field::new("age");
//!
//! let mut builder = PredicateBuilder::new(Locale::english());
//! builder.greater_than_or_equal_to(&AGE, 18);
//! builder.or().equal(&AGE, 42).like_text(&NAME, "Hello World")?;
//!
//! assert_eq!(
//!     builder.to_predicate().to_string(),
//!     "(age >= 18 AND (age = 42 OR lower(name) LIKE '%hello%world%' ESCAPE '\\'))"
//! );
//! # Ok::<(), criteria_core::services::EngineError>(())
//! ```

use crate::db::{CompareOp, Expr, Field, Operand, Predicate};
use crate::models::{FilterStringField, Locale, Matching, Range, Value};
use crate::services::config::{validate_escape_char, EngineConfig, DEFAULT_ESCAPE_CHAR, DEFAULT_MAX_IN_ELEMENTS};
use crate::services::error::EngineError;

/// Incremental predicate accumulator with nested OR-groups
#[derive(Debug, Clone)]
pub struct PredicateBuilder {
    locale: Locale,
    max_in_elements: usize,
    escape_char: char,
    predicates: Vec<Predicate>,
    ors: Vec<PredicateBuilder>,
}

impl PredicateBuilder {
    /// Builder with the default IN-list limit and escape character
    pub fn new(locale: Locale) -> Self {
        Self {
            locale,
            max_in_elements: DEFAULT_MAX_IN_ELEMENTS,
            escape_char: DEFAULT_ESCAPE_CHAR,
            predicates: Vec::new(),
            ors: Vec::new(),
        }
    }

    /// Builder splitting IN lists longer than `max_in_elements`
    pub fn with_max_in_elements(locale: Locale, max_in_elements: usize) -> Result<Self, EngineError> {
        Self::with_config(
            locale,
            &EngineConfig {
                max_in_elements,
                ..EngineConfig::default()
            },
        )
    }

    pub fn with_config(locale: Locale, config: &EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self::from_validated(locale, config))
    }

    pub(crate) fn from_validated(locale: Locale, config: &EngineConfig) -> Self {
        Self {
            max_in_elements: config.max_in_elements,
            escape_char: config.escape_char,
            ..Self::new(locale)
        }
    }

    /// Start from already built predicates
    pub fn with_predicates(mut self, predicates: Vec<Predicate>) -> Self {
        self.predicates = predicates;
        self
    }

    pub fn locale(&self) -> &Locale {
        &self.locale
    }

    pub fn max_in_elements(&self) -> usize {
        self.max_in_elements
    }

    pub fn escape_char(&self) -> char {
        self.escape_char
    }

    //
    // COMPARISONS
    //

    pub fn equal<T: Into<Value>>(&mut self, field: &Field<T>, value: impl Into<Option<T>>) -> &mut Self {
        self.push_compare(field, CompareOp::Eq, value.into())
    }

    pub fn not_equal<T: Into<Value>>(&mut self, field: &Field<T>, value: impl Into<Option<T>>) -> &mut Self {
        self.push_compare(field, CompareOp::Ne, value.into())
    }

    fn push_compare<T: Into<Value>>(&mut self, field: &Field<T>, op: CompareOp, value: Option<T>) -> &mut Self {
        if let Some(value) = value {
            let value: Value = value.into();
            self.predicates.push(Predicate::compare(field.expr(), op, value));
        }
        self
    }

    /// `field = :name`, bound later through the query parameters
    pub fn equal_parameter<T>(&mut self, field: &Field<T>, name: &str) -> &mut Self {
        self.predicates.push(Predicate::eq(field.expr(), Operand::param(name)));
        self
    }

    pub fn equal_fields<T>(&mut self, left: &Field<T>, right: &Field<T>) -> &mut Self {
        self.predicates.push(Predicate::compare_fields(
            left.expr(),
            CompareOp::Eq,
            right.expr(),
        ));
        self
    }

    pub fn not_equal_fields<T>(&mut self, left: &Field<T>, right: &Field<T>) -> &mut Self {
        self.predicates.push(Predicate::compare_fields(
            left.expr(),
            CompareOp::Ne,
            right.expr(),
        ));
        self
    }

    pub fn is_null<T>(&mut self, field: &Field<T>) -> &mut Self {
        self.predicates.push(Predicate::is_null(field.expr()));
        self
    }

    pub fn is_not_null<T>(&mut self, field: &Field<T>) -> &mut Self {
        self.predicates.push(Predicate::is_not_null(field.expr()));
        self
    }

    /// Boolean equality where a stored NULL counts as `false`
    pub fn equal_bool(&mut self, field: &Field<bool>, value: impl Into<Option<bool>>) -> &mut Self {
        if let Some(value) = value.into() {
            self.predicates.push(bool_predicate(field, value));
        }
        self
    }

    /// Negation of [`equal_bool`](Self::equal_bool)
    pub fn not_equal_bool(&mut self, field: &Field<bool>, value: impl Into<Option<bool>>) -> &mut Self {
        if let Some(value) = value.into() {
            self.predicates.push(Predicate::not(bool_predicate(field, value)));
        }
        self
    }

    pub fn greater_than<T: Into<Value>>(&mut self, field: &Field<T>, value: impl Into<Option<T>>) -> &mut Self {
        self.push_compare(field, CompareOp::Gt, value.into())
    }

    pub fn greater_than_or_equal_to<T: Into<Value>>(
        &mut self,
        field: &Field<T>,
        value: impl Into<Option<T>>,
    ) -> &mut Self {
        self.push_compare(field, CompareOp::Ge, value.into())
    }

    pub fn less_than<T: Into<Value>>(&mut self, field: &Field<T>, value: impl Into<Option<T>>) -> &mut Self {
        self.push_compare(field, CompareOp::Lt, value.into())
    }

    pub fn less_than_or_equal_to<T: Into<Value>>(
        &mut self,
        field: &Field<T>,
        value: impl Into<Option<T>>,
    ) -> &mut Self {
        self.push_compare(field, CompareOp::Le, value.into())
    }

    /// Inclusive range on the effective (clamped) bounds
    ///
    /// A range whose effective start equals its effective end becomes an
    /// equality. Empty ranges add nothing.
    pub fn between<'a, T>(&mut self, field: &Field<T>, range: impl Into<Option<&'a Range<T>>>) -> &mut Self
    where
        T: Ord + Clone + Into<Value> + 'a,
    {
        let Some(range) = range.into() else {
            return self;
        };
        if range.is_empty() {
            return self;
        }
        match (range.start(), range.end()) {
            (Some(start), Some(end)) if start == end => {
                self.equal(field, start.clone());
            }
            (start, end) => {
                self.greater_than_or_equal_to(field, start.cloned());
                self.less_than_or_equal_to(field, end.cloned());
            }
        }
        self
    }

    //
    // IN LISTS
    //

    /// `field IN (...)`, split into OR-ed lists above the element limit
    pub fn in_values<T: Into<Value>>(&mut self, field: &Field<T>, values: impl IntoIterator<Item = T>) -> &mut Self {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.push_in(field.expr(), values);
        self
    }

    /// `NOT (field IN (...))`, split into AND-ed lists above the element limit
    pub fn not_in<T: Into<Value>>(&mut self, field: &Field<T>, values: impl IntoIterator<Item = T>) -> &mut Self {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        if let Some(predicate) = self.not_in_predicate(field.expr(), values) {
            self.predicates.push(predicate);
        }
        self
    }

    fn push_in(&mut self, expr: Expr, mut values: Vec<Value>) {
        match values.len() {
            0 => {}
            1 => self.predicates.push(Predicate::eq(expr, values.remove(0))),
            n if n <= self.max_in_elements => self.predicates.push(Predicate::in_list(expr, values)),
            n => {
                tracing::trace!(column = expr.column(), values = n, limit = self.max_in_elements, "Splitting IN list");
                let limit = self.max_in_elements;
                let group = self.or();
                for chunk in values.chunks(limit) {
                    group.push_in(expr.clone(), chunk.to_vec());
                }
            }
        }
    }

    fn not_in_predicate(&self, expr: Expr, mut values: Vec<Value>) -> Option<Predicate> {
        match values.len() {
            0 => None,
            1 => Some(Predicate::ne(expr, values.remove(0))),
            n if n <= self.max_in_elements => Some(Predicate::not(Predicate::in_list(expr, values))),
            n => {
                tracing::trace!(column = expr.column(), values = n, limit = self.max_in_elements, "Splitting NOT IN list");
                let parts = values
                    .chunks(self.max_in_elements)
                    .filter_map(|chunk| self.not_in_predicate(expr.clone(), chunk.to_vec()))
                    .collect();
                Some(Predicate::and(parts))
            }
        }
    }

    //
    // STRING MATCHING
    //

    /// `lower(field) LIKE lower(pattern) ESCAPE escape_char`
    ///
    /// The pattern is used as given apart from case folding; `%` and `_`
    /// are wildcards. Blank patterns add nothing.
    pub fn like(&mut self, field: &Field<String>, pattern: &str, escape_char: char) -> Result<&mut Self, EngineError> {
        validate_escape_char(escape_char)?;
        if pattern.trim().is_empty() {
            return Ok(self);
        }
        if let Some(folded) = self.to_ignore_case_string(pattern) {
            self.predicates
                .push(Predicate::like(field.lower(), folded, Some(escape_char)));
        }
        Ok(self)
    }

    /// Case-insensitive "contains" on free text; words may be separated by anything
    pub fn like_text(&mut self, field: &Field<String>, text: &str) -> Result<&mut Self, EngineError> {
        if text.trim().is_empty() {
            return Ok(self);
        }
        let escape = self.escape_char;
        let pattern = self.create_like_pattern(text, escape)?;
        self.like(field, &pattern, escape)
    }

    /// Equality or LIKE depending on the field's [`Matching`]
    pub fn add<'a>(
        &mut self,
        field: &Field<String>,
        value: impl Into<Option<&'a FilterStringField>>,
    ) -> Result<&mut Self, EngineError> {
        let Some(value) = value.into() else {
            return Ok(self);
        };
        let Some(text) = value.value().filter(|v| !v.trim().is_empty()) else {
            return Ok(self);
        };
        let escape = self.escape_char;
        match value.matching() {
            Matching::Exact => {
                self.equal(field, text.to_string());
            }
            Matching::StartsWith => {
                let pattern = self.create_starts_with_pattern(text, escape)?;
                self.like(field, &pattern, escape)?;
            }
            Matching::EndsWith => {
                let pattern = self.create_ends_with_pattern(text, escape)?;
                self.like(field, &pattern, escape)?;
            }
            Matching::Like => {
                self.like_text(field, text)?;
            }
            Matching::Custom => {
                self.like(field, text, escape)?;
            }
        }
        Ok(self)
    }

    /// `%words%`; blank text yields an empty pattern
    pub fn create_like_pattern(&self, text: &str, escape_char: char) -> Result<String, EngineError> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }
        Ok(format!("%{}%", self.prepare_like_pattern(text, escape_char)?))
    }

    /// `words%`; blank text yields an empty pattern
    pub fn create_starts_with_pattern(&self, text: &str, escape_char: char) -> Result<String, EngineError> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }
        Ok(format!("{}%", self.prepare_like_pattern(text, escape_char)?))
    }

    /// `%words`; blank text yields an empty pattern
    pub fn create_ends_with_pattern(&self, text: &str, escape_char: char) -> Result<String, EngineError> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }
        Ok(format!("%{}", self.prepare_like_pattern(text, escape_char)?))
    }

    /// Lower-case with the builder's locale; `None` for empty input
    pub fn to_ignore_case_string(&self, s: &str) -> Option<String> {
        if s.is_empty() {
            None
        } else {
            Some(self.locale.to_lowercase(s))
        }
    }

    fn prepare_like_pattern(&self, text: &str, escape_char: char) -> Result<String, EngineError> {
        validate_escape_char(escape_char)?;
        let folded = self.to_ignore_case_string(text).unwrap_or_default();
        let escaped = escape_like_terms(folded.trim(), escape_char);
        Ok(collapse_whitespace(&escaped).replace(' ', "%"))
    }

    //
    // GROUPING
    //

    /// Open a nested group whose predicates are OR-combined
    ///
    /// The group is folded into this builder as one predicate when the
    /// builder resolves. Groups nest arbitrarily.
    pub fn or(&mut self) -> &mut PredicateBuilder {
        let group = PredicateBuilder {
            locale: self.locale.clone(),
            max_in_elements: self.max_in_elements,
            escape_char: self.escape_char,
            predicates: Vec::new(),
            ors: Vec::new(),
        };
        self.ors.push(group);
        let last = self.ors.len() - 1;
        &mut self.ors[last]
    }

    /// Add pre-built predicates as a single OR group
    pub fn or_predicates(&mut self, predicates: Vec<Predicate>) -> &mut Self {
        if !predicates.is_empty() {
            self.predicates.push(Predicate::or(predicates));
        }
        self
    }

    /// Add an arbitrary predicate
    pub fn push(&mut self, predicate: Predicate) -> &mut Self {
        self.predicates.push(predicate);
        self
    }

    //
    // RESOLUTION
    //

    /// The accumulated predicates, AND-combined by the consumer
    ///
    /// Pending OR-groups are folded in first; calling this repeatedly is
    /// idempotent.
    pub fn predicates(&mut self) -> &[Predicate] {
        self.fold_groups();
        &self.predicates
    }

    pub fn into_predicates(mut self) -> Vec<Predicate> {
        self.fold_groups();
        self.predicates
    }

    /// Everything as one predicate; `TRUE` when nothing was added
    pub fn to_predicate(&mut self) -> Predicate {
        Predicate::and(self.predicates().to_vec())
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty() && self.ors.iter().all(PredicateBuilder::is_empty)
    }

    fn fold_groups(&mut self) {
        for group in std::mem::take(&mut self.ors) {
            let items = group.into_predicates();
            if !items.is_empty() {
                self.predicates.push(Predicate::or(items));
            }
        }
    }
}

fn bool_predicate(field: &Field<bool>, value: bool) -> Predicate {
    if value {
        Predicate::eq(field.expr(), true)
    } else {
        Predicate::or(vec![
            Predicate::is_null(field.expr()),
            Predicate::eq(field.expr(), false),
        ])
    }
}

/// Runs of whitespace become a single space; leading and trailing whitespace is dropped
fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Escape the escape character first, then both wildcards
fn escape_like_terms(s: &str, escape_char: char) -> String {
    let escape = escape_char.to_string();
    collapse_whitespace(s)
        .replace(&escape, &format!("{0}{0}", escape))
        .replace('%', &format!("{}%", escape))
        .replace('_', &format!("{}_", escape))
}

#[cfg(test)]
#[path = "predicate_builder_test.rs"]
mod predicate_builder_test;
