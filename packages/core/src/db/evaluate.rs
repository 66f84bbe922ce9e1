//! In-Process Predicate Evaluation
//!
//! Evaluates a [`Predicate`] against a [`Row`] with SQL three-valued logic:
//! `Some(true)`, `Some(false)` or `None` (unknown). A row matches a WHERE
//! clause only when the result is `Some(true)`.
//!
//! - Any comparison involving NULL is unknown
//! - `x IN (...)` is true on a match, otherwise unknown if the list holds a NULL
//! - `NOT unknown` is unknown
//! - `AND` is false if any item is false, `OR` is true if any item is true
//!
//! LIKE patterns are compiled to anchored regular expressions; `%` matches any
//! run, `_` any single character, and the escape character makes the next
//! character literal. [`RowMatcher`] compiles them once per predicate list.

use crate::db::criteria::{Expr, Operand, Predicate};
use crate::db::error::StoreError;
use crate::models::{Row, RowExt, Value};
use regex::Regex;
use std::collections::BTreeMap;

/// Named bind parameters
pub type Parameters = BTreeMap<String, Value>;

/// Evaluate `predicate` against `row`
pub fn evaluate(
    predicate: &Predicate,
    row: &Row,
    params: &Parameters,
) -> Result<Option<bool>, StoreError> {
    let patterns = LikePatterns::compile(std::slice::from_ref(predicate))?;
    evaluate_with(predicate, row, params, &patterns)
}

/// True when the row satisfies every predicate
///
/// Compiles LIKE patterns on each call; use [`RowMatcher`] when testing many
/// rows against the same predicates.
pub fn matches_all(
    predicates: &[Predicate],
    row: &Row,
    params: &Parameters,
) -> Result<bool, StoreError> {
    RowMatcher::new(predicates, params)?.matches(row)
}

/// A predicate list bound to its parameters, reusable across rows
///
/// Every LIKE pattern in the list is compiled once, up front.
#[derive(Debug)]
pub struct RowMatcher<'a> {
    predicates: &'a [Predicate],
    params: &'a Parameters,
    patterns: LikePatterns,
}

impl<'a> RowMatcher<'a> {
    pub fn new(predicates: &'a [Predicate], params: &'a Parameters) -> Result<Self, StoreError> {
        Ok(Self {
            predicates,
            params,
            patterns: LikePatterns::compile(predicates)?,
        })
    }

    /// True when `row` satisfies every predicate
    pub fn matches(&self, row: &Row) -> Result<bool, StoreError> {
        for predicate in self.predicates {
            if evaluate_with(predicate, row, self.params, &self.patterns)? != Some(true) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Number of distinct compiled LIKE patterns
    pub fn compiled_patterns(&self) -> usize {
        self.patterns.compiled.len()
    }
}

/// Compiled LIKE patterns keyed by pattern text and escape character
#[derive(Debug, Default)]
struct LikePatterns {
    compiled: Vec<(String, Option<char>, Regex)>,
}

impl LikePatterns {
    fn compile(predicates: &[Predicate]) -> Result<Self, StoreError> {
        let mut patterns = Self::default();
        for predicate in predicates {
            patterns.collect(predicate)?;
        }
        Ok(patterns)
    }

    fn collect(&mut self, predicate: &Predicate) -> Result<(), StoreError> {
        match predicate {
            Predicate::Like {
                pattern, escape, ..
            } => {
                if self.get(pattern, *escape).is_none() {
                    let regex = like_regex(pattern, *escape)?;
                    self.compiled.push((pattern.clone(), *escape, regex));
                }
            }
            Predicate::Not { inner } => self.collect(inner)?,
            Predicate::And { items } | Predicate::Or { items } => {
                for item in items {
                    self.collect(item)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn get(&self, pattern: &str, escape: Option<char>) -> Option<&Regex> {
        self.compiled
            .iter()
            .find(|(p, e, _)| p == pattern && *e == escape)
            .map(|(_, _, regex)| regex)
    }

    fn is_match(&self, pattern: &str, escape: Option<char>, text: &str) -> Result<bool, StoreError> {
        match self.get(pattern, escape) {
            Some(regex) => Ok(regex.is_match(text)),
            None => Ok(like_regex(pattern, escape)?.is_match(text)),
        }
    }
}

fn evaluate_with(
    predicate: &Predicate,
    row: &Row,
    params: &Parameters,
    patterns: &LikePatterns,
) -> Result<Option<bool>, StoreError> {
    let result = match predicate {
        Predicate::Literal { value } => Some(*value),
        Predicate::Compare { expr, op, operand } => {
            let left = eval_expr(expr, row);
            let right = resolve_operand(operand, params)?;
            left.sql_cmp(&right).map(|ordering| op.matches(ordering))
        }
        Predicate::CompareFields { left, op, right } => eval_expr(left, row)
            .sql_cmp(&eval_expr(right, row))
            .map(|ordering| op.matches(ordering)),
        Predicate::In { expr, values } => eval_in(&eval_expr(expr, row), values),
        Predicate::IsNull { expr } => Some(eval_expr(expr, row).is_null()),
        Predicate::IsNotNull { expr } => Some(!eval_expr(expr, row).is_null()),
        Predicate::Like {
            expr,
            pattern,
            escape,
        } => match eval_expr(expr, row) {
            Value::Null => None,
            Value::Text(text) => Some(patterns.is_match(pattern, *escape, &text)?),
            other => Some(patterns.is_match(pattern, *escape, &other.to_string())?),
        },
        Predicate::Not { inner } => evaluate_with(inner, row, params, patterns)?.map(|b| !b),
        Predicate::And { items } => {
            let mut result = Some(true);
            for item in items {
                match evaluate_with(item, row, params, patterns)? {
                    Some(false) => return Ok(Some(false)),
                    None => result = None,
                    Some(true) => {}
                }
            }
            result
        }
        Predicate::Or { items } => {
            let mut result = Some(false);
            for item in items {
                match evaluate_with(item, row, params, patterns)? {
                    Some(true) => return Ok(Some(true)),
                    None => result = None,
                    Some(false) => {}
                }
            }
            result
        }
    };
    Ok(result)
}

/// Value of an expression for a row; missing columns read as NULL
pub fn eval_expr(expr: &Expr, row: &Row) -> Value {
    match expr {
        Expr::Field(name) => row.get_value(name).clone(),
        Expr::Lower(inner) => match eval_expr(inner, row) {
            Value::Text(text) => Value::Text(text.to_lowercase()),
            other => other,
        },
    }
}

fn resolve_operand(operand: &Operand, params: &Parameters) -> Result<Value, StoreError> {
    match operand {
        Operand::Value(value) => Ok(value.clone()),
        Operand::Param(name) => params
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::unbound_parameter(name)),
    }
}

fn eval_in(value: &Value, values: &[Value]) -> Option<bool> {
    if value.is_null() {
        return None;
    }
    let mut saw_null = false;
    for candidate in values {
        match value.sql_cmp(candidate) {
            Some(std::cmp::Ordering::Equal) => return Some(true),
            None if candidate.is_null() => saw_null = true,
            _ => {}
        }
    }
    if saw_null {
        None
    } else {
        Some(false)
    }
}

/// Compile a LIKE pattern into an anchored regex
pub fn like_regex(pattern: &str, escape: Option<char>) -> Result<Regex, StoreError> {
    let mut source = String::with_capacity(pattern.len() * 2 + 8);
    source.push_str("(?s)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if Some(c) == escape {
            match chars.next() {
                Some(literal) => source.push_str(&regex::escape(&literal.to_string())),
                None => {
                    return Err(StoreError::sql(format!(
                        "LIKE pattern '{}' ends with the escape character",
                        pattern
                    )))
                }
            }
        } else if c == '%' {
            source.push_str(".*");
        } else if c == '_' {
            source.push('.');
        } else {
            source.push_str(&regex::escape(&c.to_string()));
        }
    }
    source.push('$');
    Regex::new(&source).map_err(|e| StoreError::sql(format!("Invalid LIKE pattern '{}': {}", pattern, e)))
}
