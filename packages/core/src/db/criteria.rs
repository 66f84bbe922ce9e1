//! Predicate Algebra
//!
//! The typed query vocabulary shared by the predicate builder, the query
//! engine and the storage collaborators.
//!
//! # Architecture
//!
//! - [`Field`] - typed handle naming an entity column
//! - [`Expr`] - a column, or `lower(column)` for case-insensitive matching
//! - [`Operand`] - literal [`Value`] or named bind parameter
//! - [`Predicate`] - boolean tree evaluated with SQL three-valued logic
//! - [`Order`] - one ORDER BY term
//!
//! Stores interpret the tree directly ([`MemoryStore`](crate::db::MemoryStore))
//! or render it to SQL through a [`SqlDialect`](crate::db::SqlDialect).
//! `Display` renders a dialect-neutral form used in logs and tests.
//!
//! # Examples
//!
//! ```rust
//! use criteria_core::db::{Field, Predicate};
//!
//! const AGE: Field<i64> = Field::new("age");
//! let adult = Predicate::ge(AGE.expr(), 18);
//! assert_eq!(adult.to_string(), "age >= 18");
//! ```

use crate::models::Value;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;

/// Typed column handle
///
/// The type parameter records the column's value type so builder methods can
/// reject, say, a timestamp range against a text column at compile time.
pub struct Field<T> {
    name: Cow<'static, str>,
    _type: PhantomData<fn() -> T>,
}

impl<T> Field<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            _type: PhantomData,
        }
    }

    /// Handle for a column name known only at runtime
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            _type: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expr(&self) -> Expr {
        Expr::Field(self.name.to_string())
    }

    pub fn lower(&self) -> Expr {
        Expr::lower(self.expr())
    }
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _type: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Field").field(&self.name).finish()
    }
}

impl<T> PartialEq for Field<T> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<T> Eq for Field<T> {}

/// Value-producing expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "arg", rename_all = "lowercase")]
pub enum Expr {
    Field(String),
    Lower(Box<Expr>),
}

impl Expr {
    pub fn field(name: impl Into<String>) -> Self {
        Expr::Field(name.into())
    }

    pub fn lower(inner: Expr) -> Self {
        Expr::Lower(Box::new(inner))
    }

    /// Column the expression reads
    pub fn column(&self) -> &str {
        match self {
            Expr::Field(name) => name,
            Expr::Lower(inner) => inner.column(),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Field(name) => f.write_str(name),
            Expr::Lower(inner) => write!(f, "lower({})", inner),
        }
    }
}

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "arg", rename_all = "lowercase")]
pub enum Operand {
    Value(Value),
    /// Named bind parameter, resolved from the query's parameter list
    Param(String),
}

impl Operand {
    pub fn param(name: impl Into<String>) -> Self {
        Operand::Param(name.into())
    }
}

macro_rules! operand_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Operand {
                fn from(value: $t) -> Self {
                    Operand::Value(value.into())
                }
            }
        )*
    };
}

operand_from!(Value, bool, i64, i32, String, &str, chrono::DateTime<chrono::Utc>);

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Value(value) => write!(f, "{}", value),
            Operand::Param(name) => write!(f, ":{}", name),
        }
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        }
    }

    /// Whether an ordering satisfies the operator
    pub fn matches(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Eq => ordering == Equal,
            CompareOp::Ne => ordering != Equal,
            CompareOp::Gt => ordering == Greater,
            CompareOp::Ge => ordering != Less,
            CompareOp::Lt => ordering == Less,
            CompareOp::Le => ordering != Greater,
        }
    }
}

/// Boolean predicate tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Predicate {
    Literal {
        value: bool,
    },
    Compare {
        expr: Expr,
        op: CompareOp,
        operand: Operand,
    },
    CompareFields {
        left: Expr,
        op: CompareOp,
        right: Expr,
    },
    In {
        expr: Expr,
        values: Vec<Value>,
    },
    IsNull {
        expr: Expr,
    },
    IsNotNull {
        expr: Expr,
    },
    /// `expr LIKE pattern ESCAPE escape`
    Like {
        expr: Expr,
        pattern: String,
        escape: Option<char>,
    },
    Not {
        inner: Box<Predicate>,
    },
    And {
        items: Vec<Predicate>,
    },
    Or {
        items: Vec<Predicate>,
    },
}

impl Predicate {
    pub fn literal(value: bool) -> Self {
        Predicate::Literal { value }
    }

    pub fn compare(expr: Expr, op: CompareOp, operand: impl Into<Operand>) -> Self {
        Predicate::Compare {
            expr,
            op,
            operand: operand.into(),
        }
    }

    pub fn eq(expr: Expr, operand: impl Into<Operand>) -> Self {
        Self::compare(expr, CompareOp::Eq, operand)
    }

    pub fn ne(expr: Expr, operand: impl Into<Operand>) -> Self {
        Self::compare(expr, CompareOp::Ne, operand)
    }

    pub fn gt(expr: Expr, operand: impl Into<Operand>) -> Self {
        Self::compare(expr, CompareOp::Gt, operand)
    }

    pub fn ge(expr: Expr, operand: impl Into<Operand>) -> Self {
        Self::compare(expr, CompareOp::Ge, operand)
    }

    pub fn lt(expr: Expr, operand: impl Into<Operand>) -> Self {
        Self::compare(expr, CompareOp::Lt, operand)
    }

    pub fn le(expr: Expr, operand: impl Into<Operand>) -> Self {
        Self::compare(expr, CompareOp::Le, operand)
    }

    pub fn compare_fields(left: Expr, op: CompareOp, right: Expr) -> Self {
        Predicate::CompareFields { left, op, right }
    }

    pub fn in_list(expr: Expr, values: Vec<Value>) -> Self {
        Predicate::In { expr, values }
    }

    pub fn is_null(expr: Expr) -> Self {
        Predicate::IsNull { expr }
    }

    pub fn is_not_null(expr: Expr) -> Self {
        Predicate::IsNotNull { expr }
    }

    pub fn like(expr: Expr, pattern: impl Into<String>, escape: Option<char>) -> Self {
        Predicate::Like {
            expr,
            pattern: pattern.into(),
            escape,
        }
    }

    pub fn not(inner: Predicate) -> Self {
        Predicate::Not {
            inner: Box::new(inner),
        }
    }

    /// Conjunction; an empty list is TRUE and a single item is returned as-is
    pub fn and(mut items: Vec<Predicate>) -> Self {
        match items.len() {
            0 => Predicate::literal(true),
            1 => items.remove(0),
            _ => Predicate::And { items },
        }
    }

    /// Disjunction; an empty list is FALSE and a single item is returned as-is
    pub fn or(mut items: Vec<Predicate>) -> Self {
        match items.len() {
            0 => Predicate::literal(false),
            1 => items.remove(0),
            _ => Predicate::Or { items },
        }
    }

    /// Names of every bind parameter referenced by the tree
    pub fn parameter_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_parameter_names(&mut names);
        names
    }

    fn collect_parameter_names<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Predicate::Compare {
                operand: Operand::Param(name),
                ..
            } => names.push(name),
            Predicate::Not { inner } => inner.collect_parameter_names(names),
            Predicate::And { items } | Predicate::Or { items } => {
                for item in items {
                    item.collect_parameter_names(names);
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Literal { value } => f.write_str(if *value { "TRUE" } else { "FALSE" }),
            Predicate::Compare { expr, op, operand } => {
                write!(f, "{} {} {}", expr, op.symbol(), operand)
            }
            Predicate::CompareFields { left, op, right } => {
                write!(f, "{} {} {}", left, op.symbol(), right)
            }
            Predicate::In { expr, values } => {
                let list: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "{} IN ({})", expr, list.join(", "))
            }
            Predicate::IsNull { expr } => write!(f, "{} IS NULL", expr),
            Predicate::IsNotNull { expr } => write!(f, "{} IS NOT NULL", expr),
            Predicate::Like {
                expr,
                pattern,
                escape,
            } => {
                write!(f, "{} LIKE '{}'", expr, pattern)?;
                if let Some(escape) = escape {
                    write!(f, " ESCAPE '{}'", escape)?;
                }
                Ok(())
            }
            Predicate::Not { inner } => write!(f, "NOT ({})", inner),
            Predicate::And { items } => write_joined(f, items, " AND "),
            Predicate::Or { items } => write_joined(f, items, " OR "),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, items: &[Predicate], separator: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(separator)?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str(")")
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One ORDER BY term
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Order {
    pub expr: Expr,
    pub direction: SortDirection,
}

impl Order {
    pub fn asc<T>(field: &Field<T>) -> Self {
        Self {
            expr: field.expr(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc<T>(field: &Field<T>) -> Self {
        Self {
            expr: field.expr(),
            direction: SortDirection::Desc,
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            SortDirection::Asc => write!(f, "{} ASC", self.expr),
            SortDirection::Desc => write!(f, "{} DESC", self.expr),
        }
    }
}
