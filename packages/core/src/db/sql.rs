//! SQL Rendering
//!
//! Turns a [`SelectQuery`] into parameterized SQL text. Everything
//! dialect-specific goes through one pluggable hook, [`SqlDialect`]:
//! identifier quoting, placeholder syntax, boolean literals, LIMIT/OFFSET,
//! and the next-value statement for a named sequence.
//!
//! Literal values are never inlined; every value becomes a bind parameter.
//!
//! # Examples
//!
//! ```rust
//! use criteria_core::db::{render_select, Field, Predicate, Projection, SelectQuery, SqliteDialect};
//!
//! const NAME: Field<String> = Field::new("name");
//! let query = SelectQuery::new("person")
//!     .with_predicates(vec![Predicate::like(NAME.lower(), "ann%", Some('\\'))])
//!     .with_max_results(10);
//! let rendered = render_select(&SqliteDialect, &query, &Projection::Rows).unwrap();
//! assert_eq!(
//!     rendered.sql,
//!     "SELECT * FROM \"person\" WHERE lower(\"name\") LIKE ? ESCAPE ? LIMIT 10"
//! );
//! ```

use crate::db::criteria::{Expr, Operand, Predicate, SortDirection};
use crate::db::entity_store::{Projection, SelectQuery};
use crate::db::error::StoreError;
use crate::db::evaluate::Parameters;
use crate::models::{Value, ID_COLUMN};

/// Table holding named sequences
pub const SEQUENCE_TABLE: &str = "_sequences";

/// Dialect hook for SQL generation
pub trait SqlDialect: Send + Sync {
    fn quote_identifier(&self, name: &str) -> String;

    /// Placeholder for the 1-based parameter `index`
    fn placeholder(&self, index: usize) -> String;

    fn boolean_literal(&self, value: bool) -> &'static str;

    /// Trailing LIMIT/OFFSET clause, if any bound is set
    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> Option<String>;

    /// Statement advancing the sequence bound as parameter 1 and returning
    /// its new value
    fn create_sequence_next_value_sql(&self) -> String;
}

/// SQLite / libsql dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn boolean_literal(&self, value: bool) -> &'static str {
        if value {
            "1"
        } else {
            "0"
        }
    }

    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> Option<String> {
        match (limit, offset) {
            (None, None) => None,
            (Some(limit), None) => Some(format!("LIMIT {}", limit)),
            (Some(limit), Some(offset)) => Some(format!("LIMIT {} OFFSET {}", limit, offset)),
            // SQLite has no OFFSET without LIMIT
            (None, Some(offset)) => Some(format!("LIMIT -1 OFFSET {}", offset)),
        }
    }

    fn create_sequence_next_value_sql(&self) -> String {
        format!(
            "INSERT INTO {table} (name, value) VALUES (?, 1) \
             ON CONFLICT(name) DO UPDATE SET value = value + 1 RETURNING value",
            table = self.quote_identifier(SEQUENCE_TABLE)
        )
    }
}

/// SQL text with its positional bind values
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSql {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Render a select with the given projection
pub fn render_select(
    dialect: &dyn SqlDialect,
    query: &SelectQuery,
    projection: &Projection,
) -> Result<RenderedSql, StoreError> {
    let named = query.parameter_map();
    let mut writer = SqlWriter {
        dialect,
        named: &named,
        sql: String::with_capacity(128),
        params: Vec::new(),
    };

    let table = dialect.quote_identifier(&query.entity);
    let distinct = if query.distinct { "DISTINCT " } else { "" };
    match projection {
        Projection::Rows => writer.push(&format!("SELECT {}* FROM {}", distinct, table)),
        Projection::Column(column) => writer.push(&format!(
            "SELECT {}{} FROM {}",
            distinct,
            dialect.quote_identifier(column),
            table
        )),
        Projection::Count if query.distinct => writer.push(&format!(
            "SELECT COUNT(DISTINCT {}) FROM {}",
            dialect.quote_identifier(ID_COLUMN),
            table
        )),
        Projection::Count => writer.push(&format!("SELECT COUNT(*) FROM {}", table)),
    }

    for (i, predicate) in query.predicates.iter().enumerate() {
        writer.push(if i == 0 { " WHERE " } else { " AND " });
        writer.predicate(predicate, query.predicates.len() > 1)?;
    }

    if *projection != Projection::Count {
        if !query.orders.is_empty() {
            writer.push(" ORDER BY ");
            for (i, order) in query.orders.iter().enumerate() {
                if i > 0 {
                    writer.push(", ");
                }
                writer.expr(&order.expr);
                writer.push(match order.direction {
                    SortDirection::Asc => " ASC",
                    SortDirection::Desc => " DESC",
                });
            }
        }
        if let Some(clause) = dialect.limit_offset(query.max_results, query.first_result) {
            writer.push(" ");
            writer.push(&clause);
        }
    }

    Ok(RenderedSql {
        sql: writer.sql,
        params: writer.params,
    })
}

struct SqlWriter<'a> {
    dialect: &'a dyn SqlDialect,
    named: &'a Parameters,
    sql: String,
    params: Vec<Value>,
}

impl SqlWriter<'_> {
    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn bind(&mut self, value: Value) {
        self.params.push(value);
        let placeholder = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Field(name) => {
                let quoted = self.dialect.quote_identifier(name);
                self.push(&quoted);
            }
            Expr::Lower(inner) => {
                self.push("lower(");
                self.expr(inner);
                self.push(")");
            }
        }
    }

    fn operand(&mut self, operand: &Operand) -> Result<(), StoreError> {
        let value = match operand {
            Operand::Value(value) => value.clone(),
            Operand::Param(name) => self
                .named
                .get(name)
                .cloned()
                .ok_or_else(|| StoreError::unbound_parameter(name))?,
        };
        self.bind(value);
        Ok(())
    }

    /// `grouped` wraps compound predicates in parentheses
    fn predicate(&mut self, predicate: &Predicate, grouped: bool) -> Result<(), StoreError> {
        match predicate {
            Predicate::Literal { value } => {
                let literal = self.dialect.boolean_literal(*value);
                self.push(literal);
            }
            Predicate::Compare { expr, op, operand } => {
                self.expr(expr);
                self.push(&format!(" {} ", op.symbol()));
                self.operand(operand)?;
            }
            Predicate::CompareFields { left, op, right } => {
                self.expr(left);
                self.push(&format!(" {} ", op.symbol()));
                self.expr(right);
            }
            Predicate::In { values, .. } if values.is_empty() => {
                let literal = self.dialect.boolean_literal(false);
                self.push(literal);
            }
            Predicate::In { expr, values } => {
                self.expr(expr);
                self.push(" IN (");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.bind(value.clone());
                }
                self.push(")");
            }
            Predicate::IsNull { expr } => {
                self.expr(expr);
                self.push(" IS NULL");
            }
            Predicate::IsNotNull { expr } => {
                self.expr(expr);
                self.push(" IS NOT NULL");
            }
            Predicate::Like {
                expr,
                pattern,
                escape,
            } => {
                self.expr(expr);
                self.push(" LIKE ");
                self.bind(Value::Text(pattern.clone()));
                if let Some(escape) = escape {
                    self.push(" ESCAPE ");
                    self.bind(Value::Text(escape.to_string()));
                }
            }
            Predicate::Not { inner } => {
                self.push("NOT (");
                self.predicate(inner, false)?;
                self.push(")");
            }
            Predicate::And { items } => self.junction(items, " AND ", grouped)?,
            Predicate::Or { items } => self.junction(items, " OR ", grouped)?,
        }
        Ok(())
    }

    fn junction(
        &mut self,
        items: &[Predicate],
        separator: &str,
        grouped: bool,
    ) -> Result<(), StoreError> {
        if items.is_empty() {
            let literal = self.dialect.boolean_literal(separator == " AND ");
            self.push(literal);
            return Ok(());
        }
        if grouped {
            self.push("(");
        }
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.push(separator);
            }
            self.predicate(item, true)?;
        }
        if grouped {
            self.push(")");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::criteria::{Field, Order};

    const NAME: Field<String> = Field::new("name");
    const AGE: Field<i64> = Field::new("age");
    const DELETED: Field<bool> = Field::new("deleted");

    fn render(query: &SelectQuery, projection: Projection) -> RenderedSql {
        render_select(&SqliteDialect, query, &projection).unwrap()
    }

    #[test]
    fn test_rows_with_order_and_offset_only() {
        let query = SelectQuery::new("person")
            .with_orders(vec![Order::desc(&AGE), Order::asc(&NAME)])
            .with_first_result(20);
        let rendered = render(&query, Projection::Rows);
        assert_eq!(
            rendered.sql,
            "SELECT * FROM \"person\" ORDER BY \"age\" DESC, \"name\" ASC LIMIT -1 OFFSET 20"
        );
        assert!(rendered.params.is_empty());
    }

    #[test]
    fn test_count_ignores_order_and_pagination() {
        let query = SelectQuery::new("person")
            .with_distinct(true)
            .with_orders(vec![Order::asc(&NAME)])
            .with_max_results(5);
        assert_eq!(
            render(&query, Projection::Count).sql,
            "SELECT COUNT(DISTINCT \"id\") FROM \"person\""
        );
    }

    #[test]
    fn test_nested_groups_and_binds() {
        let query = SelectQuery::new("person")
            .with_predicates(vec![
                Predicate::or(vec![
                    Predicate::is_null(DELETED.expr()),
                    Predicate::eq(DELETED.expr(), false),
                ]),
                Predicate::not(Predicate::in_list(
                    AGE.expr(),
                    vec![Value::Int(1), Value::Int(2)],
                )),
                Predicate::ge(AGE.expr(), Operand::param("min")),
            ])
            .with_parameter("min", 18);
        let rendered = render(&query, Projection::Column("id".into()));
        assert_eq!(
            rendered.sql,
            "SELECT \"id\" FROM \"person\" WHERE (\"deleted\" IS NULL OR \"deleted\" = ?) \
             AND NOT (\"age\" IN (?, ?)) AND \"age\" >= ?"
        );
        assert_eq!(
            rendered.params,
            vec![Value::Bool(false), Value::Int(1), Value::Int(2), Value::Int(18)]
        );
    }

    #[test]
    fn test_single_top_level_or_is_not_parenthesized() {
        let query = SelectQuery::new("t").with_predicates(vec![Predicate::or(vec![
            Predicate::eq(AGE.expr(), 1),
            Predicate::eq(AGE.expr(), 2),
        ])]);
        assert_eq!(
            render(&query, Projection::Count).sql,
            "SELECT COUNT(*) FROM \"t\" WHERE \"age\" = ? OR \"age\" = ?"
        );
    }

    #[test]
    fn test_unbound_parameter_is_an_error() {
        let query = SelectQuery::new("t")
            .with_predicates(vec![Predicate::eq(AGE.expr(), Operand::param("nope"))]);
        assert!(matches!(
            render_select(&SqliteDialect, &query, &Projection::Rows),
            Err(StoreError::UnboundParameter(_))
        ));
    }

    #[test]
    fn test_identifier_quoting_and_sequence_sql() {
        assert_eq!(SqliteDialect.quote_identifier("we\"ird"), "\"we\"\"ird\"");
        assert!(SqliteDialect
            .create_sequence_next_value_sql()
            .starts_with("INSERT INTO \"_sequences\""));
    }
}
