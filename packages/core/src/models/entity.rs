//! Entity Contract
//!
//! Persisted types implement [`Entity`]: a stable entity name, an integer id
//! (`0` while transient), an optional version counter, and conversion to and
//! from a [`Row`]. `Default` is the transient-instance factory.
//!
//! Entities carrying the common audit columns embed an [`AuditableEntity`] and
//! implement [`Auditable`].
//!
//! # Examples
//!
//! ```rust
//! use criteria_core::models::{Auditable, AuditableEntity, Entity, Row, RowExt};
//!
//! #[derive(Debug, Clone, Default)]
//! struct Tag {
//!     audit: AuditableEntity,
//!     label: String,
//! }
//!
//! impl Entity for Tag {
//!     const ENTITY_NAME: &'static str = "tag";
//!
//!     fn id(&self) -> i64 { self.audit.id }
//!     fn set_id(&mut self, id: i64) { self.audit.id = id; }
//!     fn version(&self) -> Option<i64> { Some(self.audit.version) }
//!     fn set_version(&mut self, version: i64) { self.audit.version = version; }
//!
//!     fn to_row(&self) -> Row {
//!         let mut row = self.audit.to_row();
//!         row.insert("label".into(), self.label.clone().into());
//!         row
//!     }
//!
//!     fn from_row(row: &Row) -> anyhow::Result<Self> {
//!         Ok(Self {
//!             audit: AuditableEntity::from_row(row)?,
//!             label: row.get_str("label")?,
//!         })
//!     }
//! }
//!
//! impl Auditable for Tag {
//!     fn audit(&self) -> &AuditableEntity { &self.audit }
//!     fn audit_mut(&mut self) -> &mut AuditableEntity { &mut self.audit }
//! }
//!
//! assert!(Tag::default().is_transient());
//! ```

use crate::db::criteria::Field;
use crate::models::value::{Row, Value};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Primary key column of every entity table
pub const ID_COLUMN: &str = "id";

/// Optimistic-locking counter column
pub const VERSION_COLUMN: &str = "version";

/// A persisted, identity-bearing type
pub trait Entity: Clone + Default + Send + Sync + 'static {
    /// Table / cache region name
    const ENTITY_NAME: &'static str;

    fn id(&self) -> i64;

    fn set_id(&mut self, id: i64);

    /// `None` for entities without a version column
    fn version(&self) -> Option<i64> {
        None
    }

    fn set_version(&mut self, _version: i64) {}

    /// Column values, including `id` (and `version` when versioned)
    fn to_row(&self) -> Row;

    fn from_row(row: &Row) -> Result<Self>;

    fn is_transient(&self) -> bool {
        self.id() == 0
    }
}

/// Audit columns shared by auditable entities
///
/// `id == 0` marks a transient instance; the store assigns the id and
/// `version = 0` on first save and increments `version` on every merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditableEntity {
    pub id: i64,
    pub created: DateTime<Utc>,
    pub edited: DateTime<Utc>,
    pub creator: Option<i64>,
    pub editor: Option<i64>,
    pub version: i64,
    pub deleted: bool,
}

impl AuditableEntity {
    pub const ID: Field<i64> = Field::new(ID_COLUMN);
    pub const CREATED: Field<DateTime<Utc>> = Field::new("created");
    pub const EDITED: Field<DateTime<Utc>> = Field::new("edited");
    pub const CREATOR: Field<i64> = Field::new("creator");
    pub const EDITOR: Field<i64> = Field::new("editor");
    pub const VERSION: Field<i64> = Field::new(VERSION_COLUMN);
    pub const DELETED: Field<bool> = Field::new("deleted");

    /// Audit columns as a row fragment
    pub fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert(ID_COLUMN.into(), Value::Int(self.id));
        row.insert(Self::CREATED.name().into(), Value::Timestamp(self.created));
        row.insert(Self::EDITED.name().into(), Value::Timestamp(self.edited));
        row.insert(Self::CREATOR.name().into(), self.creator.into());
        row.insert(Self::EDITOR.name().into(), self.editor.into());
        row.insert(VERSION_COLUMN.into(), Value::Int(self.version));
        row.insert(Self::DELETED.name().into(), Value::Bool(self.deleted));
        row
    }

    /// Read the audit columns; a NULL deletion flag reads as `false`
    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_i64(ID_COLUMN)?,
            created: row.get_timestamp(Self::CREATED.name())?,
            edited: row.get_timestamp(Self::EDITED.name())?,
            creator: row.get_opt_i64(Self::CREATOR.name())?,
            editor: row.get_opt_i64(Self::EDITOR.name())?,
            version: row.get_i64(VERSION_COLUMN)?,
            deleted: row.get_opt_bool(Self::DELETED.name())?.unwrap_or(false),
        })
    }
}

/// Entity embedding the audit columns
pub trait Auditable: Entity {
    fn audit(&self) -> &AuditableEntity;
    fn audit_mut(&mut self) -> &mut AuditableEntity;
}

/// Typed column reads with decode context
pub trait RowExt {
    fn get_value(&self, column: &str) -> &Value;
    fn get_i64(&self, column: &str) -> Result<i64>;
    fn get_opt_i64(&self, column: &str) -> Result<Option<i64>>;
    fn get_str(&self, column: &str) -> Result<String>;
    fn get_opt_str(&self, column: &str) -> Result<Option<String>>;
    fn get_opt_bool(&self, column: &str) -> Result<Option<bool>>;
    fn get_timestamp(&self, column: &str) -> Result<DateTime<Utc>>;
    fn get_opt_timestamp(&self, column: &str) -> Result<Option<DateTime<Utc>>>;
}

static NULL: Value = Value::Null;

impl RowExt for Row {
    /// Missing columns read as NULL
    fn get_value(&self, column: &str) -> &Value {
        self.get(column).unwrap_or(&NULL)
    }

    fn get_i64(&self, column: &str) -> Result<i64> {
        self.get_opt_i64(column)?
            .ok_or_else(|| anyhow!("Column '{}' is NULL", column))
    }

    fn get_opt_i64(&self, column: &str) -> Result<Option<i64>> {
        match self.get_value(column) {
            Value::Null => Ok(None),
            value => value
                .as_i64()
                .map(Some)
                .with_context(|| format!("Failed to read '{}' as integer: {}", column, value)),
        }
    }

    fn get_str(&self, column: &str) -> Result<String> {
        self.get_opt_str(column)?
            .ok_or_else(|| anyhow!("Column '{}' is NULL", column))
    }

    fn get_opt_str(&self, column: &str) -> Result<Option<String>> {
        match self.get_value(column) {
            Value::Null => Ok(None),
            Value::Text(s) => Ok(Some(s.clone())),
            value => Err(anyhow!("Failed to read '{}' as text: {}", column, value)),
        }
    }

    fn get_opt_bool(&self, column: &str) -> Result<Option<bool>> {
        match self.get_value(column) {
            Value::Null => Ok(None),
            value => value
                .as_bool()
                .map(Some)
                .with_context(|| format!("Failed to read '{}' as boolean: {}", column, value)),
        }
    }

    fn get_timestamp(&self, column: &str) -> Result<DateTime<Utc>> {
        self.get_opt_timestamp(column)?
            .ok_or_else(|| anyhow!("Column '{}' is NULL", column))
    }

    fn get_opt_timestamp(&self, column: &str) -> Result<Option<DateTime<Utc>>> {
        match self.get_value(column) {
            Value::Null => Ok(None),
            value => value
                .as_timestamp()
                .map(Some)
                .with_context(|| format!("Failed to parse '{}' as timestamp: {}", column, value)),
        }
    }
}
