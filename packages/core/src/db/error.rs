//! Store Error Types
//!
//! Errors raised by storage collaborators. The version conflict is kept
//! distinguishable so the engine can translate it into an
//! "already modified" failure; everything else is propagated unchanged.

use thiserror::Error;

/// Storage collaborator errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Version-guarded update matched no row
    ///
    /// `actual_version` is `None` when the row no longer exists.
    #[error("Version conflict for {entity} {id}: expected version {expected_version}, found {}", display_version(.actual_version))]
    VersionConflict {
        entity: String,
        id: i64,
        expected_version: i64,
        actual_version: Option<i64>,
    },

    /// A predicate references a parameter the query does not bind
    #[error("Unbound query parameter: {0}")]
    UnboundParameter(String),

    /// No table or cache region is known for the entity
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// A stored row could not be converted into an entity
    #[error("Failed to decode {entity} row: {context}")]
    Decode { entity: String, context: String },

    /// SQL execution error with context
    #[error("SQL execution failed: {context}")]
    Sql { context: String },

    /// Failed to create the database's parent directory
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    Libsql(#[from] libsql::Error),
}

fn display_version(version: &Option<i64>) -> String {
    version.map_or_else(|| "no row".to_string(), |v| v.to_string())
}

impl StoreError {
    pub fn version_conflict(
        entity: impl Into<String>,
        id: i64,
        expected_version: i64,
        actual_version: Option<i64>,
    ) -> Self {
        Self::VersionConflict {
            entity: entity.into(),
            id,
            expected_version,
            actual_version,
        }
    }

    pub fn unbound_parameter(name: impl Into<String>) -> Self {
        Self::UnboundParameter(name.into())
    }

    pub fn unknown_entity(entity: impl Into<String>) -> Self {
        Self::UnknownEntity(entity.into())
    }

    /// Wrap a row decoding failure, keeping the full context chain
    pub fn decode(entity: impl Into<String>, error: anyhow::Error) -> Self {
        Self::Decode {
            entity: entity.into(),
            context: format!("{:#}", error),
        }
    }

    pub fn sql(context: impl Into<String>) -> Self {
        Self::Sql {
            context: context.into(),
        }
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}
