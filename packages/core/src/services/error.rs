//! Service Layer Error Types
//!
//! Errors surfaced by the predicate builder and the query engine.

use crate::db::StoreError;
use crate::models::FormatError;
use thiserror::Error;

/// Engine operation errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed builder or engine usage, detected before any I/O
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A merge lost the optimistic-locking race
    #[error("Object already modified by different user ({entity} {id})")]
    ObjectAlreadyModified {
        entity: String,
        id: i64,
        #[source]
        source: StoreError,
    },

    /// `not_null` received nothing
    #[error("Object is null")]
    ObjectNotFound,

    /// Malformed boundary input
    #[error("Invalid format: {0}")]
    InvalidFormat(#[from] FormatError),

    /// Any other storage failure, unchanged
    #[error("Storage operation failed: {0}")]
    Storage(#[from] StoreError),
}

impl EngineError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn object_already_modified(entity: impl Into<String>, id: i64, source: StoreError) -> Self {
        Self::ObjectAlreadyModified {
            entity: entity.into(),
            id,
            source,
        }
    }

    pub fn is_already_modified(&self) -> bool {
        matches!(self, Self::ObjectAlreadyModified { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_already_modified_keeps_cause() {
        let err = EngineError::object_already_modified(
            "document",
            5,
            StoreError::version_conflict("document", 5, 1, Some(2)),
        );
        assert!(err.is_already_modified());
        assert!(err.to_string().starts_with("Object already modified by different user"));
        let cause = err.source().map(ToString::to_string).unwrap_or_default();
        assert!(cause.contains("expected version 1"));
    }

    #[test]
    fn test_conversions() {
        let err: EngineError = FormatError::UnknownMatching("X".into()).into();
        assert!(matches!(err, EngineError::InvalidFormat(_)));
        let err: EngineError = StoreError::unknown_entity("t").into();
        assert!(matches!(err, EngineError::Storage(_)));
    }
}
