//! Error types for ATRIUM operations

use crate::WorkspaceId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Entity kind discriminator used in error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Workspace,
    Project,
    Connection,
    Member,
    AuditLog,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            EntityKind::Workspace => "workspace",
            EntityKind::Project => "project",
            EntityKind::Connection => "connection",
            EntityKind::Member => "member",
            EntityKind::AuditLog => "audit log",
        };
        f.write_str(value)
    }
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: EntityKind, id: String },

    #[error("Duplicate {entity}: {key} already exists")]
    Duplicate { entity: EntityKind, key: String },

    #[error("Workspace {workspace_id} would be left without an owner")]
    LastOwner { workspace_id: WorkspaceId },

    #[error("Cannot delete {entity} {id}: {children} active children attached")]
    HasChildren {
        entity: EntityKind,
        id: String,
        children: u64,
    },

    #[error("Storage backend failure: {reason}")]
    Backend { reason: String },
}

impl StorageError {
    pub fn not_found(entity: EntityKind, id: impl fmt::Display) -> Self {
        StorageError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn duplicate(entity: EntityKind, key: impl fmt::Display) -> Self {
        StorageError::Duplicate {
            entity,
            key: key.to_string(),
        }
    }

    pub fn backend(reason: impl fmt::Display) -> Self {
        StorageError::Backend {
            reason: reason.to_string(),
        }
    }
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Field {field} exceeds {max} characters")]
    TooLong { field: String, max: usize },
}

/// Cache layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend failure: {reason}")]
    Backend { reason: String },

    #[error("Cache serialization failure: {reason}")]
    Serialization { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all ATRIUM errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AtriumError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl AtriumError {
    /// True when the error reports a missing entity.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AtriumError::Storage(StorageError::NotFound { .. }))
    }
}

/// Result type alias for ATRIUM operations.
pub type AtriumResult<T> = Result<T, AtriumError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityIdType;

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::not_found(EntityKind::Project, "p-1");
        let msg = format!("{}", err);
        assert!(msg.contains("Entity not found"));
        assert!(msg.contains("project"));
        assert!(msg.contains("p-1"));
    }

    #[test]
    fn test_storage_error_display_last_owner() {
        let id = WorkspaceId::nil();
        let msg = StorageError::LastOwner { workspace_id: id }.to_string();
        assert!(msg.contains("without an owner"));
        assert!(msg.contains(&id.to_string()));
    }

    #[test]
    fn test_has_children_display() {
        let err = StorageError::HasChildren {
            entity: EntityKind::Workspace,
            id: "w".to_string(),
            children: 3,
        };
        assert!(err.to_string().contains("3 active children"));
    }

    #[test]
    fn test_master_error_from() {
        let err: AtriumError = ValidationError::RequiredFieldMissing {
            field: "name".to_string(),
        }
        .into();
        assert!(matches!(err, AtriumError::Validation(_)));
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn test_is_not_found() {
        let err: AtriumError = StorageError::not_found(EntityKind::Member, "x").into();
        assert!(err.is_not_found());
        let err: AtriumError = StorageError::backend("boom").into();
        assert!(!err.is_not_found());
    }
}
