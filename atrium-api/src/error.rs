//! Error Types for the ATRIUM services
//!
//! This module defines error handling for the service layer, including:
//! - ApiError struct for structured error results
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation so a transport can return errors directly
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.

use atrium_core::{AtriumError, CacheError, ConfigError, StorageError, ValidationError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for service results.
///
/// Each error code maps to a specific HTTP status code and represents
/// a category of error that can occur during service operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Workspace, project, connection or member does not exist (or is deleted)
    NotFound,

    /// Caller lacks a membership or the required role
    Unauthorized,

    /// Tenant or workspace ceiling reached
    QuotaExceeded,

    /// Uniqueness violated (name, base, membership)
    DuplicateResource,

    /// Operation would leave a workspace without an owner
    LastOwner,

    /// Request failed validation
    InvalidInput,

    /// Delete rejected because non-deleted children exist
    Conflict,

    /// Unexpected failure (store, serialization, ...)
    Internal,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Unauthorized => StatusCode::FORBIDDEN,
            ErrorCode::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::DuplicateResource | ErrorCode::LastOwner | ErrorCode::Conflict => {
                StatusCode::CONFLICT
            }
            ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::Unauthorized => "Insufficient permissions",
            ErrorCode::QuotaExceeded => "Quota exceeded",
            ErrorCode::DuplicateResource => "Resource already exists",
            ErrorCode::LastOwner => "Cannot remove or demote the last owner",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::Conflict => "Resource still has active children",
            ErrorCode::Internal => "Internal server error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error returned by every service operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details (quota limits, child counts, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
            details: None,
        }
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    /// Create a NotFound error.
    pub fn not_found(entity_type: &str, id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::NotFound,
            format!("{} {} not found", entity_type, id),
        )
    }

    /// Create an Unauthorized error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Create a QuotaExceeded error carrying the ceiling.
    pub fn quota_exceeded(resource: &str, limit: u64) -> Self {
        Self::new(
            ErrorCode::QuotaExceeded,
            format!("Maximum number of {} ({}) reached", resource, limit),
        )
        .with_details(json!({ "resource": resource, "limit": limit }))
    }

    /// Create a DuplicateResource error.
    pub fn duplicate(entity_type: &str, key: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::DuplicateResource,
            format!("{} '{}' already exists", entity_type, key),
        )
    }

    /// Create a LastOwner error.
    pub fn last_owner() -> Self {
        Self::from_code(ErrorCode::LastOwner)
    }

    /// Create an InvalidInput error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Create a MissingField flavored InvalidInput error.
    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::InvalidInput,
            format!("Required field '{}' is missing", field),
        )
    }

    /// Create a Conflict error for a delete blocked by children.
    pub fn has_children(entity_type: &str, id: impl fmt::Display, children: u64) -> Self {
        Self::new(
            ErrorCode::Conflict,
            format!(
                "Cannot delete {} {}: {} active children must be deleted first",
                entity_type, id, children
            ),
        )
        .with_details(json!({ "children": children }))
    }

    /// Create an Internal error.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

/// Implement IntoResponse for ApiError to enable automatic error handling in Axum.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM DOMAIN ERRORS
// ============================================================================

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { entity, id } => ApiError::not_found(&entity.to_string(), id),
            StorageError::Duplicate { entity, key } => ApiError::duplicate(&entity.to_string(), key),
            StorageError::LastOwner { .. } => ApiError::last_owner(),
            StorageError::HasChildren {
                entity,
                id,
                children,
            } => ApiError::has_children(&entity.to_string(), id, children),
            StorageError::Backend { reason } => {
                tracing::error!(error = %reason, "Storage backend failure");
                ApiError::internal_error("Storage operation failed")
            }
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::invalid_input(err.to_string())
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        tracing::error!(error = %err, "Cache failure surfaced to caller");
        ApiError::internal_error("Cache operation failed")
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::internal_error(err.to_string())
    }
}

impl From<AtriumError> for ApiError {
    fn from(err: AtriumError) -> Self {
        match err {
            AtriumError::Storage(e) => e.into(),
            AtriumError::Validation(e) => e.into(),
            AtriumError::Cache(e) => e.into(),
            AtriumError::Config(e) => e.into(),
        }
    }
}

/// Convert from tokio_postgres::Error to ApiError.
impl From<tokio_postgres::Error> for ApiError {
    fn from(err: tokio_postgres::Error) -> Self {
        // Log the full error for debugging
        tracing::error!("Database error: {:?}", err);

        // Return a generic error to avoid leaking internal details
        ApiError::internal_error("Database operation failed")
    }
}

/// Convert from deadpool_postgres::PoolError to ApiError.
impl From<deadpool_postgres::PoolError> for ApiError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        tracing::error!("Connection pool error: {:?}", err);
        ApiError::internal_error("Failed to acquire database connection")
    }
}

/// Convert from serde_json::Error to ApiError.
impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

/// Convert from uuid::Error to ApiError.
impl From<uuid::Error> for ApiError {
    fn from(err: uuid::Error) -> Self {
        ApiError::invalid_input(format!("Invalid id: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for service operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_core::{EntityIdType, EntityKind, WorkspaceId};

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::Unauthorized.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::QuotaExceeded.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorCode::DuplicateResource.status_code(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::LastOwner.status_code(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::InvalidInput.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::Conflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::Internal.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_storage_error_mapping() {
        let err: ApiError = StorageError::not_found(EntityKind::Project, "p-1").into();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert!(err.message.contains("p-1"));

        let err: ApiError = StorageError::LastOwner {
            workspace_id: WorkspaceId::nil(),
        }
        .into();
        assert_eq!(err.code, ErrorCode::LastOwner);

        let err: ApiError = AtriumError::from(StorageError::HasChildren {
            entity: EntityKind::Workspace,
            id: "w".to_string(),
            children: 2,
        })
        .into();
        assert_eq!(err.code, ErrorCode::Conflict);
        assert_eq!(err.details, Some(json!({ "children": 2 })));
    }

    #[test]
    fn test_backend_failure_hides_reason() {
        let err: ApiError = StorageError::backend("connection reset by peer").into();
        assert_eq!(err.code, ErrorCode::Internal);
        assert!(!err.message.contains("peer"));
    }

    #[test]
    fn test_validation_maps_to_invalid_input() {
        let err: ApiError = ValidationError::RequiredFieldMissing {
            field: "name".to_string(),
        }
        .into();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn test_quota_details() {
        let err = ApiError::quota_exceeded("workspaces", 10);
        assert_eq!(err.code, ErrorCode::QuotaExceeded);
        assert!(err.message.contains("10"));
        assert_eq!(err.details, Some(json!({ "resource": "workspaces", "limit": 10 })));
    }

    #[test]
    fn test_error_serialization() -> Result<(), serde_json::Error> {
        let err = ApiError::last_owner();
        let json = serde_json::to_string(&err)?;
        assert!(json.contains("LAST_OWNER"));

        let deserialized: ApiError = serde_json::from_str(&json)?;
        assert_eq!(deserialized, err);
        Ok(())
    }

    #[test]
    fn test_error_display() {
        let display = ApiError::unauthorized("admin role required").to_string();
        assert!(display.contains("Unauthorized"));
        assert!(display.contains("admin role required"));
    }
}
