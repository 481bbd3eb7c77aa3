//! ATRIUM Core - Domain types for the Workspace → Project → Connection hierarchy
//!
//! Pure data types shared by the storage and service crates:
//! typed identifiers, roles and the role hierarchy evaluator, entities with
//! their lifecycle state, request types, listing filters and the error
//! taxonomy. Nothing in this crate performs I/O.

pub mod audit;
pub mod config;
pub mod entities;
pub mod error;
pub mod filter;
pub mod identity;
pub mod requests;
pub mod role;
pub mod stats;

pub use audit::{AuditAction, AuditLogEntry, ChangeSet, ResourceKind};
pub use config::AtriumConfig;
pub use entities::{
    Connection, Lifecycle, Membership, Project, ProjectStatus, Settings, Workspace,
};
pub use error::{
    AtriumError, AtriumResult, CacheError, ConfigError, EntityKind, StorageError, ValidationError,
};
pub use filter::{
    normalize_search, total_pages, AuditLogFilter, ConnectionFilter, Page, PageRequest,
    ProjectFilter, Sort, SortField, SortOrder, WorkspaceFilter, AUDIT_DEFAULT_PAGE_SIZE,
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
pub use identity::{
    AuditLogId, ConnectionId, EntityIdType, ProjectId, TenantId, Timestamp, UserId, WorkspaceId,
};
pub use requests::{
    validate_name, AddMemberRequest, CreateConnectionRequest, CreateProjectRequest,
    CreateWorkspaceRequest, UpdateConnectionRequest, UpdateMemberRoleRequest,
    UpdateProjectRequest, UpdateWorkspaceRequest, MAX_NAME_LEN,
};
pub use role::{role_rank, satisfies, Role};
pub use stats::WorkspaceStats;
