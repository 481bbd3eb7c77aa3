//! ATRIUM API - Domain services for the Workspace → Project → Connection hierarchy
//!
//! Role-based authorization over workspace memberships, cache-aside reads
//! with invalidate-on-write, best-effort audit recording, quota enforcement
//! and the PostgreSQL store. Request parsing and the transport in front of
//! the services live elsewhere; callers hand in an already verified
//! [`AuthContext`].

pub mod audit;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod locks;
pub mod services;
pub mod telemetry;

// Re-export commonly used types
pub use audit::{AuditRecorder, DEFAULT_AUDIT_QUEUE_CAPACITY};
pub use auth::{check_tenant_access, require_role, AuthContext};
pub use config::{ApiConfig, CacheBackendConfig};
pub use db::{DbConfig, PgStore};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use locks::{KeyedGuard, KeyedLocks};
pub use services::{
    AuditService, ConnectionService, MemberService, ProjectService, ServiceContext, Services,
    WorkspaceService,
};
pub use telemetry::{init_tracing, AtriumMetrics, TelemetryConfig};
