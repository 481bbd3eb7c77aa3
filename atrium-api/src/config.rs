//! Service Configuration Module
//!
//! Process-level settings: bind address, logging, quota and TTL overrides and
//! the cache backend choice. Loaded from `ATRIUM_*` environment variables
//! with defaults suitable for development.

use crate::audit::DEFAULT_AUDIT_QUEUE_CAPACITY;
use crate::error::{ApiError, ApiResult};
use atrium_core::AtriumConfig;
use atrium_storage::cache::{CacheBackend, LmdbCacheBackend, MemoryCacheBackend};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// CACHE BACKEND SELECTION
// ============================================================================

/// Which key-value store backs the resource cache.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CacheBackendConfig {
    /// Process-local map.
    #[default]
    Memory,
    /// Memory-mapped LMDB environment at `path`.
    Lmdb { path: PathBuf, max_size_mb: usize },
}

impl CacheBackendConfig {
    /// Open the configured backend.
    pub fn build(&self) -> ApiResult<Arc<dyn CacheBackend>> {
        match self {
            CacheBackendConfig::Memory => Ok(Arc::new(MemoryCacheBackend::new())),
            CacheBackendConfig::Lmdb { path, max_size_mb } => {
                let backend = LmdbCacheBackend::new(path, *max_size_mb).map_err(|e| {
                    ApiError::internal_error(format!("Failed to open LMDB cache: {}", e))
                })?;
                Ok(Arc::new(backend))
            }
        }
    }
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// Settings for one service process.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Address an external transport binds to.
    pub host: String,

    pub port: u16,

    /// Default filter directive when `RUST_LOG` is unset.
    pub log_level: String,

    /// Emit JSON log lines instead of the pretty format.
    pub log_json: bool,

    /// Hand audit entries to a background writer instead of awaiting them.
    pub audit_background: bool,

    /// Entries the background audit writer may have queued at once.
    pub audit_queue_capacity: usize,

    /// Quotas, TTL, retention floor and page sizes.
    pub core: AtriumConfig,

    pub cache: CacheBackendConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8084,
            log_level: "info".to_string(),
            log_json: false,
            audit_background: false,
            audit_queue_capacity: DEFAULT_AUDIT_QUEUE_CAPACITY,
            core: AtriumConfig::default(),
            cache: CacheBackendConfig::Memory,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `ATRIUM_HOST` / `ATRIUM_PORT`: bind address (default: 0.0.0.0:8084)
    /// - `ATRIUM_LOG_LEVEL`: default log filter (default: info)
    /// - `ATRIUM_LOG_JSON`: "true" for JSON logs (default: false)
    /// - `ATRIUM_AUDIT_BACKGROUND`: "true" to write audit entries off the request path
    /// - `ATRIUM_AUDIT_QUEUE_CAPACITY`: background audit queue size (default: 1024)
    /// - `ATRIUM_MAX_WORKSPACES_PER_TENANT` (default: 10)
    /// - `ATRIUM_MAX_PROJECTS_PER_WORKSPACE` (default: 50)
    /// - `ATRIUM_CACHE_TTL_SECS` (default: 300)
    /// - `ATRIUM_CACHE_BACKEND`: "memory" or "lmdb" (default: memory)
    /// - `ATRIUM_CACHE_PATH` / `ATRIUM_CACHE_MAX_MB`: LMDB location and map size
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let core_defaults = AtriumConfig::default();

        let flag = |key: &str, default: bool| {
            var(key)
                .map(|s| matches!(s.trim().to_lowercase().as_str(), "true" | "1"))
                .unwrap_or(default)
        };

        let core = AtriumConfig {
            max_workspaces_per_tenant: var("ATRIUM_MAX_WORKSPACES_PER_TENANT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(core_defaults.max_workspaces_per_tenant),
            max_projects_per_workspace: var("ATRIUM_MAX_PROJECTS_PER_WORKSPACE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(core_defaults.max_projects_per_workspace),
            cache_ttl: var("ATRIUM_CACHE_TTL_SECS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(core_defaults.cache_ttl),
            ..core_defaults
        };

        let cache = match var("ATRIUM_CACHE_BACKEND")
            .map(|s| s.trim().to_lowercase())
            .as_deref()
        {
            Some("lmdb") => CacheBackendConfig::Lmdb {
                path: var("ATRIUM_CACHE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./atrium-cache")),
                max_size_mb: var("ATRIUM_CACHE_MAX_MB")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(256),
            },
            _ => CacheBackendConfig::Memory,
        };

        Self {
            host: var("ATRIUM_HOST").unwrap_or(defaults.host),
            port: var("ATRIUM_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            log_level: var("ATRIUM_LOG_LEVEL").unwrap_or(defaults.log_level),
            log_json: flag("ATRIUM_LOG_JSON", defaults.log_json),
            audit_background: flag("ATRIUM_AUDIT_BACKGROUND", defaults.audit_background),
            audit_queue_capacity: var("ATRIUM_AUDIT_QUEUE_CAPACITY")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.audit_queue_capacity),
            core,
            cache,
        }
    }

    /// `host:port` for the transport listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> ApiResult<()> {
        self.core.validate()?;
        if let CacheBackendConfig::Lmdb { max_size_mb: 0, .. } = self.cache {
            return Err(ApiError::invalid_input("ATRIUM_CACHE_MAX_MB must be positive"));
        }
        if self.audit_queue_capacity == 0 {
            return Err(ApiError::invalid_input(
                "ATRIUM_AUDIT_QUEUE_CAPACITY must be positive",
            ));
        }
        Ok(())
    }
}
