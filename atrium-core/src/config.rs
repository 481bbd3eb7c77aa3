//! Static limits and windows of the workspace core.

use crate::filter::{AUDIT_DEFAULT_PAGE_SIZE, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ceilings, cache TTL and retention floor used by the domain services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtriumConfig {
    /// Non-deleted workspaces a tenant may own.
    pub max_workspaces_per_tenant: u64,
    /// Non-deleted projects a workspace may own.
    pub max_projects_per_workspace: u64,
    /// Lifetime of every cache entry.
    pub cache_ttl: Duration,
    /// Audit entries younger than this are never purged.
    pub audit_min_retention_days: u32,
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub audit_default_page_size: u32,
}

impl Default for AtriumConfig {
    fn default() -> Self {
        Self {
            max_workspaces_per_tenant: 10,
            max_projects_per_workspace: 50,
            cache_ttl: Duration::from_secs(5 * 60),
            audit_min_retention_days: 30,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            audit_default_page_size: AUDIT_DEFAULT_PAGE_SIZE,
        }
    }
}

impl AtriumConfig {
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_workspace_quota(mut self, max: u64) -> Self {
        self.max_workspaces_per_tenant = max;
        self
    }

    pub fn with_project_quota(mut self, max: u64) -> Self {
        self.max_projects_per_workspace = max;
        self
    }

    /// Effective retention for a purge request: never below the floor.
    pub fn effective_retention_days(&self, requested: u32) -> u32 {
        requested.max(self.audit_min_retention_days)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workspaces_per_tenant == 0 {
            return Err(invalid("max_workspaces_per_tenant", "0", "must be positive"));
        }
        if self.max_projects_per_workspace == 0 {
            return Err(invalid("max_projects_per_workspace", "0", "must be positive"));
        }
        if self.cache_ttl.is_zero() {
            return Err(invalid("cache_ttl", "0s", "must be positive"));
        }
        if self.max_page_size == 0 || self.max_page_size > MAX_PAGE_SIZE {
            return Err(invalid(
                "max_page_size",
                &self.max_page_size.to_string(),
                "must be within 1..=100",
            ));
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(invalid(
                "default_page_size",
                &self.default_page_size.to_string(),
                "must be within 1..=max_page_size",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
