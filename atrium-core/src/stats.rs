//! Aggregate statistics for a tenant.

use crate::{TenantId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Counters over a tenant's workspace hierarchy.
///
/// `total_workspaces` includes soft-deleted rows; every other counter only
/// covers non-deleted rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceStats {
    pub tenant_id: TenantId,
    pub total_workspaces: u64,
    pub active_workspaces: u64,
    pub total_projects: u64,
    pub active_projects: u64,
    pub total_connections: u64,
    pub projects_by_status: BTreeMap<String, u64>,
    pub last_updated: Timestamp,
}
