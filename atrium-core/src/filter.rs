//! Listing filters, sorting and pagination

use crate::{
    AuditAction, ProjectId, ProjectStatus, ResourceKind, TenantId, UserId, ValidationError,
    WorkspaceId,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Page size used when the caller does not pick one.
pub const DEFAULT_PAGE_SIZE: u32 = 20;
/// Upper bound on any page size.
pub const MAX_PAGE_SIZE: u32 = 100;
/// Page size used for audit listings when the caller does not pick one.
pub const AUDIT_DEFAULT_PAGE_SIZE: u32 = 50;

// ============================================================================
// PAGINATION
// ============================================================================

/// Normalized page request.
///
/// `page` is 1-based. A page of 0 becomes 1, a page size of 0 falls back to
/// the default and anything above [`MAX_PAGE_SIZE`] is capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self::with_default(page, page_size, DEFAULT_PAGE_SIZE)
    }

    pub fn with_default(page: u32, page_size: u32, default_size: u32) -> Self {
        let page_size = match page_size {
            0 => default_size.clamp(1, MAX_PAGE_SIZE),
            n => n.min(MAX_PAGE_SIZE),
        };
        Self {
            page: page.max(1),
            page_size,
        }
    }

    /// Number of records to skip.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE)
    }
}

/// `ceil(total / page_size)`; zero records means zero pages.
pub fn total_pages(total: u64, page_size: u32) -> u32 {
    if page_size == 0 {
        return 0;
    }
    let pages = total.div_ceil(u64::from(page_size));
    u32::try_from(pages).unwrap_or(u32::MAX)
}

/// One page of results plus the counters callers need to render paging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        Self {
            items,
            total,
            page: request.page,
            page_size: request.page_size,
            total_pages: total_pages(total, request.page_size),
        }
    }

    pub fn empty(request: PageRequest) -> Self {
        Self::new(Vec::new(), 0, request)
    }

    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
            total_pages: self.total_pages,
        }
    }
}

// ============================================================================
// SORTING
// ============================================================================

/// Sortable columns. A closed set so that no caller text reaches a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Name,
}

impl SortField {
    pub fn as_column(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
            SortField::Name => "name",
        }
    }
}

impl FromStr for SortField {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created_at" => Ok(SortField::CreatedAt),
            "updated_at" => Ok(SortField::UpdatedAt),
            "name" => Ok(SortField::Name),
            _ => Err(ValidationError::InvalidValue {
                field: "sort_by".to_string(),
                reason: format!("cannot sort by '{}'", s),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    /// Anything other than `asc` (any case) sorts descending.
    pub fn parse_lenient(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("asc") {
            SortOrder::Asc
        } else {
            SortOrder::Desc
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Sort specification, `created_at DESC` by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Sort {
    pub field: SortField,
    pub order: SortOrder,
}

impl Sort {
    pub fn new(field: SortField, order: SortOrder) -> Self {
        Self { field, order }
    }
}

// ============================================================================
// FILTERS
// ============================================================================

/// Filter for workspace listings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkspaceFilter {
    pub tenant_id: Option<TenantId>,
    pub created_by: Option<UserId>,
    /// Restrict to these workspaces (visibility set).
    pub ids: Option<Vec<WorkspaceId>>,
    /// Case-insensitive substring over name and description.
    pub search: Option<String>,
    pub include_deleted: bool,
    pub sort: Sort,
    pub page: PageRequest,
}

/// Filter for project listings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProjectFilter {
    pub workspace_id: Option<WorkspaceId>,
    /// Restrict to projects in these workspaces (visibility set).
    pub workspace_ids: Option<Vec<WorkspaceId>>,
    pub status: Option<ProjectStatus>,
    pub created_by: Option<UserId>,
    pub search: Option<String>,
    pub include_deleted: bool,
    pub sort: Sort,
    pub page: PageRequest,
}

/// Filter for connection listings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConnectionFilter {
    pub project_id: Option<ProjectId>,
    pub sync_enabled: Option<bool>,
    /// Case-insensitive substring over name, description and base id.
    pub search: Option<String>,
    pub include_deleted: bool,
    pub sort: Sort,
    pub page: PageRequest,
}

/// Filter for audit listings. Entries are always ordered by creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogFilter {
    pub workspace_id: Option<WorkspaceId>,
    pub user_id: Option<UserId>,
    pub action: Option<AuditAction>,
    pub resource_type: Option<ResourceKind>,
    pub resource_id: Option<String>,
    pub order: SortOrder,
    pub page: PageRequest,
}

impl Default for AuditLogFilter {
    fn default() -> Self {
        Self {
            workspace_id: None,
            user_id: None,
            action: None,
            resource_type: None,
            resource_id: None,
            order: SortOrder::Desc,
            page: PageRequest::with_default(1, 0, AUDIT_DEFAULT_PAGE_SIZE),
        }
    }
}

impl AuditLogFilter {
    pub fn for_workspace(workspace_id: WorkspaceId) -> Self {
        Self {
            workspace_id: Some(workspace_id),
            ..Self::default()
        }
    }
}

/// Normalized search needle: trimmed, lowercased, `None` when blank.
pub fn normalize_search(search: Option<&str>) -> Option<String> {
    search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
}
