//! Filtering, ordering and paging helpers for the in-memory store.
//!
//! These mirror the SQL the Postgres store issues: a case-insensitive
//! substring search, a closed set of sort columns with the entity ID as a
//! tie-breaker, and `LIMIT/OFFSET` paging over the filtered set.

use atrium_core::{
    Connection, EntityIdType, PageRequest, Project, Sort, SortField, SortOrder, Timestamp,
    Workspace,
};
use std::cmp::Ordering;
use uuid::Uuid;

/// Columns a sortable entity exposes.
pub(crate) trait Sortable {
    fn sort_id(&self) -> Uuid;
    fn created_at(&self) -> Timestamp;
    fn updated_at(&self) -> Timestamp;
    fn name(&self) -> &str;
}

impl Sortable for Workspace {
    fn sort_id(&self) -> Uuid {
        self.id.as_uuid()
    }
    fn created_at(&self) -> Timestamp {
        self.created_at
    }
    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }
    fn name(&self) -> &str {
        &self.name
    }
}

impl Sortable for Project {
    fn sort_id(&self) -> Uuid {
        self.id.as_uuid()
    }
    fn created_at(&self) -> Timestamp {
        self.created_at
    }
    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }
    fn name(&self) -> &str {
        &self.name
    }
}

impl Sortable for Connection {
    fn sort_id(&self) -> Uuid {
        self.id.as_uuid()
    }
    fn created_at(&self) -> Timestamp {
        self.created_at
    }
    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }
    fn name(&self) -> &str {
        &self.name
    }
}

fn compare<T: Sortable>(a: &T, b: &T, sort: Sort) -> Ordering {
    let primary = match sort.field {
        SortField::CreatedAt => a.created_at().cmp(&b.created_at()),
        SortField::UpdatedAt => a.updated_at().cmp(&b.updated_at()),
        SortField::Name => a.name().cmp(b.name()),
    };
    let ordering = primary.then_with(|| a.sort_id().cmp(&b.sort_id()));
    match sort.order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

/// Sort in place; ties on the sort column are broken by ID in the same direction.
pub(crate) fn sort_by<T: Sortable>(items: &mut [T], sort: Sort) {
    items.sort_by(|a, b| compare(a, b, sort));
}

/// True when any haystack contains the (already lowercased) needle.
pub(crate) fn matches_search(needle: Option<&str>, haystacks: &[&str]) -> bool {
    match needle {
        None => true,
        Some(needle) => haystacks
            .iter()
            .any(|hay| hay.to_lowercase().contains(needle)),
    }
}

/// Slice one page out of an ordered result set. Returns the page and the total.
pub(crate) fn paginate<T>(items: Vec<T>, page: PageRequest) -> (Vec<T>, u64) {
    let total = items.len() as u64;
    let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
    let limit = usize::try_from(page.limit()).unwrap_or(usize::MAX);
    let items = items.into_iter().skip(offset).take(limit).collect();
    (items, total)
}
