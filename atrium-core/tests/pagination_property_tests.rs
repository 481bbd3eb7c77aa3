//! Property-Based Tests for Pagination
//!
//! **Property 2: Page Normalization**
//!
//! For any requested page and page size, the normalized request SHALL have a
//! page >= 1 and a page size within [1, 100], and `total_pages` SHALL equal
//! ceil(total / page_size).

use atrium_core::{total_pages, Page, PageRequest, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_page_request_is_clamped(page in any::<u32>(), size in any::<u32>()) {
        let request = PageRequest::new(page, size);
        prop_assert!(request.page >= 1);
        prop_assert!(request.page_size >= 1 && request.page_size <= MAX_PAGE_SIZE);
        if size == 0 {
            prop_assert_eq!(request.page_size, DEFAULT_PAGE_SIZE);
        }
    }

    #[test]
    fn prop_total_pages_is_ceiling(total in 0u64..100_000, size in 1u32..=100) {
        let pages = u64::from(total_pages(total, size));
        prop_assert!(pages * u64::from(size) >= total);
        if total > 0 {
            prop_assert!((pages - 1) * u64::from(size) < total);
        } else {
            prop_assert_eq!(pages, 0);
        }
    }

    #[test]
    fn prop_offset_matches_page(page in 1u32..1000, size in 1u32..=100) {
        let request = PageRequest::new(page, size);
        prop_assert_eq!(request.offset(), u64::from(page - 1) * u64::from(size));
    }
}

#[test]
fn test_second_page_of_45() {
    let records: Vec<u32> = (1..=45).collect();
    let request = PageRequest::new(2, 20);
    let start = request.offset() as usize;
    let items = records[start..start + request.limit() as usize].to_vec();
    let page = Page::new(items, records.len() as u64, request);

    assert_eq!(page.items.first(), Some(&21));
    assert_eq!(page.items.last(), Some(&40));
    assert_eq!(page.total_pages, 3);
}
