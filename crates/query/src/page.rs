//! Result paging over the sorted, filtered superset.
//!
//! Paging always runs after cross-namespace merge, post-filters and sort:
//! `PageInfo` totals describe the whole result set, never one namespace's
//! share of it.

use serde::{Deserialize, Serialize};

/// Caller-requested page. Both fields must be non-zero for paging to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: usize,
    pub per_page: usize,
}

/// Derived paging metadata, recomputed on every list call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub total_results: usize,
    pub total_pages: usize,
    pub page_number: usize,
    pub page_size: usize,
}

impl PageInfo {
    /// The shape of an unpaged list: everything on one page.
    pub fn single_page(total: usize) -> Self {
        Self { total_results: total, total_pages: 1, page_number: 1, page_size: total }
    }
}

/// Slice out the requested page. Without an effective [`Pagination`] the
/// full set comes back as a single page. A page past the end yields an
/// empty record list with totals intact.
pub fn page_slice<T>(items: Vec<T>, paging: Option<Pagination>) -> (Vec<T>, PageInfo) {
    let Some(paging) = paging.filter(|p| p.page > 0 && p.per_page > 0) else {
        let info = PageInfo::single_page(items.len());
        return (items, info);
    };

    let total = items.len();
    let info = PageInfo {
        total_results: total,
        total_pages: total.div_ceil(paging.per_page).max(1),
        page_number: paging.page,
        page_size: paging.per_page,
    };
    let start = (paging.page - 1).saturating_mul(paging.per_page);
    let page: Vec<T> = items.into_iter().skip(start).take(paging.per_page).collect();
    (page, info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_paging_returns_single_page() {
        let (items, info) = page_slice(vec!["a", "b", "c"], None);
        assert_eq!(items, vec!["a", "b", "c"]);
        assert_eq!(info, PageInfo { total_results: 3, total_pages: 1, page_number: 1, page_size: 3 });
    }

    #[test]
    fn second_page_of_size_one() {
        let paging = Some(Pagination { page: 2, per_page: 1 });
        let (items, info) = page_slice(vec!["a", "b"], paging);
        assert_eq!(items, vec!["b"]);
        assert_eq!(info, PageInfo { total_results: 2, total_pages: 2, page_number: 2, page_size: 1 });
    }

    #[test]
    fn totals_ignore_requested_window() {
        let paging = Some(Pagination { page: 1, per_page: 2 });
        let (items, info) = page_slice(vec![1, 2, 3, 4, 5], paging);
        assert_eq!(items, vec![1, 2]);
        assert_eq!(info.total_results, 5);
        assert_eq!(info.total_pages, 3);
    }

    #[test]
    fn page_past_the_end_is_empty_with_totals() {
        let paging = Some(Pagination { page: 9, per_page: 2 });
        let (items, info) = page_slice(vec![1, 2, 3], paging);
        assert!(items.is_empty());
        assert_eq!(info.total_results, 3);
        assert_eq!(info.total_pages, 2);
        assert_eq!(info.page_number, 9);
    }

    #[test]
    fn empty_set_still_reports_one_page() {
        let paging = Some(Pagination { page: 1, per_page: 10 });
        let (items, info) = page_slice(Vec::<u8>::new(), paging);
        assert!(items.is_empty());
        assert_eq!(info, PageInfo { total_results: 0, total_pages: 1, page_number: 1, page_size: 10 });
    }
}
