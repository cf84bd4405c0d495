//! Total-count-consistent pagination for read-model queries.

use serde::{Deserialize, Serialize};

/// Pagination parameters (0-based page index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 0, size: 20 }
    }
}

impl PageRequest {
    pub fn new(page: Option<u32>, size: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(0),
            // Cap page size to keep responses bounded.
            size: size.unwrap_or(20).clamp(1, 1000),
        }
    }
}

/// One page of a filtered result set. `total_elements` and `total_pages`
/// reflect the filtered set, not the unfiltered one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_elements: u64,
    pub total_pages: u32,
    pub current_page: u32,
}

impl<T> Page<T> {
    pub fn empty(request: PageRequest) -> Self {
        Self {
            items: Vec::new(),
            total_elements: 0,
            total_pages: 0,
            current_page: request.page,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total_elements: self.total_elements,
            total_pages: self.total_pages,
            current_page: self.current_page,
        }
    }
}

/// Slice an already-filtered, already-sorted result set into one page.
pub fn paginate<T>(items: Vec<T>, request: PageRequest) -> Page<T> {
    let total_elements = items.len() as u64;
    let size = request.size.max(1) as u64;
    let total_pages = total_elements.div_ceil(size) as u32;

    let start = (request.page as u64).saturating_mul(size) as usize;
    let page_items: Vec<T> = items
        .into_iter()
        .skip(start)
        .take(size as usize)
        .collect();

    Page {
        items: page_items,
        total_elements,
        total_pages,
        current_page: request.page,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn pages_cover_the_set_exactly_once() {
        let items: Vec<u32> = (0..23).collect();
        let size = 5;

        let mut seen = Vec::new();
        let total_pages = paginate(items.clone(), PageRequest { page: 0, size }).total_pages;
        for page in 0..total_pages {
            let p = paginate(items.clone(), PageRequest { page, size });
            assert_eq!(p.current_page, page);
            assert_eq!(p.total_elements, 23);
            seen.extend(p.items);
        }

        assert_eq!(seen, items);
    }

    #[test]
    fn out_of_range_page_is_empty_but_keeps_totals() {
        let items: Vec<u32> = (0..3).collect();
        let p = paginate(items, PageRequest { page: 9, size: 10 });

        assert!(p.items.is_empty());
        assert_eq!(p.total_elements, 3);
        assert_eq!(p.total_pages, 1);
        assert_eq!(p.current_page, 9);
    }

    proptest! {
        /// Sum of page sizes equals total_elements; no element repeats.
        #[test]
        fn pagination_invariant(len in 0usize..200, size in 1u32..17) {
            let items: Vec<usize> = (0..len).collect();
            let total_pages =
                paginate(items.clone(), PageRequest { page: 0, size }).total_pages;

            let mut seen = Vec::new();
            for page in 0..total_pages {
                seen.extend(paginate(items.clone(), PageRequest { page, size }).items);
            }

            prop_assert_eq!(seen.len() as u64, len as u64);
            prop_assert_eq!(seen, items);
        }
    }
}
