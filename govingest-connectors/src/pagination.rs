//! Pagination bookkeeping shared by the web table and paged API connectors.
//!
//! Two loop guards apply to every paginated run: a hard page limit and, for
//! link-following, a set of visited URLs so a self-referential "next" link
//! terminates instead of looping.

use std::collections::HashSet;
use tracing::warn;

/// Why pagination stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The configured page limit was reached.
    PageLimit,
    /// The next link pointed at a page already fetched.
    Revisit,
}

/// State of one paginated run.
#[derive(Debug)]
pub struct PaginationState {
    max_pages: usize,
    pages_fetched: usize,
    visited: HashSet<String>,
}

impl PaginationState {
    pub fn new(max_pages: usize) -> Self {
        Self {
            max_pages: max_pages.max(1),
            pages_fetched: 0,
            visited: HashSet::new(),
        }
    }

    /// Record a fetched page, identified by its URL (or URL plus page number).
    pub fn record_page(&mut self, key: &str) {
        self.pages_fetched += 1;
        self.visited.insert(key.to_string());
    }

    /// Mark another URL (e.g. the post-redirect location) as the same page.
    pub fn record_page_alias(&mut self, key: &str) {
        self.visited.insert(key.to_string());
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    /// Decide whether to continue to `next`. Returns the stop reason if not.
    pub fn check_next(&self, source_name: &str, next: &str) -> Option<StopReason> {
        if self.visited.contains(next) {
            warn!(
                source = source_name,
                url = next,
                "Next page already visited, stopping pagination"
            );
            return Some(StopReason::Revisit);
        }
        self.check_limit(source_name)
    }

    /// Stop once the page limit has been reached.
    pub fn check_limit(&self, source_name: &str) -> Option<StopReason> {
        if self.pages_fetched >= self.max_pages {
            warn!(
                source = source_name,
                max_pages = self.max_pages,
                "Page limit reached, stopping pagination"
            );
            return Some(StopReason::PageLimit);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revisit_detected() {
        let mut state = PaginationState::new(10);
        state.record_page("https://x.gov/p1");
        assert_eq!(
            state.check_next("src", "https://x.gov/p1"),
            Some(StopReason::Revisit)
        );
        assert_eq!(state.check_next("src", "https://x.gov/p2"), None);
    }

    #[test]
    fn test_page_limit() {
        let mut state = PaginationState::new(2);
        state.record_page("a");
        assert_eq!(state.check_limit("src"), None);
        state.record_page("b");
        assert_eq!(state.check_limit("src"), Some(StopReason::PageLimit));
        assert_eq!(state.pages_fetched(), 2);
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        assert_eq!(PaginationState::new(0).max_pages(), 1);
    }
}
