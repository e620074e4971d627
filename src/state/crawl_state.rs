use crate::state::TerminationReason;
use std::time::Duration;

/// Scheduler-owned progress counters for one crawl job
///
/// Only the crawl scheduler mutates this; consumers receive a copy in the
/// final outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlState {
    /// Page number currently being worked on
    pub current_page: u32,

    /// Pages for which a fetch was started (retries of one page count once)
    pub pages_attempted: u32,

    /// Pages fetched successfully
    pub pages_fetched: u32,

    /// Post records handed to the download pipeline
    pub records_emitted: u64,

    /// Post entries dropped by the extractor
    pub extraction_errors: u64,

    /// Pages that failed terminally, in order
    pub failed_pages: Vec<u32>,

    /// Terminal page failures in a row
    pub consecutive_failures: u32,

    /// Total politeness and backoff wait applied
    pub cumulative_delay: Duration,

    /// Set once the crawl has stopped
    pub termination: Option<TerminationReason>,
}

impl CrawlState {
    /// Creates a new CrawlState positioned at `start_page`
    pub fn new(start_page: u32) -> Self {
        Self {
            current_page: start_page,
            pages_attempted: 0,
            pages_fetched: 0,
            records_emitted: 0,
            extraction_errors: 0,
            failed_pages: Vec::new(),
            consecutive_failures: 0,
            cumulative_delay: Duration::ZERO,
            termination: None,
        }
    }

    /// Records a successfully fetched page and its extraction result
    pub fn record_page_success(&mut self, records: usize, errors: usize) {
        self.pages_fetched += 1;
        self.records_emitted += records as u64;
        self.extraction_errors += errors as u64;
        self.consecutive_failures = 0;
    }

    /// Records a page that failed after exhausting its retries
    pub fn record_page_failure(&mut self) {
        self.failed_pages.push(self.current_page);
        self.consecutive_failures += 1;
    }

    pub fn add_delay(&mut self, delay: Duration) {
        self.cumulative_delay += delay;
    }

    pub fn is_terminated(&self) -> bool {
        self.termination.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_crawl_state() {
        let state = CrawlState::new(3);
        assert_eq!(state.current_page, 3);
        assert_eq!(state.pages_attempted, 0);
        assert_eq!(state.cumulative_delay, Duration::ZERO);
        assert!(!state.is_terminated());
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let mut state = CrawlState::new(1);
        state.record_page_failure();
        state.record_page_failure();
        assert_eq!(state.consecutive_failures, 2);
        assert_eq!(state.failed_pages, vec![1, 1]);

        state.record_page_success(20, 1);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.pages_fetched, 1);
        assert_eq!(state.records_emitted, 20);
        assert_eq!(state.extraction_errors, 1);
    }

    #[test]
    fn test_cumulative_delay() {
        let mut state = CrawlState::new(1);
        state.add_delay(Duration::from_millis(1500));
        state.add_delay(Duration::from_millis(500));
        assert_eq!(state.cumulative_delay, Duration::from_secs(2));
    }
}
