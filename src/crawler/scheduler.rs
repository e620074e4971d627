//! Crawl scheduler: the pagination state machine
//!
//! The scheduler owns the crawl state for one job and walks listing pages
//! strictly one at a time:
//!
//! ```text
//! Idle -> FetchingPage -> Extracting -> Throttling -> NextPage -> FetchingPage ...
//!                \                          |
//!                 `-> Throttling (page failed)   `-> Done | Failed
//! ```
//!
//! Each successfully extracted page is handed to the consumer as a
//! [`PageBatch`] over a bounded channel. Sending blocks while the consumer is
//! busy, so the crawl never runs ahead of the download pipeline by more than
//! one page.

use crate::config::CrawlerConfig;
use crate::crawler::extractor::{extractor_for, ExtractionError, PostExtractor};
use crate::crawler::fetcher::{FetchError, FetchedPage, PageFetcher, RenderHints};
use crate::crawler::governor::{Observation, RateGovernor, RetryPolicy, Severity, ThrottlePolicy};
use crate::job::CrawlJob;
use crate::state::{CrawlPhase, CrawlState, PostRecord, TerminationReason};
use crate::{HarvestError, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Terminal page failures in a row that end the crawl
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Records extracted from one listing page
#[derive(Debug, Clone)]
pub struct PageBatch {
    pub page_number: u32,
    pub page_url: Url,
    pub records: Vec<PostRecord>,
    pub errors: Vec<ExtractionError>,
}

/// Final result of a scheduler run
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    pub phase: CrawlPhase,
    pub reason: TerminationReason,
    pub state: CrawlState,
}

impl CrawlOutcome {
    pub fn is_failed(&self) -> bool {
        self.phase == CrawlPhase::Failed
    }
}

enum PageFetch {
    Fetched(FetchedPage),
    Failed(FetchError),
    Cancelled,
}

/// Drives the pagination state machine for a single job
pub struct CrawlScheduler {
    job: Arc<CrawlJob>,
    fetcher: Arc<dyn PageFetcher>,
    extractor: Box<dyn PostExtractor>,
    governor: RateGovernor,
    retry: RetryPolicy,
    hints: RenderHints,
    state: CrawlState,
    phase: CrawlPhase,
    cancel: CancellationToken,
}

impl CrawlScheduler {
    pub fn new(
        job: Arc<CrawlJob>,
        config: &CrawlerConfig,
        fetcher: Arc<dyn PageFetcher>,
        cancel: CancellationToken,
    ) -> Self {
        let policy = ThrottlePolicy::from_config(job.delay_floor(), config);
        let retry = RetryPolicy::new(config.page_retries, config.retry_backoff(), config.max_delay());

        Self {
            extractor: extractor_for(job.site()),
            governor: RateGovernor::new(policy),
            retry,
            hints: RenderHints::default(),
            state: CrawlState::new(job.start_page()),
            phase: CrawlPhase::Idle,
            job,
            fetcher,
            cancel,
        }
    }

    pub fn phase(&self) -> CrawlPhase {
        self.phase
    }

    pub fn state(&self) -> &CrawlState {
        &self.state
    }

    /// Runs the crawl to completion, sending one batch per extracted page
    ///
    /// Returns an error only for internal faults (an unbuildable search URL
    /// or an illegal phase transition); every crawl-level ending, including
    /// too many failures, is reported through [`CrawlOutcome`].
    pub async fn run(mut self, tx: mpsc::Sender<PageBatch>) -> Result<CrawlOutcome> {
        let terms = self.job.search_terms();
        tracing::info!(
            "Starting {} crawl for '{}' at page {}",
            self.job.site(),
            terms,
            self.job.start_page()
        );

        self.transition(CrawlPhase::FetchingPage)?;

        loop {
            let page = self.state.current_page;
            self.state.pages_attempted += 1;
            let url = self
                .extractor
                .search_url(self.job.base_url(), &terms, page)?;
            tracing::info!("Fetching page {}: {}", page, url);

            let mut candidates = None;
            match self.fetch_with_retries(&url).await {
                PageFetch::Fetched(fetched) => {
                    self.transition(CrawlPhase::Extracting)?;

                    let mut extraction =
                        self.extractor
                            .extract(&fetched.content, &fetched.final_url, page);
                    candidates = Some(extraction.candidate_count());
                    extraction.truncate(self.job.images_per_page());

                    let records = extraction.records.len();
                    let errors = extraction.errors.len();
                    self.state.record_page_success(records, errors);

                    if records == 0 {
                        tracing::warn!(
                            "Page {} yielded no usable posts ({} extraction errors)",
                            page,
                            errors
                        );
                    } else {
                        tracing::info!(
                            "Page {}: {} posts, {} extraction errors",
                            page,
                            records,
                            errors
                        );
                    }

                    let batch = PageBatch {
                        page_number: page,
                        page_url: fetched.final_url,
                        records: extraction.records,
                        errors: extraction.errors,
                    };
                    if tx.send(batch).await.is_err() {
                        tracing::warn!("Record consumer closed, stopping crawl");
                        return self.finish(TerminationReason::Cancelled);
                    }

                    self.transition(CrawlPhase::Throttling)?;
                }
                PageFetch::Failed(error) => {
                    self.state.record_page_failure();
                    tracing::warn!(
                        "Page {} failed ({} consecutive): {}",
                        page,
                        self.state.consecutive_failures,
                        error
                    );

                    if self.state.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        return self.finish(TerminationReason::TooManyFailures);
                    }
                    self.transition(CrawlPhase::Throttling)?;
                }
                PageFetch::Cancelled => {
                    return self.finish(TerminationReason::Cancelled);
                }
            }

            if let Some(reason) = self.end_condition(page, candidates) {
                return self.finish(reason);
            }

            let delay = self.governor.next_delay();
            tracing::debug!("Waiting {:?} before the next page", delay);
            if !self.sleep(delay).await {
                return self.finish(TerminationReason::Cancelled);
            }
            self.state.add_delay(delay);

            self.transition(CrawlPhase::NextPage)?;
            self.state.current_page += 1;
            self.transition(CrawlPhase::FetchingPage)?;
        }
    }

    /// Fetches one page, retrying retryable failures with backoff
    async fn fetch_with_retries(&mut self, url: &Url) -> PageFetch {
        let mut attempt = 0;
        loop {
            if self.cancel.is_cancelled() {
                return PageFetch::Cancelled;
            }

            let started = Instant::now();
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return PageFetch::Cancelled,
                result = self.fetcher.fetch(url, &self.hints) => result,
            };
            let latency = started.elapsed();

            let error = match result {
                Ok(page) => {
                    self.governor
                        .observe(Observation::new(latency, Some(page.status)));
                    return PageFetch::Fetched(page);
                }
                Err(error) => error,
            };

            self.governor.observe(Observation::new(latency, error.status()));

            if !error.is_retryable() || attempt >= self.retry.max_retries {
                return PageFetch::Failed(error);
            }

            let severity = if error.is_blocked() || error.status() == Some(429) {
                Severity::Extended
            } else {
                Severity::Normal
            };
            let wait = self.retry.backoff(attempt, severity);
            tracing::warn!(
                "Fetch attempt {} for {} failed: {}; retrying in {:?}",
                attempt + 1,
                url,
                error,
                wait
            );

            if !self.sleep(wait).await {
                return PageFetch::Cancelled;
            }
            self.state.add_delay(wait);
            attempt += 1;
        }
    }

    /// Checks the stop conditions after a page has been handled
    fn end_condition(&self, page: u32, candidates: Option<usize>) -> Option<TerminationReason> {
        if self.cancel.is_cancelled() {
            return Some(TerminationReason::Cancelled);
        }

        if candidates == Some(0) && page != self.job.start_page() {
            return Some(TerminationReason::EndOfResults);
        }

        match self.job.max_pages() {
            Some(max) if self.state.pages_attempted >= max => {
                Some(TerminationReason::MaxPagesReached)
            }
            _ => None,
        }
    }

    /// Sleeps unless cancelled first; returns false on cancellation
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    fn transition(&mut self, next: CrawlPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(HarvestError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        tracing::trace!("Crawl phase {} -> {}", self.phase, next);
        self.phase = next;
        Ok(())
    }

    fn finish(&mut self, reason: TerminationReason) -> Result<CrawlOutcome> {
        self.transition(reason.terminal_phase())?;
        self.state.termination = Some(reason);

        tracing::info!(
            "Crawl {} ({}): {} pages fetched, {} records emitted, {} pages failed",
            self.phase,
            reason,
            self.state.pages_fetched,
            self.state.records_emitted,
            self.state.failed_pages.len()
        );

        Ok(CrawlOutcome {
            phase: self.phase,
            reason,
            state: self.state.clone(),
        })
    }
}
