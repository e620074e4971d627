//! Crawler module for listing pages and post extraction
//!
//! This module contains the core crawling logic, including:
//! - Page fetching behind the [`PageFetcher`] seam
//! - Adaptive throttling and retry backoff
//! - Per-site post extraction
//! - The pagination state machine and overall job coordination

mod coordinator;
pub mod extractor;
mod fetcher;
mod governor;
mod scheduler;

pub use coordinator::{run_job, Coordinator};
pub use extractor::{extractor_for, Extraction, ExtractionError, ExtractionErrorKind, PostExtractor};
pub use fetcher::{
    build_http_client, classify_status, FetchError, FetchedPage, HttpPageFetcher, PageFetcher,
    RenderHints,
};
pub use governor::{Observation, RateGovernor, RetryPolicy, Severity, ThrottlePolicy};
pub use scheduler::{CrawlOutcome, CrawlScheduler, PageBatch, MAX_CONSECUTIVE_FAILURES};
