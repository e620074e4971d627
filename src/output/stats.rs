//! Run statistics
//!
//! This module condenses a crawl report into counters and prints them as a
//! human-readable summary.

use crate::output::CrawlReport;
use std::collections::BTreeMap;
use std::time::Duration;

/// Crawl statistics summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlStatistics {
    /// Terminal phase and reason, e.g. `done (end-of-results)`
    pub outcome: String,

    pub pages_attempted: u32,
    pub pages_fetched: u32,
    pub pages_failed: usize,

    /// Records handed to the download pipeline
    pub records_emitted: u64,

    pub unique_stored: usize,
    pub duplicates: usize,

    /// Images below the minimum size
    pub filtered: usize,

    /// Failures by kind (extraction and download)
    pub failures_by_kind: BTreeMap<String, usize>,

    /// Politeness and backoff waits applied by the scheduler
    pub cumulative_delay: Duration,

    pub elapsed: Duration,
}

impl CrawlStatistics {
    pub fn from_report(report: &CrawlReport) -> Self {
        let mut failures_by_kind = BTreeMap::new();
        for failure in &report.failures {
            *failures_by_kind.entry(failure.kind.clone()).or_insert(0) += 1;
        }

        let state = &report.outcome.state;
        Self {
            outcome: format!("{} ({})", report.outcome.phase, report.outcome.reason),
            pages_attempted: state.pages_attempted,
            pages_fetched: state.pages_fetched,
            pages_failed: state.failed_pages.len(),
            records_emitted: state.records_emitted,
            unique_stored: report.unique_count(),
            duplicates: report.duplicate_count(),
            filtered: report.filtered.len(),
            failures_by_kind,
            cumulative_delay: state.cumulative_delay,
            elapsed: (report.finished_at - report.started_at)
                .to_std()
                .unwrap_or_default(),
        }
    }

    pub fn total_failures(&self) -> usize {
        self.failures_by_kind.values().sum()
    }
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Outcome: {}", stats.outcome);
    println!(
        "Elapsed: {:.1}s (waited {:.1}s between requests)",
        stats.elapsed.as_secs_f64(),
        stats.cumulative_delay.as_secs_f64()
    );
    println!();

    println!("Pages:");
    println!("  Attempted: {}", stats.pages_attempted);
    println!("  Fetched: {}", stats.pages_fetched);
    println!("  Failed: {}", stats.pages_failed);
    println!();

    println!("Images:");
    println!("  Records found: {}", stats.records_emitted);
    println!("  Unique stored: {}", stats.unique_stored);
    println!("  Duplicates: {}", stats.duplicates);
    println!("  Below minimum size: {}", stats.filtered);
    println!();

    if !stats.failures_by_kind.is_empty() {
        println!("Failures ({}):", stats.total_failures());
        let mut counts: Vec<_> = stats.failures_by_kind.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1));
        for (kind, count) in counts {
            println!("  {}: {}", kind, count);
        }
        println!();
    }

    let processed = stats.unique_stored + stats.duplicates;
    let duplicate_rate = if processed > 0 {
        (stats.duplicates as f64 / processed as f64) * 100.0
    } else {
        0.0
    };
    println!(
        "Duplicate Rate: {:.1}% ({} / {} images)",
        duplicate_rate, stats.duplicates, processed
    );
}
