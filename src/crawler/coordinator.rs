//! Crawler coordinator - ties one job's stages together
//!
//! The coordinator:
//! - Seeds the dedup index (from the fingerprint store when one is configured)
//! - Runs the scheduler in its own task and consumes its page batches
//! - Pushes each batch through the download pool in extraction order
//! - Collects records and failures into the final [`CrawlReport`]

use crate::config::Config;
use crate::crawler::fetcher::{HttpPageFetcher, PageFetcher};
use crate::crawler::scheduler::{CrawlOutcome, CrawlScheduler, PageBatch};
use crate::dedup::{lock_index, DedupIndex, SharedIndex};
use crate::download::DownloadManager;
use crate::job::CrawlJob;
use crate::output::{CrawlReport, ItemFailure};
use crate::state::{PostRecord, TerminationReason};
use crate::storage::{open_store, FingerprintStore, RunStatus, SqliteFingerprintStore, StoredFingerprint};
use crate::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Accumulates per-item results while batches arrive
#[derive(Default)]
struct Collected {
    records: Vec<PostRecord>,
    failures: Vec<ItemFailure>,
    filtered: Vec<ItemFailure>,
}

/// Main coordinator for a single crawl job
pub struct Coordinator {
    job: Arc<CrawlJob>,
    config: Config,
    fetcher: Arc<dyn PageFetcher>,
    cancel: CancellationToken,
    store: Option<SqliteFingerprintStore>,
    config_hash: String,
}

impl Coordinator {
    /// Creates a coordinator, opening the fingerprint store if configured
    pub fn new(
        job: CrawlJob,
        config: Config,
        fetcher: Arc<dyn PageFetcher>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let store = match config.dedup.database_path.as_deref() {
            Some(path) => {
                tracing::info!("Using fingerprint database {}", path);
                Some(open_store(Path::new(path))?)
            }
            None => None,
        };

        Ok(Self {
            job: Arc::new(job),
            config,
            fetcher,
            cancel,
            store,
            config_hash: String::new(),
        })
    }

    /// Records the configuration file hash alongside the run
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = hash.into();
        self
    }

    /// Runs the job to completion
    pub async fn run(mut self) -> Result<CrawlReport> {
        let started_at = Utc::now();
        let search_tags = self.job.search_terms();

        let (index, run_id) = self.seed_index(&search_tags)?;
        let index = index.into_shared();
        let downloads =
            DownloadManager::new(&self.job, &self.config, index.clone(), self.cancel.clone())?;

        let (tx, mut rx) = mpsc::channel::<PageBatch>(1);
        let scheduler = CrawlScheduler::new(
            self.job.clone(),
            &self.config.crawler,
            self.fetcher.clone(),
            self.cancel.clone(),
        );
        let handle = tokio::spawn(scheduler.run(tx));

        let workers = self.config.downloads.workers.max(1);
        let mut collected = Collected::default();
        while let Some(batch) = rx.recv().await {
            process_batch(batch, &downloads, workers, &mut collected).await;
        }

        let outcome = handle.await??;

        if let (Some(store), Some(run_id)) = (self.store.as_mut(), run_id) {
            save_new_fingerprints(store, &self.job, run_id, &index, &collected.records)?;
            store.finish_run(run_id, run_status(&outcome))?;
        }

        let report = CrawlReport {
            site: self.job.site(),
            search_tags,
            records: collected.records,
            failures: collected.failures,
            filtered: collected.filtered,
            outcome,
            started_at,
            finished_at: Utc::now(),
        };
        log_summary(&report);

        Ok(report)
    }

    /// Builds the dedup index, seeding it from the store when present
    fn seed_index(&mut self, search_tags: &str) -> Result<(DedupIndex, Option<i64>)> {
        let threshold = self.job.hamming_threshold();
        let Some(store) = self.store.as_mut() else {
            return Ok((DedupIndex::new(threshold), None));
        };

        let site = self.job.site();
        let entries = store.load_fingerprints(site)?;
        tracing::info!(
            "Seeded dedup index with {} stored {} fingerprints",
            entries.len(),
            site
        );
        let run_id = store.create_run(site, search_tags, &self.config_hash)?;

        Ok((DedupIndex::with_entries(threshold, entries), Some(run_id)))
    }
}

/// Downloads and hashes a batch concurrently, then dedups and stores the
/// results one at a time in extraction order
async fn process_batch(
    batch: PageBatch,
    downloads: &DownloadManager,
    workers: usize,
    collected: &mut Collected,
) {
    tracing::debug!(
        "Processing {} records from page {}",
        batch.records.len(),
        batch.page_number
    );

    for error in &batch.errors {
        tracing::debug!("Extraction error: {}", error);
        collected.failures.push(ItemFailure::from_extraction(error));
    }

    let mut hashed = stream::iter(batch.records)
        .map(|record| downloads.fetch_and_hash(record))
        .buffered(workers);

    while let Some(result) = hashed.next().await {
        let result = match result {
            Ok(image) => downloads.finalize(image).await,
            Err(failure) => Err(failure),
        };

        match result {
            Ok(record) => {
                if let Some(original) = record.duplicate().original() {
                    tracing::debug!("Post {} duplicates post {}", record.post_id, original);
                }
                collected.records.push(record);
            }
            Err(failure) if !failure.error.is_failure() => {
                tracing::debug!("Post {} filtered: {}", failure.record.post_id, failure.error);
                collected.filtered.push(ItemFailure::from_download(failure));
            }
            Err(failure) => {
                tracing::warn!("Post {} failed: {}", failure.record.post_id, failure.error);
                collected.failures.push(ItemFailure::from_download(failure));
            }
        }
    }
}

/// Persists the primaries this run added to the index
fn save_new_fingerprints(
    store: &mut SqliteFingerprintStore,
    job: &CrawlJob,
    run_id: i64,
    index: &SharedIndex,
    records: &[PostRecord],
) -> Result<()> {
    let local_paths: HashMap<&str, String> = records
        .iter()
        .filter_map(|r| {
            r.local_path()
                .map(|p| (r.post_id.as_str(), p.display().to_string()))
        })
        .collect();

    let entries: Vec<StoredFingerprint> = lock_index(index)
        .new_entries()
        .iter()
        .map(|entry| StoredFingerprint {
            post_id: entry.post_id.clone(),
            fingerprint: entry.fingerprint,
            local_path: local_paths.get(entry.post_id.as_str()).cloned(),
        })
        .collect();

    let saved = store.save_fingerprints(job.site(), Some(run_id), &entries)?;
    tracing::info!("Saved {} new fingerprints", saved);
    Ok(())
}

fn run_status(outcome: &CrawlOutcome) -> RunStatus {
    if outcome.is_failed() {
        RunStatus::Failed
    } else if outcome.reason == TerminationReason::Cancelled {
        RunStatus::Interrupted
    } else {
        RunStatus::Completed
    }
}

fn log_summary(report: &CrawlReport) {
    let state = &report.outcome.state;
    if report.is_empty() {
        tracing::warn!(
            "0 items scraped for '{}': {} pages attempted, {} fetched, {} failed, {} extraction errors, {} download failures",
            report.search_tags,
            state.pages_attempted,
            state.pages_fetched,
            state.failed_pages.len(),
            state.extraction_errors,
            report.failure_count()
        );
        return;
    }

    tracing::info!(
        "Crawl finished ({}): {} unique stored, {} duplicates, {} filtered, {} failures",
        report.outcome.reason,
        report.unique_count(),
        report.duplicate_count(),
        report.filtered.len(),
        report.failure_count()
    );
}

/// Runs a complete job against the live site over HTTP
///
/// This is the main entry point for a crawl. It will:
/// 1. Build the HTTP page fetcher
/// 2. Seed the dedup index
/// 3. Walk listing pages and download their images
/// 4. Return the report for export
pub async fn run_job(job: CrawlJob, config: Config, cancel: CancellationToken) -> Result<CrawlReport> {
    let fetcher = HttpPageFetcher::new(&config.user_agent, config.crawler.fetch_timeout())?;
    Coordinator::new(job, config, Arc::new(fetcher), cancel)?
        .run()
        .await
}
