//! The result of one crawl job

use crate::crawler::{CrawlOutcome, ExtractionError};
use crate::download::DownloadFailure;
use crate::job::Site;
use crate::state::PostRecord;
use chrono::{DateTime, Utc};

/// A post that did not produce an image, with the reason
#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub post_id: Option<String>,
    pub page_number: u32,
    pub kind: String,
    pub message: String,

    /// The record as extracted, when extraction got that far
    pub record: Option<PostRecord>,
}

impl ItemFailure {
    pub fn from_download(failure: DownloadFailure) -> Self {
        Self {
            post_id: Some(failure.record.post_id.clone()),
            page_number: failure.record.page_number,
            kind: failure.error.kind().to_string(),
            message: failure.error.to_string(),
            record: Some(failure.record),
        }
    }

    pub fn from_extraction(error: &ExtractionError) -> Self {
        Self {
            post_id: error.post_id.clone(),
            page_number: error.page,
            kind: error.kind.as_str().to_string(),
            message: error.to_string(),
            record: None,
        }
    }
}

/// Everything a crawl job produced
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub site: Site,
    pub search_tags: String,

    /// Processed records in extraction order, unique and duplicate alike
    pub records: Vec<PostRecord>,

    /// Extraction and download failures
    pub failures: Vec<ItemFailure>,

    /// Images skipped for being below the minimum size
    pub filtered: Vec<ItemFailure>,

    pub outcome: CrawlOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CrawlReport {
    /// Records stored on disk as unique images
    pub fn unique_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| !r.is_duplicate() && r.local_path().is_some())
            .count()
    }

    pub fn duplicate_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_duplicate()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// True when the job yielded no records at all
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn duplicates(&self) -> impl Iterator<Item = &PostRecord> {
        self.records.iter().filter(|r| r.is_duplicate())
    }
}
