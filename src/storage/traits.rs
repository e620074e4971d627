//! Storage traits and error types
//!
//! This module defines the trait interface for fingerprint persistence and
//! associated error types.

use crate::dedup::IndexEntry;
use crate::job::Site;
use crate::storage::{RunRecord, RunStatus, StoredFingerprint};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Corrupt stored value: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence for the dedup index across runs
///
/// Fingerprints are scoped per site. Loading returns them in the order they
/// were first saved, so a seeded index keeps the earliest-primary-wins rule
/// across runs.
pub trait FingerprintStore {
    // ===== Run Management =====

    /// Records the start of a run and returns its id
    fn create_run(&mut self, site: Site, search_tags: &str, config_hash: &str)
        -> StorageResult<i64>;

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Marks a run as finished with the given status
    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    // ===== Fingerprints =====

    /// Loads every stored primary for a site, oldest first
    fn load_fingerprints(&self, site: Site) -> StorageResult<Vec<IndexEntry>>;

    /// Saves new primaries; posts already stored for the site are skipped
    ///
    /// Returns the number of rows inserted.
    fn save_fingerprints(
        &mut self,
        site: Site,
        run_id: Option<i64>,
        entries: &[StoredFingerprint],
    ) -> StorageResult<usize>;

    fn count_fingerprints(&self, site: Site) -> StorageResult<u64>;
}
