//! Storage module for persisting fingerprints between runs
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - Run tracking
//! - Per-site fingerprint persistence used to seed the dedup index

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteFingerprintStore;
pub use traits::{FingerprintStore, StorageError, StorageResult};

use crate::dedup::Fingerprint;
use std::path::Path;

/// Opens (or creates) a fingerprint database
pub fn open_store(path: &Path) -> StorageResult<SqliteFingerprintStore> {
    SqliteFingerprintStore::new(path)
}

/// A primary fingerprint to persist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFingerprint {
    pub post_id: String,
    pub fingerprint: Fingerprint,
    pub local_path: Option<String>,
}

/// Represents a harvest run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub site: String,
    pub search_tags: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a harvest run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_roundtrip() {
        for status in &[
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Interrupted,
            RunStatus::Failed,
        ] {
            let db_str = status.to_db_string();
            let parsed = RunStatus::from_db_string(db_str);
            assert_eq!(Some(*status), parsed);
        }
    }

    #[test]
    fn test_run_status_invalid() {
        assert_eq!(RunStatus::from_db_string("invalid"), None);
    }
}
