//! Near-duplicate index
//!
//! Fingerprints are kept in insertion order and matched with a linear scan.
//! Page-scale jobs hold hundreds to a few thousand entries, where a scan is
//! cheaper than maintaining buckets.

use crate::dedup::Fingerprint;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A primary (first seen) image in the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub fingerprint: Fingerprint,
    pub post_id: String,
}

/// A post that matched an earlier primary entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateEntry {
    pub post_id: String,
    pub fingerprint: Fingerprint,
    pub duplicate_of: String,
    pub distance: u32,
}

/// Fingerprint index for one crawl job
#[derive(Debug, Clone)]
pub struct DedupIndex {
    threshold: u32,
    entries: Vec<IndexEntry>,
    duplicates: Vec<DuplicateEntry>,
    /// Entries loaded from an earlier run; these precede everything inserted now
    seeded: usize,
}

/// Index shared between download workers; all access goes through the mutex
pub type SharedIndex = Arc<Mutex<DedupIndex>>;

impl DedupIndex {
    /// Creates an empty index with the given Hamming threshold
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            entries: Vec::new(),
            duplicates: Vec::new(),
            seeded: 0,
        }
    }

    /// Creates an index pre-populated with primaries from an earlier run
    ///
    /// Seeded entries keep their order and win over anything inserted later.
    pub fn with_entries(threshold: u32, entries: Vec<IndexEntry>) -> Self {
        let seeded = entries.len();
        Self {
            threshold,
            entries,
            duplicates: Vec::new(),
            seeded,
        }
    }

    /// Wraps the index for shared use
    pub fn into_shared(self) -> SharedIndex {
        Arc::new(Mutex::new(self))
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Number of primary entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Primaries inserted during this run (excludes seeded entries)
    pub fn new_entries(&self) -> &[IndexEntry] {
        &self.entries[self.seeded..]
    }

    /// Every duplicate observed, in the order it was reported
    pub fn duplicates(&self) -> &[DuplicateEntry] {
        &self.duplicates
    }

    /// Earliest primary within the threshold of `fingerprint`
    pub fn find_match(&self, fingerprint: &Fingerprint) -> Option<&IndexEntry> {
        self.entries
            .iter()
            .find(|entry| entry.fingerprint.is_near(fingerprint, self.threshold))
    }

    /// Matches `fingerprint` against all primaries and records the result
    ///
    /// Returns the id of the earliest matching primary, in which case `post_id`
    /// is recorded as its duplicate and no new primary is added. A match on an
    /// entry with the same id (seeded from an earlier run of the same job) is
    /// the post itself and yields `None`. Without a match the fingerprint
    /// becomes a new primary and `None` is returned.
    pub fn query_and_insert(&mut self, fingerprint: Fingerprint, post_id: &str) -> Option<String> {
        if let Some(entry) = self.find_match(&fingerprint) {
            if entry.post_id == post_id {
                tracing::trace!("Post {} matches its own stored fingerprint", post_id);
                return None;
            }

            let duplicate = DuplicateEntry {
                post_id: post_id.to_string(),
                fingerprint,
                duplicate_of: entry.post_id.clone(),
                distance: entry.fingerprint.hamming_distance(&fingerprint),
            };
            let original = duplicate.duplicate_of.clone();
            tracing::debug!(
                "Post {} is a near-duplicate of {} (distance {})",
                post_id,
                original,
                duplicate.distance
            );
            self.duplicates.push(duplicate);
            return Some(original);
        }

        self.entries.push(IndexEntry {
            fingerprint,
            post_id: post_id.to_string(),
        });
        None
    }

    /// Withdraws a primary inserted during this run
    ///
    /// Used when the image behind a fresh primary could not be stored, so the
    /// next near-duplicate becomes the primary instead. Seeded entries are
    /// never removed. Returns true if an entry was removed.
    pub fn remove_primary(&mut self, post_id: &str) -> bool {
        let position = self.entries[self.seeded..]
            .iter()
            .rposition(|entry| entry.post_id == post_id);
        match position {
            Some(offset) => {
                self.entries.remove(self.seeded + offset);
                true
            }
            None => false,
        }
    }
}

/// Locks a shared index, recovering the data if a holder panicked
///
/// The index is only ever mutated by whole `query_and_insert` and
/// `remove_primary` calls, so a poisoned lock still guards a consistent index.
pub fn lock_index(index: &SharedIndex) -> MutexGuard<'_, DedupIndex> {
    index.lock().unwrap_or_else(PoisonError::into_inner)
}
