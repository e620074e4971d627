//! Perceptual deduplication
//!
//! - `hasher`: 64-bit difference-hash fingerprints from decoded images
//! - `index`: the per-job index answering near-duplicate queries under a
//!   Hamming-distance threshold

mod hasher;
mod index;

pub use hasher::{dhash, fingerprint_bytes, Fingerprint};
pub use index::{lock_index, DedupIndex, DuplicateEntry, IndexEntry, SharedIndex};
