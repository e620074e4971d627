//! Image download pipeline
//!
//! - `manager`: download with retry, decode, size filter, fingerprint, dedup
//! - `persist`: atomic, content-checked writes into the output directory

mod manager;
mod persist;

pub use manager::{DownloadManager, HashedImage};
pub use persist::{persist_image, sha256_hex, PersistOutcome};

use crate::state::PostRecord;
use thiserror::Error;

/// Why an image did not make it to disk
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Timeouts, connection errors, 429 and 5xx that outlasted the retry budget
    #[error("download failed after {attempts} attempts: {message}")]
    Transient { attempts: u32, message: String },

    /// 4xx other than 429
    #[error("image host answered HTTP {status}")]
    Client { status: u16 },

    #[error("image could not be decoded: {0}")]
    Decode(String),

    /// Threshold violation, not a failure
    #[error("image is {width}x{height}, below the minimum size")]
    BelowMinimum { width: u32, height: u32 },

    #[error("download cancelled")]
    Cancelled,

    #[error("file write failed: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// False for outcomes that are reported but do not count as failures
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::BelowMinimum { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::Client { .. } => "client-error",
            Self::Decode(_) => "decode-error",
            Self::BelowMinimum { .. } => "below-minimum",
            Self::Cancelled => "cancelled",
            Self::Io(_) => "io-error",
        }
    }
}

/// A record whose image could not be processed, with the reason
#[derive(Debug)]
pub struct DownloadFailure {
    pub record: PostRecord,
    pub error: DownloadError,
}

impl DownloadFailure {
    pub fn new(record: PostRecord, error: DownloadError) -> Self {
        Self { record, error }
    }
}
