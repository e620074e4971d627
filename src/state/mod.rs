//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `CrawlPhase`: The phases of the pagination state machine and their legal transitions
//! - `CrawlState`: Scheduler-owned counters (pages, records, failure streak, delay)
//! - `PostRecord`: One discovered image and its duplicate/storage annotations

mod crawl_phase;
mod crawl_state;
mod post_record;

// Re-export main types
pub use crawl_phase::{CrawlPhase, TerminationReason};
pub use crawl_state::CrawlState;
pub use post_record::{DuplicateStatus, PostRecord};
