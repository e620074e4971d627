/// Crawl phase definitions for the pagination state machine
///
/// This module defines the phases a crawl moves through and which
/// transitions between them are legal.
use std::fmt;

/// Represents the current phase of a crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlPhase {
    // ===== Active Phases =====
    /// Job created, nothing fetched yet
    Idle,

    /// A listing page is being fetched (including retries)
    FetchingPage,

    /// The fetched page is being turned into post records
    Extracting,

    /// Waiting out the politeness delay
    Throttling,

    /// Advancing the page counter
    NextPage,

    // ===== Terminal Phases =====
    /// Crawl finished normally
    Done,

    /// Crawl aborted after repeated page failures
    Failed,
}

impl CrawlPhase {
    /// Returns true if no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns true if `next` is a legal successor of this phase
    ///
    /// | From | To |
    /// |------|----|
    /// | Idle | FetchingPage |
    /// | FetchingPage | Extracting, Throttling, Failed, Done |
    /// | Extracting | Throttling, Done |
    /// | Throttling | NextPage, Done, Failed |
    /// | NextPage | FetchingPage |
    ///
    /// `FetchingPage -> Throttling` covers a page that failed terminally
    /// without ending the crawl; `-> Done` covers cancellation mid-fetch.
    pub fn can_transition_to(&self, next: CrawlPhase) -> bool {
        use CrawlPhase::*;
        matches!(
            (self, next),
            (Idle, FetchingPage)
                | (FetchingPage, Extracting)
                | (FetchingPage, Throttling)
                | (FetchingPage, Failed)
                | (FetchingPage, Done)
                | (Extracting, Throttling)
                | (Extracting, Done)
                | (Throttling, NextPage)
                | (Throttling, Done)
                | (Throttling, Failed)
                | (NextPage, FetchingPage)
        )
    }

    /// Stable lowercase name, used in logs and exported metadata
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::FetchingPage => "fetching_page",
            Self::Extracting => "extracting",
            Self::Throttling => "throttling",
            Self::NextPage => "next_page",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Returns all phases
    pub fn all_phases() -> Vec<Self> {
        vec![
            Self::Idle,
            Self::FetchingPage,
            Self::Extracting,
            Self::Throttling,
            Self::NextPage,
            Self::Done,
            Self::Failed,
        ]
    }
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a crawl stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationReason {
    /// The job's page budget was used up
    MaxPagesReached,

    /// A page after the first returned no posts
    EndOfResults,

    /// Cancellation was requested, or the record consumer went away
    Cancelled,

    /// Three consecutive pages failed after exhausting their retries
    TooManyFailures,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxPagesReached => "max-pages-reached",
            Self::EndOfResults => "end-of-results",
            Self::Cancelled => "cancelled",
            Self::TooManyFailures => "too-many-failures",
        }
    }

    /// Terminal phase this reason leads to
    pub fn terminal_phase(&self) -> CrawlPhase {
        match self {
            Self::TooManyFailures => CrawlPhase::Failed,
            _ => CrawlPhase::Done,
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
