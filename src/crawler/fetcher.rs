//! Page fetching
//!
//! The scheduler only sees the [`PageFetcher`] contract. Rendering engines,
//! browser automation or plain HTTP are interchangeable behind it; this
//! module ships the plain HTTP implementation.
//!
//! # Error classification
//!
//! | Condition | Result |
//! |-----------|--------|
//! | HTTP 2xx | `Ok(FetchedPage)` |
//! | HTTP 404 | `NotFound` (terminal for the page) |
//! | HTTP 403 | `Blocked` |
//! | HTTP 503 with a challenge page | `Blocked` |
//! | HTTP 429, 5xx, other non-2xx | `Transient` |
//! | Timeout, connection error | `Transient` |

use crate::config::UserAgentConfig;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Body markers of anti-bot interstitials
const CHALLENGE_MARKERS: &[&str] = &["cloudflare", "checking your browser"];

/// Hints for fetchers that render pages; the HTTP fetcher ignores them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderHints {
    /// Wait until network activity settles before reading the content
    pub wait_for_network_idle: bool,

    /// Scroll the page to trigger lazily loaded posts
    pub scroll_for_more: bool,
}

impl Default for RenderHints {
    fn default() -> Self {
        Self {
            wait_for_network_idle: true,
            scroll_for_more: true,
        }
    }
}

/// A successfully fetched listing page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// HTTP status code
    pub status: u16,

    /// Rendered or raw page markup
    pub content: String,

    /// URL after redirects
    pub final_url: Url,
}

/// Why a page fetch failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Timeouts, connection errors, 429 and 5xx; worth retrying
    #[error("transient fetch error: {message}")]
    Transient {
        status: Option<u16>,
        message: String,
    },

    /// The site answered with an anti-bot wall
    #[error("blocked by anti-bot protection (HTTP {status}): {message}")]
    Blocked { status: u16, message: String },

    /// The page does not exist
    #[error("page not found")]
    NotFound,
}

impl FetchError {
    /// HTTP status behind the error, if one was received
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } => *status,
            Self::Blocked { status, .. } => Some(*status),
            Self::NotFound => Some(404),
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotFound)
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::Blocked { .. } => "blocked",
            Self::NotFound => "not-found",
        }
    }
}

/// Fetches listing pages
///
/// Implementations must be safe to share across tasks; the scheduler holds
/// one behind an `Arc` and never issues two fetches at once.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url, hints: &RenderHints) -> Result<FetchedPage, FetchError>;
}

/// Builds an HTTP client with the crawler's identification and a per-request timeout
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent.header_value())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Maps a non-success status and its body to a fetch error
///
/// Returns `None` for 2xx statuses.
pub fn classify_status(status: u16, body: &str) -> Option<FetchError> {
    if (200..300).contains(&status) {
        return None;
    }

    let error = match status {
        404 => FetchError::NotFound,
        403 => FetchError::Blocked {
            status,
            message: "access forbidden".to_string(),
        },
        503 if looks_like_challenge(body) => FetchError::Blocked {
            status,
            message: "challenge page served".to_string(),
        },
        _ => FetchError::Transient {
            status: Some(status),
            message: format!("HTTP {}", status),
        },
    };
    Some(error)
}

fn looks_like_challenge(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    CHALLENGE_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn classify_request_error(error: &reqwest::Error) -> FetchError {
    let message = if error.is_timeout() {
        "request timeout".to_string()
    } else if error.is_connect() {
        format!("connection failed: {}", error)
    } else {
        error.to_string()
    };

    FetchError::Transient {
        status: error.status().map(|s| s.as_u16()),
        message,
    }
}

/// Plain HTTP implementation of [`PageFetcher`]
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new(user_agent: &UserAgentConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(user_agent, timeout)?,
        })
    }

    /// Wraps an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &Url, _hints: &RenderHints) -> Result<FetchedPage, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify_request_error(&e))?;

        let status = response.status();
        let final_url = response.url().clone();

        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }

        let content = response
            .text()
            .await
            .map_err(|e| classify_request_error(&e))?;

        if let Some(error) = classify_status(status.as_u16(), &content) {
            tracing::debug!("Fetch of {} failed: {}", url, error);
            return Err(error);
        }

        Ok(FetchedPage {
            status: status.as_u16(),
            content,
            final_url,
        })
    }
}
