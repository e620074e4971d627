use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for booru-harvest
///
/// Every section is optional in the TOML file; missing sections take their
/// defaults. Job-specific parameters (site, tags, pages) come from the
/// command line and live in [`crate::job::CrawlJob`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub downloads: DownloadConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(rename = "user-agent", default)]
    pub user_agent: UserAgentConfig,
}

/// Page crawling behavior: throttling and page retry policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Upper bound for the adaptive delay between pages (milliseconds)
    #[serde(rename = "max-delay")]
    pub max_delay: u64,

    /// Multiplier applied to the adaptive delay after a failed fetch
    #[serde(rename = "backoff-factor")]
    pub backoff_factor: f64,

    /// Number of recent fetches considered when decaying the delay
    #[serde(rename = "latency-window")]
    pub latency_window: usize,

    /// Responses slower than this count as slow (milliseconds)
    #[serde(rename = "slow-latency")]
    pub slow_latency: u64,

    /// Retries of the same page before it counts as a terminal failure
    #[serde(rename = "page-retries")]
    pub page_retries: u32,

    /// Base wait for the exponential page retry backoff (milliseconds)
    #[serde(rename = "retry-backoff")]
    pub retry_backoff: u64,

    /// Per-attempt page fetch timeout (seconds)
    #[serde(rename = "fetch-timeout")]
    pub fetch_timeout: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_delay: 60_000,
            backoff_factor: 1.5,
            latency_window: 5,
            slow_latency: 5_000,
            page_retries: 3,
            retry_backoff: 1_000,
            fetch_timeout: 60,
        }
    }
}

impl CrawlerConfig {
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay)
    }

    pub fn slow_latency(&self) -> Duration {
        Duration::from_millis(self.slow_latency)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout)
    }
}

/// Image download pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Number of images downloaded and hashed concurrently
    pub workers: usize,

    /// Retries for transient download failures
    pub retries: u32,

    /// Base wait for the exponential download retry backoff (milliseconds)
    #[serde(rename = "retry-backoff")]
    pub retry_backoff: u64,

    /// Per-attempt download timeout (seconds)
    pub timeout: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            retries: 3,
            retry_backoff: 1_000,
            timeout: 60,
        }
    }
}

impl DownloadConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Deduplication persistence configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// SQLite database holding fingerprints from earlier runs.
    /// When absent, duplicate detection is scoped to a single run.
    #[serde(rename = "database-path")]
    pub database_path: Option<String>,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: Option<String>,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "booru-harvest".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: None,
        }
    }
}

impl UserAgentConfig {
    /// Formats the User-Agent header value
    ///
    /// Format: `Name/Version` or `Name/Version (+ContactURL)`
    pub fn header_value(&self) -> String {
        match &self.contact_url {
            Some(contact) => format!(
                "{}/{} (+{})",
                self.crawler_name, self.crawler_version, contact
            ),
            None => format!("{}/{}", self.crawler_name, self.crawler_version),
        }
    }
}
