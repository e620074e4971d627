//! Crawl job definition
//!
//! A [`CrawlJob`] is the single input boundary between callers (the CLI, or
//! any other front end) and the crawl core. It is validated once in
//! [`CrawlJob::new`] and never mutated afterwards.

use crate::{ConfigError, ConfigResult};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Supported image boards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Site {
    Danbooru,
    Safebooru,
    Gelbooru,
}

impl Site {
    /// Canonical lowercase name, used for directory layout and output
    pub fn name(&self) -> &'static str {
        match self {
            Self::Danbooru => "danbooru",
            Self::Safebooru => "safebooru",
            Self::Gelbooru => "gelbooru",
        }
    }

    /// Public base URL of the site
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Danbooru => "https://danbooru.donmai.us",
            Self::Safebooru => "https://safebooru.org",
            Self::Gelbooru => "https://gelbooru.com",
        }
    }

    pub fn all() -> [Site; 3] {
        [Self::Danbooru, Self::Safebooru, Self::Gelbooru]
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Site {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "danbooru" => Ok(Self::Danbooru),
            "safebooru" => Ok(Self::Safebooru),
            "gelbooru" => Ok(Self::Gelbooru),
            other => Err(format!(
                "unknown site '{}' (expected danbooru, safebooru or gelbooru)",
                other
            )),
        }
    }
}

/// Content rating used as a search filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rating {
    General,
    Sensitive,
    Questionable,
    Explicit,
}

impl Rating {
    /// Name used in `rating:` search terms
    pub fn name(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Sensitive => "sensitive",
            Self::Questionable => "questionable",
            Self::Explicit => "explicit",
        }
    }

    /// Single-letter code as found in listing markup
    pub fn code(&self) -> &'static str {
        match self {
            Self::General => "g",
            Self::Sensitive => "s",
            Self::Questionable => "q",
            Self::Explicit => "e",
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Rating {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "g" | "general" | "safe" => Ok(Self::General),
            "s" | "sensitive" => Ok(Self::Sensitive),
            "q" | "questionable" => Ok(Self::Questionable),
            "e" | "explicit" => Ok(Self::Explicit),
            other => Err(format!("unknown rating '{}'", other)),
        }
    }
}

/// Ordered, duplicate-free list of search tags
///
/// Display and URL building use insertion order; equality ignores order.
#[derive(Debug, Clone, Default)]
pub struct TagQuery {
    tags: Vec<String>,
}

impl TagQuery {
    /// Builds a query from raw tag strings. Each input may hold several
    /// whitespace-separated tags.
    pub fn new<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tags: Vec<String> = Vec::new();
        for chunk in raw {
            for tag in chunk.as_ref().split_whitespace() {
                if !tags.iter().any(|t| t == tag) {
                    tags.push(tag.to_string());
                }
            }
        }
        Self { tags }
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Space-joined tags in insertion order
    pub fn joined(&self) -> String {
        self.tags.join(" ")
    }
}

impl PartialEq for TagQuery {
    fn eq(&self, other: &Self) -> bool {
        let a: HashSet<&String> = self.tags.iter().collect();
        let b: HashSet<&String> = other.tags.iter().collect();
        a == b
    }
}

impl Eq for TagQuery {}

impl fmt::Display for TagQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined())
    }
}

/// Unvalidated job parameters, as collected from the command line
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub site: Site,
    pub tags: Vec<String>,
    pub rating: Option<Rating>,
    pub start_page: u32,
    pub max_pages: Option<u32>,
    /// Minimum wait between page fetches
    pub delay_floor: Duration,
    /// Posts taken from each listing page; extra posts are ignored
    pub images_per_page: usize,
    pub output_dir: PathBuf,
    /// Overrides the site's public base URL (mirrors, tests)
    pub base_url: Option<String>,
    pub hamming_threshold: u32,
    pub min_width: u32,
    pub min_height: u32,
}

impl Default for JobRequest {
    fn default() -> Self {
        Self {
            site: Site::Danbooru,
            tags: vec!["rating:general".to_string()],
            rating: None,
            start_page: 1,
            max_pages: None,
            delay_floor: Duration::from_secs(3),
            images_per_page: 20,
            output_dir: PathBuf::from("downloaded_images"),
            base_url: None,
            hamming_threshold: 10,
            min_width: 200,
            min_height: 200,
        }
    }
}

/// A validated, immutable crawl job
#[derive(Debug, Clone)]
pub struct CrawlJob {
    site: Site,
    tags: TagQuery,
    rating: Option<Rating>,
    start_page: u32,
    max_pages: Option<u32>,
    delay_floor: Duration,
    images_per_page: usize,
    output_dir: PathBuf,
    base_url: Url,
    hamming_threshold: u32,
    min_width: u32,
    min_height: u32,
}

impl CrawlJob {
    /// Validates a request and freezes it into a job
    pub fn new(request: JobRequest) -> ConfigResult<Self> {
        if request.start_page < 1 {
            return Err(ConfigError::Validation(
                "start_page must be >= 1".to_string(),
            ));
        }

        if request.max_pages == Some(0) {
            return Err(ConfigError::Validation(
                "max_pages must be >= 1 when set".to_string(),
            ));
        }

        if request.images_per_page < 1 || request.images_per_page > 1000 {
            return Err(ConfigError::Validation(format!(
                "images_per_page must be between 1 and 1000, got {}",
                request.images_per_page
            )));
        }

        if request.hamming_threshold > 64 {
            return Err(ConfigError::Validation(format!(
                "hamming_threshold must be <= 64, got {}",
                request.hamming_threshold
            )));
        }

        if request.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "output_dir cannot be empty".to_string(),
            ));
        }

        let raw_base = request
            .base_url
            .as_deref()
            .unwrap_or_else(|| request.site.default_base_url());
        let mut base_url = Url::parse(raw_base)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url '{}': {}", raw_base, e)))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(format!(
                "base_url '{}' must use http or https",
                raw_base
            )));
        }
        // Relative joins replace the last path segment unless it ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            site: request.site,
            tags: TagQuery::new(&request.tags),
            rating: request.rating,
            start_page: request.start_page,
            max_pages: request.max_pages,
            delay_floor: request.delay_floor,
            images_per_page: request.images_per_page,
            output_dir: request.output_dir,
            base_url,
            hamming_threshold: request.hamming_threshold,
            min_width: request.min_width,
            min_height: request.min_height,
        })
    }

    pub fn site(&self) -> Site {
        self.site
    }

    pub fn tags(&self) -> &TagQuery {
        &self.tags
    }

    pub fn rating(&self) -> Option<Rating> {
        self.rating
    }

    pub fn start_page(&self) -> u32 {
        self.start_page
    }

    pub fn max_pages(&self) -> Option<u32> {
        self.max_pages
    }

    pub fn delay_floor(&self) -> Duration {
        self.delay_floor
    }

    pub fn images_per_page(&self) -> usize {
        self.images_per_page
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn hamming_threshold(&self) -> u32 {
        self.hamming_threshold
    }

    pub fn min_width(&self) -> u32 {
        self.min_width
    }

    pub fn min_height(&self) -> u32 {
        self.min_height
    }

    /// Directory receiving this site's images
    pub fn site_dir(&self) -> PathBuf {
        self.output_dir.join(self.site.name())
    }

    /// Search terms sent to the site: the tags, then the rating filter
    pub fn search_terms(&self) -> String {
        match self.rating {
            Some(rating) if !self.tags.contains(&format!("rating:{}", rating.name())) => {
                let mut terms = self.tags.joined();
                if !terms.is_empty() {
                    terms.push(' ');
                }
                terms.push_str("rating:");
                terms.push_str(rating.name());
                terms
            }
            _ => self.tags.joined(),
        }
    }
}
