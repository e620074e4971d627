//! Post extraction from listing pages
//!
//! One [`PostExtractor`] per supported site turns listing markup into
//! [`PostRecord`]s. Extraction is pure: the same markup and page URL always
//! produce the same records and errors, in document order.
//!
//! Only the attribute designated for the original file is trusted as the
//! image URL. Preview and sample images are never used as a fallback; a post
//! whose original cannot be determined is reported as an [`ExtractionError`].

mod danbooru;
mod gelbooru;
mod grid;
mod safebooru;

pub use danbooru::DanbooruExtractor;
pub use gelbooru::GelbooruExtractor;
pub use safebooru::SafebooruExtractor;

use crate::job::Site;
use crate::state::PostRecord;
use std::collections::BTreeSet;
use thiserror::Error;
use url::{Host, Url};

/// Why a post entry could not be turned into a record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionErrorKind {
    #[error("no post id")]
    MissingPostId,

    #[error("no full-resolution image URL")]
    MissingImageUrl,

    #[error("only a thumbnail is exposed: {0}")]
    ThumbnailOnly(String),

    #[error("invalid image URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl ExtractionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingPostId => "missing-post-id",
            Self::MissingImageUrl => "missing-image-url",
            Self::ThumbnailOnly(_) => "thumbnail-only",
            Self::InvalidUrl { .. } => "invalid-url",
        }
    }
}

/// A post entry that could not be turned into a record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("page {page} position {position}: {kind}")]
pub struct ExtractionError {
    pub page: u32,

    /// 1-based position of the entry on its page
    pub position: u32,

    /// Post id, when it was readable
    pub post_id: Option<String>,

    pub kind: ExtractionErrorKind,
}

impl ExtractionError {
    pub fn new(page: u32, position: u32, post_id: Option<&str>, kind: ExtractionErrorKind) -> Self {
        Self {
            page,
            position,
            post_id: post_id.map(str::to_string),
            kind,
        }
    }
}

/// Records and per-entry errors from one listing page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub records: Vec<PostRecord>,
    pub errors: Vec<ExtractionError>,
}

impl Extraction {
    /// Post entries found on the page, usable or not
    pub fn candidate_count(&self) -> usize {
        self.records.len() + self.errors.len()
    }

    /// Keeps only the first `limit` entries of the page
    pub fn truncate(&mut self, limit: usize) {
        let limit = u32::try_from(limit).unwrap_or(u32::MAX);
        self.records.retain(|r| r.position <= limit);
        self.errors.retain(|e| e.position <= limit);
    }
}

/// Site-specific listing page knowledge
pub trait PostExtractor: Send + Sync {
    fn site(&self) -> Site;

    /// Search URL for 1-based page `page` of `terms`
    fn search_url(&self, base: &Url, terms: &str, page: u32) -> Result<Url, url::ParseError>;

    /// Extracts every post entry on a listing page
    fn extract(&self, content: &str, page_url: &Url, page_number: u32) -> Extraction;
}

/// Returns the extractor for a site
pub fn extractor_for(site: Site) -> Box<dyn PostExtractor> {
    match site {
        Site::Danbooru => Box::new(DanbooruExtractor),
        Site::Safebooru => Box::new(SafebooruExtractor),
        Site::Gelbooru => Box::new(GelbooruExtractor),
    }
}

/// Resolves an image URL against the page and upgrades remote `http` to `https`
pub(crate) fn resolve_image_url(raw: &str, page_url: &Url) -> Result<Url, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty URL".to_string());
    }
    if raw.starts_with("data:") || raw.starts_with("javascript:") {
        return Err("not a network URL".to_string());
    }

    let mut url = page_url.join(raw).map_err(|e| e.to_string())?;
    match url.scheme() {
        "https" => {}
        "http" => {
            if !is_local_host(&url) {
                url.set_scheme("https")
                    .map_err(|_| "cannot upgrade to https".to_string())?;
            }
        }
        other => return Err(format!("unsupported scheme '{}'", other)),
    }
    Ok(url)
}

fn is_local_host(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain == "localhost" || domain.ends_with(".localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback() || ip.is_private(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Maps a thumbnail path to the original image path
///
/// `/thumbnails/ab/thumbnail_xyz.jpg?123` becomes `/images/ab/xyz.jpg`.
/// Returns `None` when the rewrite would not change the URL.
pub(crate) fn thumbnail_to_original(thumbnail: &str) -> Option<String> {
    let without_query = thumbnail.split(['?', '#']).next().unwrap_or(thumbnail);
    let rewritten = without_query
        .replace("/thumbnails/", "/images/")
        .replace("/thumbnail_", "/");
    if rewritten == without_query {
        None
    } else {
        Some(rewritten)
    }
}

/// Tag text split into plain tags and the metatags boards embed in it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct TagText {
    pub tags: BTreeSet<String>,
    pub rating: Option<String>,
    pub score: Option<i64>,
}

pub(crate) fn split_tag_text(text: &str) -> TagText {
    let mut parsed = TagText::default();
    for token in text.split_whitespace() {
        if let Some(rating) = token.strip_prefix("rating:") {
            if !rating.is_empty() {
                parsed.rating = Some(rating.to_ascii_lowercase());
            }
        } else if let Some(score) = token.strip_prefix("score:") {
            parsed.score = score.parse().ok();
        } else {
            parsed.tags.insert(token.to_string());
        }
    }
    parsed
}

/// Post id from an `id=` query parameter of a post link
pub(crate) fn post_id_from_link(href: &str, page_url: &Url) -> Option<String> {
    let link = page_url.join(href.trim()).ok()?;
    link.query_pairs()
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.into_owned())
        .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
}

/// Post id from a container id such as `s123` or `p123`
pub(crate) fn post_id_from_element_id(element_id: &str) -> Option<String> {
    let digits = element_id
        .strip_prefix('s')
        .or_else(|| element_id.strip_prefix('p'))?;
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        Some(digits.to_string())
    } else {
        None
    }
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Builds a `index.php?page=post&s=list` search URL with a post offset
pub(crate) fn offset_search_url(
    base: &Url,
    terms: &str,
    page: u32,
    posts_per_page: u32,
) -> Result<Url, url::ParseError> {
    let mut url = base.join("index.php")?;
    let offset = page.saturating_sub(1).saturating_mul(posts_per_page);
    url.query_pairs_mut()
        .append_pair("page", "post")
        .append_pair("s", "list")
        .append_pair("tags", terms)
        .append_pair("pid", &offset.to_string());
    Ok(url)
}
