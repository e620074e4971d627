use crate::job::Site;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Duplicate status of a post
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum DuplicateStatus {
    /// Not yet fingerprinted
    #[default]
    Unknown,

    /// First image of its near-duplicate cluster
    Unique,

    /// Near-duplicate of the earlier post with this id
    DuplicateOf(String),
}

impl DuplicateStatus {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateOf(_))
    }

    /// Id of the primary post, if this is a duplicate
    pub fn original(&self) -> Option<&str> {
        match self {
            Self::DuplicateOf(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for DuplicateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Unique => write!(f, "unique"),
            Self::DuplicateOf(id) => write!(f, "duplicate-of-{}", id),
        }
    }
}

/// One image discovered on a listing page
///
/// Extracted fields are public. Duplicate status, local path and measured
/// dimensions are only written by the download pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRecord {
    pub site: Site,

    /// Site-scoped post id
    pub post_id: String,

    /// Canonical full-resolution asset
    pub image_url: String,

    /// Preview image, kept for diagnostics and never downloaded
    pub thumbnail_url: Option<String>,

    pub tags: BTreeSet<String>,

    /// Rating code as published by the site (`g`, `s`, `q`, `e`, ...)
    pub rating: Option<String>,

    /// Vote score, when the listing exposes one
    pub score: Option<i64>,

    pub width: Option<u32>,
    pub height: Option<u32>,

    pub page_number: u32,

    /// 1-based position on its listing page
    pub position: u32,

    duplicate: DuplicateStatus,
    local_path: Option<PathBuf>,
}

impl PostRecord {
    /// Creates a freshly extracted record
    pub fn new(site: Site, post_id: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            site,
            post_id: post_id.into(),
            image_url: image_url.into(),
            thumbnail_url: None,
            tags: BTreeSet::new(),
            rating: None,
            score: None,
            width: None,
            height: None,
            page_number: 0,
            position: 0,
            duplicate: DuplicateStatus::Unknown,
            local_path: None,
        }
    }

    pub fn duplicate(&self) -> &DuplicateStatus {
        &self.duplicate
    }

    pub fn is_duplicate(&self) -> bool {
        self.duplicate.is_duplicate()
    }

    pub fn local_path(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    /// Tags joined by single spaces, sorted
    pub fn tags_joined(&self) -> String {
        self.tags.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
    }

    /// File extension taken from the image URL path, lowercased
    pub fn url_extension(&self) -> Option<String> {
        let path = url::Url::parse(&self.image_url).ok()?.path().to_string();
        let file = path.rsplit('/').next()?;
        let (_, ext) = file.rsplit_once('.')?;
        if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    pub(crate) fn set_duplicate(&mut self, status: DuplicateStatus) {
        self.duplicate = status;
    }

    pub(crate) fn set_local_path(&mut self, path: PathBuf) {
        self.local_path = Some(path);
    }

    pub(crate) fn set_dimensions(&mut self, width: u32, height: u32) {
        self.width = Some(width);
        self.height = Some(height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_defaults() {
        let record = PostRecord::new(Site::Danbooru, "42", "https://cdn.example.com/a.png");
        assert_eq!(record.duplicate(), &DuplicateStatus::Unknown);
        assert!(record.local_path().is_none());
        assert!(!record.is_duplicate());
    }

    #[test]
    fn test_duplicate_status() {
        let status = DuplicateStatus::DuplicateOf("7".to_string());
        assert!(status.is_duplicate());
        assert_eq!(status.original(), Some("7"));
        assert_eq!(format!("{}", status), "duplicate-of-7");
        assert_eq!(DuplicateStatus::Unique.original(), None);
    }

    #[test]
    fn test_tags_joined_sorted() {
        let mut record = PostRecord::new(Site::Gelbooru, "1", "https://img.example.com/1.jpg");
        record.tags.insert("smile".to_string());
        record.tags.insert("1girl".to_string());
        assert_eq!(record.tags_joined(), "1girl smile");
    }

    #[test]
    fn test_url_extension() {
        let record = PostRecord::new(
            Site::Danbooru,
            "1",
            "https://cdn.donmai.us/original/ab/cd/abcd.PNG?download=1",
        );
        assert_eq!(record.url_extension().as_deref(), Some("png"));

        let record = PostRecord::new(Site::Danbooru, "2", "https://cdn.example.com/images/2");
        assert_eq!(record.url_extension(), None);
    }
}
