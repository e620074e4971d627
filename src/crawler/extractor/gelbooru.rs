//! Gelbooru listing pages (`article.thumbnail-preview` grid)

use super::grid::extract_grid;
use super::{offset_search_url, Extraction, PostExtractor};
use crate::job::Site;
use url::Url;

const POSTS_PER_PAGE: u32 = 42;

#[derive(Debug, Clone, Copy, Default)]
pub struct GelbooruExtractor;

impl PostExtractor for GelbooruExtractor {
    fn site(&self) -> Site {
        Site::Gelbooru
    }

    fn search_url(&self, base: &Url, terms: &str, page: u32) -> Result<Url, url::ParseError> {
        offset_search_url(base, terms, page, POSTS_PER_PAGE)
    }

    fn extract(&self, content: &str, page_url: &Url, page_number: u32) -> Extraction {
        extract_grid(
            Site::Gelbooru,
            "article.thumbnail-preview",
            content,
            page_url,
            page_number,
        )
    }
}
