//! Danbooru listing pages
//!
//! Every post is an `article.post-preview` whose data attributes carry the
//! full metadata, including `data-file-url` for the original image.

use super::{
    non_empty, resolve_image_url, split_tag_text, Extraction, ExtractionError,
    ExtractionErrorKind, PostExtractor,
};
use crate::job::Site;
use crate::state::PostRecord;
use scraper::{ElementRef, Html, Selector};
use url::Url;

#[derive(Debug, Clone, Copy, Default)]
pub struct DanbooruExtractor;

impl PostExtractor for DanbooruExtractor {
    fn site(&self) -> Site {
        Site::Danbooru
    }

    fn search_url(&self, base: &Url, terms: &str, page: u32) -> Result<Url, url::ParseError> {
        let mut url = base.join("posts")?;
        url.query_pairs_mut()
            .append_pair("tags", terms)
            .append_pair("page", &page.to_string());
        Ok(url)
    }

    fn extract(&self, content: &str, page_url: &Url, page_number: u32) -> Extraction {
        let document = Html::parse_document(content);
        let mut extraction = Extraction::default();

        let Ok(post_selector) = Selector::parse("article.post-preview") else {
            return extraction;
        };

        for (index, post) in document.select(&post_selector).enumerate() {
            let position = index as u32 + 1;
            match extract_post(post, page_url, page_number, position) {
                Ok(record) => extraction.records.push(record),
                Err(error) => {
                    tracing::debug!("Skipping danbooru post: {}", error);
                    extraction.errors.push(error);
                }
            }
        }

        extraction
    }
}

fn extract_post(
    post: ElementRef<'_>,
    page_url: &Url,
    page_number: u32,
    position: u32,
) -> Result<PostRecord, ExtractionError> {
    let attrs = post.value();

    let post_id = non_empty(attrs.attr("data-id")).ok_or_else(|| {
        ExtractionError::new(page_number, position, None, ExtractionErrorKind::MissingPostId)
    })?;

    let fail = |kind| ExtractionError::new(page_number, position, Some(post_id), kind);

    let raw_url = non_empty(attrs.attr("data-file-url"))
        .ok_or_else(|| fail(ExtractionErrorKind::MissingImageUrl))?;
    let image_url = resolve_image_url(raw_url, page_url).map_err(|reason| {
        fail(ExtractionErrorKind::InvalidUrl {
            url: raw_url.to_string(),
            reason,
        })
    })?;

    let mut record = PostRecord::new(Site::Danbooru, post_id, image_url.to_string());
    record.page_number = page_number;
    record.position = position;
    record.thumbnail_url = non_empty(attrs.attr("data-preview-file-url"))
        .or_else(|| inner_img_src(post))
        .and_then(|src| page_url.join(src).ok())
        .map(|u| u.to_string());

    let tag_text = split_tag_text(attrs.attr("data-tags").unwrap_or_default());
    record.tags = tag_text.tags;
    record.rating = non_empty(attrs.attr("data-rating"))
        .map(str::to_ascii_lowercase)
        .or(tag_text.rating);
    record.score = attrs
        .attr("data-score")
        .and_then(|s| s.trim().parse().ok())
        .or(tag_text.score);
    record.width = attrs.attr("data-width").and_then(|w| w.trim().parse().ok());
    record.height = attrs.attr("data-height").and_then(|h| h.trim().parse().ok());

    Ok(record)
}

fn inner_img_src<'a>(post: ElementRef<'a>) -> Option<&'a str> {
    let img_selector = Selector::parse("img[src]").ok()?;
    post.select(&img_selector)
        .next()
        .and_then(|img| non_empty(img.value().attr("src")))
}
