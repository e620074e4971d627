//! Thumbnail-grid listings shared by the Gelbooru-family boards
//!
//! Posts are containers holding a link to the post page and a thumbnail.
//! The original image comes from `data-file-url` on the container when the
//! board provides it, otherwise from the thumbnail path mapped to the images
//! directory.

use super::{
    non_empty, post_id_from_element_id, post_id_from_link, resolve_image_url, split_tag_text,
    thumbnail_to_original, Extraction, ExtractionError, ExtractionErrorKind,
};
use crate::job::Site;
use crate::state::PostRecord;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Extracts all posts matching `container` from a thumbnail grid page
pub(crate) fn extract_grid(
    site: Site,
    container: &str,
    content: &str,
    page_url: &Url,
    page_number: u32,
) -> Extraction {
    let document = Html::parse_document(content);
    let mut extraction = Extraction::default();

    let (Ok(post_selector), Ok(link_selector), Ok(img_selector)) = (
        Selector::parse(container),
        Selector::parse("a[href]"),
        Selector::parse("img"),
    ) else {
        return extraction;
    };

    for (index, post) in document.select(&post_selector).enumerate() {
        let link = post.select(&link_selector).next();
        let img = post.select(&img_selector).next();
        let entry = GridEntry {
            post,
            link,
            img,
            position: index as u32 + 1,
        };

        match entry.into_record(site, page_url, page_number) {
            Ok(record) => extraction.records.push(record),
            Err(error) => {
                tracing::debug!("Skipping {} post: {}", site, error);
                extraction.errors.push(error);
            }
        }
    }

    extraction
}

struct GridEntry<'a> {
    post: ElementRef<'a>,
    link: Option<ElementRef<'a>>,
    img: Option<ElementRef<'a>>,
    position: u32,
}

impl<'a> GridEntry<'a> {
    fn post_id(&self, page_url: &Url) -> Option<String> {
        let from_link = self
            .link
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| post_id_from_link(href, page_url));
        if from_link.is_some() {
            return from_link;
        }

        let element_ids = [
            self.post.value().attr("id"),
            self.link.and_then(|a| a.value().attr("id")),
        ];
        if let Some(id) = element_ids
            .into_iter()
            .flatten()
            .find_map(post_id_from_element_id)
        {
            return Some(id);
        }

        non_empty(self.post.value().attr("data-id")).map(str::to_string)
    }

    fn img_attr(&self, name: &str) -> Option<&'a str> {
        self.img.and_then(|img| non_empty(img.value().attr(name)))
    }

    fn into_record(
        self,
        site: Site,
        page_url: &Url,
        page_number: u32,
    ) -> Result<PostRecord, ExtractionError> {
        let position = self.position;
        let post_id = self.post_id(page_url).ok_or_else(|| {
            ExtractionError::new(page_number, position, None, ExtractionErrorKind::MissingPostId)
        })?;
        let fail = |kind| ExtractionError::new(page_number, position, Some(post_id.as_str()), kind);

        let thumbnail = self.img_attr("src");
        let raw_url = match non_empty(self.post.value().attr("data-file-url")) {
            Some(url) => url.to_string(),
            None => {
                let thumbnail = thumbnail.ok_or_else(|| fail(ExtractionErrorKind::MissingImageUrl))?;
                thumbnail_to_original(thumbnail).ok_or_else(|| {
                    fail(ExtractionErrorKind::ThumbnailOnly(thumbnail.to_string()))
                })?
            }
        };

        let image_url = resolve_image_url(&raw_url, page_url).map_err(|reason| {
            fail(ExtractionErrorKind::InvalidUrl {
                url: raw_url.clone(),
                reason,
            })
        })?;

        let tag_source = non_empty(self.post.value().attr("data-tags"))
            .or_else(|| self.img_attr("title"))
            .or_else(|| self.img_attr("alt"))
            .unwrap_or_default();
        let tag_text = split_tag_text(tag_source);

        let mut record = PostRecord::new(site, post_id.as_str(), image_url.to_string());
        record.page_number = page_number;
        record.position = position;
        record.thumbnail_url = thumbnail
            .and_then(|src| page_url.join(src).ok())
            .map(|u| u.to_string());
        record.tags = tag_text.tags;
        record.rating = non_empty(self.post.value().attr("data-rating"))
            .map(str::to_ascii_lowercase)
            .or(tag_text.rating);
        record.score = tag_text.score;

        Ok(record)
    }
}
