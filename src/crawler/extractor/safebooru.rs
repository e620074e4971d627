//! Safebooru listing pages (`span.thumb` grid)

use super::grid::extract_grid;
use super::{offset_search_url, Extraction, PostExtractor};
use crate::job::Site;
use url::Url;

/// Posts per listing page, used for the `pid` offset
const POSTS_PER_PAGE: u32 = 40;

#[derive(Debug, Clone, Copy, Default)]
pub struct SafebooruExtractor;

impl PostExtractor for SafebooruExtractor {
    fn site(&self) -> Site {
        Site::Safebooru
    }

    fn search_url(&self, base: &Url, terms: &str, page: u32) -> Result<Url, url::ParseError> {
        offset_search_url(base, terms, page, POSTS_PER_PAGE)
    }

    fn extract(&self, content: &str, page_url: &Url, page_number: u32) -> Extraction {
        extract_grid(Site::Safebooru, "span.thumb", content, page_url, page_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::extractor::ExtractionErrorKind;

    fn page_url() -> Url {
        Url::parse("https://safebooru.org/index.php?page=post&s=list&tags=1girl&pid=0").unwrap()
    }

    #[test]
    fn test_search_url_offsets() {
        let base = Url::parse("https://safebooru.org").unwrap();
        let first = SafebooruExtractor.search_url(&base, "1girl", 1).unwrap();
        let third = SafebooruExtractor.search_url(&base, "1girl", 3).unwrap();
        assert_eq!(
            first.as_str(),
            "https://safebooru.org/index.php?page=post&s=list&tags=1girl&pid=0"
        );
        assert!(third.as_str().ends_with("pid=80"));
    }

    #[test]
    fn test_thumbnail_rewritten_to_original() {
        let html = r#"
            <div class="content">
              <span id="s5001" class="thumb">
                <a id="p5001" href="index.php?page=post&amp;s=view&amp;id=5001">
                  <img src="https://safebooru.org/thumbnails/3200/thumbnail_abc123.jpg?5001"
                       title=" 1girl smile  rating:safe score:4 " alt="1girl smile">
                </a>
              </span>
            </div>
        "#;
        let extraction = SafebooruExtractor.extract(html, &page_url(), 1);
        assert!(extraction.errors.is_empty());

        let record = &extraction.records[0];
        assert_eq!(record.post_id, "5001");
        assert_eq!(record.image_url, "https://safebooru.org/images/3200/abc123.jpg");
        assert_eq!(
            record.thumbnail_url.as_deref(),
            Some("https://safebooru.org/thumbnails/3200/thumbnail_abc123.jpg?5001")
        );
        assert_eq!(record.rating.as_deref(), Some("safe"));
        assert_eq!(record.score, Some(4));
        assert_eq!(record.tags_joined(), "1girl smile");
    }

    #[test]
    fn test_data_file_url_preferred() {
        let html = r#"
            <span id="s9" class="thumb" data-file-url="//safebooru.org/images/1/orig.png">
              <a href="index.php?page=post&amp;s=view&amp;id=9"><img src="/thumbnails/1/thumbnail_orig.jpg"></a>
            </span>
        "#;
        let extraction = SafebooruExtractor.extract(html, &page_url(), 1);
        assert_eq!(extraction.records[0].image_url, "https://safebooru.org/images/1/orig.png");
    }

    #[test]
    fn test_post_id_from_container_id() {
        let html = r#"
            <span id="s77" class="thumb">
              <a href="/post/77"><img src="/thumbnails/1/thumbnail_x.jpg"></a>
            </span>
        "#;
        let extraction = SafebooruExtractor.extract(html, &page_url(), 1);
        assert_eq!(extraction.records[0].post_id, "77");
    }

    #[test]
    fn test_unrecognised_thumbnail_is_error() {
        let html = r#"
            <span id="s8" class="thumb">
              <a href="index.php?page=post&amp;s=view&amp;id=8"><img src="/samples/1/sample_x.jpg"></a>
            </span>
            <span id="s9" class="thumb">
              <a href="index.php?page=post&amp;s=view&amp;id=9"></a>
            </span>
        "#;
        let extraction = SafebooruExtractor.extract(html, &page_url(), 1);
        assert!(extraction.records.is_empty());
        assert_eq!(
            extraction.errors[0].kind,
            ExtractionErrorKind::ThumbnailOnly("/samples/1/sample_x.jpg".to_string())
        );
        assert_eq!(extraction.errors[1].kind, ExtractionErrorKind::MissingImageUrl);
    }
}
