//! Integration tests for the crawler
//!
//! These tests use wiremock to serve listing pages and images and run
//! whole jobs end-to-end against it.

use booru_harvest::config::Config;
use booru_harvest::crawler::run_job;
use booru_harvest::output::{export_json, CrawlReport};
use booru_harvest::storage::{open_store, FingerprintStore};
use booru_harvest::{CrawlJob, CrawlPhase, DuplicateStatus, JobRequest, Site, TerminationReason};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::BTreeSet;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// 90x80 PNG made of 10x10 blocks with pseudo-random gray levels
fn block_png(seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    let mut levels = [[0u8; 9]; 8];
    for row in levels.iter_mut() {
        for level in row.iter_mut() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            *level = (state % 256) as u8;
        }
    }
    let img = RgbImage::from_fn(90, 80, |x, y| {
        let v = levels[(y / 10) as usize][(x / 10) as usize];
        Rgb([v, v, v])
    });
    encode_png(DynamicImage::ImageRgb8(img))
}

fn tiny_png() -> Vec<u8> {
    encode_png(DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([10, 200, 30]))))
}

fn encode_png(image: DynamicImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("Failed to encode PNG");
    bytes
}

/// Danbooru-style listing for the given post ids
fn listing(ids: &[u32]) -> String {
    let posts: String = ids
        .iter()
        .map(|id| {
            format!(
                r#"<article class="post-preview" data-id="{id}" data-tags="test_tag" data-rating="g" data-file-url="/data/{id}.png"></article>"#
            )
        })
        .collect();
    format!("<html><body><div id=\"posts\">{}</div></body></html>", posts)
}

async fn mount_page(server: &MockServer, page: u32, ids: &[u32]) {
    Mock::given(method("GET"))
        .and(path("/posts"))
        .and(query_param("page", page.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(ids)))
        .mount(server)
        .await;
}

/// Any listing page without its own mock is empty
async fn mount_empty_listings(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/posts"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(&[])))
        .with_priority(10)
        .mount(server)
        .await;
}

async fn mount_image(server: &MockServer, id: u32, bytes: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(format!("/data/{}.png", id)))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(bytes),
        )
        .mount(server)
        .await;
}

fn test_job(server: &MockServer, output_dir: &Path, max_pages: Option<u32>) -> CrawlJob {
    CrawlJob::new(JobRequest {
        site: Site::Danbooru,
        tags: vec!["test_tag".to_string()],
        max_pages,
        delay_floor: Duration::from_millis(1),
        output_dir: output_dir.to_path_buf(),
        base_url: Some(server.uri()),
        min_width: 16,
        min_height: 16,
        ..JobRequest::default()
    })
    .expect("Failed to build job")
}

fn test_config(database: Option<&Path>) -> Config {
    let mut config = Config::default();
    config.crawler.max_delay = 20;
    config.crawler.retry_backoff = 1;
    config.crawler.page_retries = 1;
    config.downloads.retries = 1;
    config.downloads.retry_backoff = 1;
    config.downloads.timeout = 5;
    config.dedup.database_path = database.map(|p| p.display().to_string());
    config
}

/// Serves two pages of 20 posts where posts 36..=40 reuse the bytes of 1..=5
async fn mount_two_pages_with_duplicates(server: &MockServer) {
    let page_one: Vec<u32> = (1..=20).collect();
    let page_two: Vec<u32> = (21..=40).collect();
    mount_page(server, 1, &page_one).await;
    mount_page(server, 2, &page_two).await;
    mount_empty_listings(server).await;

    for id in 1..=35 {
        mount_image(server, id, block_png(id as u64)).await;
    }
    for id in 36..=40 {
        mount_image(server, id, block_png((id - 35) as u64)).await;
    }
}

fn stored_files(dir: &Path) -> BTreeSet<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// (post_id, duplicate status, local path) for every record in order
fn annotations(report: &CrawlReport) -> Vec<(String, DuplicateStatus, Option<String>)> {
    report
        .records
        .iter()
        .map(|r| {
            (
                r.post_id.clone(),
                r.duplicate().clone(),
                r.local_path().map(|p| p.display().to_string()),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_two_pages_with_identical_images() {
    let server = MockServer::start().await;
    mount_two_pages_with_duplicates(&server).await;

    let dir = TempDir::new().unwrap();
    let job = test_job(&server, dir.path(), Some(2));
    let site_dir = job.site_dir();

    let report = run_job(job, test_config(None), CancellationToken::new())
        .await
        .expect("Crawl should succeed");

    assert_eq!(report.outcome.phase, CrawlPhase::Done);
    assert_eq!(report.outcome.reason, TerminationReason::MaxPagesReached);
    assert_eq!(report.outcome.state.pages_fetched, 2);

    assert_eq!(report.records.len(), 40);
    assert_eq!(report.unique_count(), 35);
    assert_eq!(report.duplicate_count(), 5);
    assert!(report.failures.is_empty());

    for id in 36..=40u32 {
        let record = report
            .records
            .iter()
            .find(|r| r.post_id == id.to_string())
            .unwrap();
        assert_eq!(
            record.duplicate(),
            &DuplicateStatus::DuplicateOf((id - 35).to_string())
        );
        assert!(record.local_path().is_none());
    }

    let files = stored_files(&site_dir);
    assert_eq!(files.len(), 35);
    assert!(files.contains("1.png"));
    assert!(!files.contains("36.png"));

    let first = &report.records[0];
    assert_eq!(first.width, Some(90));
    assert_eq!(first.height, Some(80));
    assert!(first.tags.contains("test_tag"));
    assert_eq!(first.rating.as_deref(), Some("g"));
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let server = MockServer::start().await;
    mount_two_pages_with_duplicates(&server).await;

    let dir = TempDir::new().unwrap();
    let site_dir = dir.path().join("danbooru");

    let first = run_job(
        test_job(&server, dir.path(), Some(2)),
        test_config(None),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    let files_after_first = stored_files(&site_dir);

    let second = run_job(
        test_job(&server, dir.path(), Some(2)),
        test_config(None),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(stored_files(&site_dir), files_after_first);
    assert_eq!(annotations(&first), annotations(&second));
}

#[tokio::test]
async fn test_rerun_with_fingerprint_database() {
    let server = MockServer::start().await;
    mount_two_pages_with_duplicates(&server).await;

    let dir = TempDir::new().unwrap();
    let db = dir.path().join("state").join("fingerprints.db");
    let site_dir = dir.path().join("danbooru");

    let first = run_job(
        test_job(&server, dir.path(), Some(2)),
        test_config(Some(&db)),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let store = open_store(&db).unwrap();
    assert_eq!(store.count_fingerprints(Site::Danbooru).unwrap(), 35);
    drop(store);

    let second = run_job(
        test_job(&server, dir.path(), Some(2)),
        test_config(Some(&db)),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(annotations(&first), annotations(&second));
    assert_eq!(second.unique_count(), 35);
    assert_eq!(stored_files(&site_dir).len(), 35);

    let store = open_store(&db).unwrap();
    assert_eq!(store.count_fingerprints(Site::Danbooru).unwrap(), 35);
}

#[tokio::test]
async fn test_missing_image_is_reported() {
    let server = MockServer::start().await;
    mount_page(&server, 1, &[1, 2, 3]).await;
    mount_empty_listings(&server).await;
    mount_image(&server, 1, block_png(1)).await;
    mount_image(&server, 3, block_png(3)).await;
    Mock::given(method("GET"))
        .and(path("/data/2.png"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let job = test_job(&server, dir.path(), None);
    let site_dir = job.site_dir();

    let report = run_job(job, test_config(None), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome.reason, TerminationReason::EndOfResults);
    assert_eq!(report.unique_count(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].post_id.as_deref(), Some("2"));
    assert_eq!(report.failures[0].kind, "client-error");
    assert!(report.failures[0].record.is_some());
    assert_eq!(stored_files(&site_dir).len(), 2);
}

#[tokio::test]
async fn test_small_images_are_filtered_not_failed() {
    let server = MockServer::start().await;
    mount_page(&server, 1, &[1, 2]).await;
    mount_empty_listings(&server).await;
    mount_image(&server, 1, block_png(1)).await;
    mount_image(&server, 2, tiny_png()).await;

    let dir = TempDir::new().unwrap();
    let job = test_job(&server, dir.path(), Some(1));
    let site_dir = job.site_dir();

    let report = run_job(job, test_config(None), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.records.len(), 1);
    assert!(report.failures.is_empty());
    assert_eq!(report.filtered.len(), 1);
    assert_eq!(report.filtered[0].kind, "below-minimum");
    assert_eq!(stored_files(&site_dir), BTreeSet::from(["1.png".to_string()]));
}

#[tokio::test]
async fn test_blocked_listing_fails_the_crawl() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let report = run_job(
        test_job(&server, dir.path(), None),
        test_config(None),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(report.outcome.is_failed());
    assert_eq!(report.outcome.reason, TerminationReason::TooManyFailures);
    assert_eq!(report.outcome.state.failed_pages, vec![1, 2, 3]);
    assert!(report.is_empty());
}

#[tokio::test]
async fn test_export_after_crawl() {
    let server = MockServer::start().await;
    mount_page(&server, 1, &[1, 2]).await;
    mount_empty_listings(&server).await;
    mount_image(&server, 1, block_png(1)).await;
    mount_image(&server, 2, block_png(1)).await;

    let dir = TempDir::new().unwrap();
    let report = run_job(
        test_job(&server, dir.path(), Some(1)),
        test_config(None),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let path = export_json(&report, &dir.path().join("metadata")).unwrap();
    let file_name = path.file_name().unwrap().to_string_lossy().to_string();
    assert!(file_name.starts_with("images_test_tag_"));

    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["metadata"]["total_items"], 2);
    assert_eq!(value["metadata"]["duplicates"], 1);
    assert_eq!(value["images"][1]["is_duplicate"], true);
    assert_eq!(value["images"][0]["tags"], "test_tag");
}
