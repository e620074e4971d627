//! Download manager
//!
//! Processing a record happens in two halves:
//!
//! 1. [`DownloadManager::fetch_and_hash`] downloads, decodes, applies the
//!    size filter and fingerprints the image. It touches no shared state and
//!    runs concurrently across records.
//! 2. [`DownloadManager::finalize`] queries the dedup index and persists
//!    unique images. The coordinator calls it for one record at a time, in
//!    extraction order, which makes duplicate attribution deterministic.

use crate::config::Config;
use crate::crawler::{build_http_client, RetryPolicy, Severity};
use crate::dedup::{dhash, lock_index, Fingerprint, SharedIndex};
use crate::download::{persist_image, DownloadError, DownloadFailure, PersistOutcome};
use crate::job::CrawlJob;
use crate::state::{DuplicateStatus, PostRecord};
use image::ImageFormat;
use reqwest::{Client, StatusCode};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Extension used when neither the URL nor the content reveals one
const FALLBACK_EXTENSION: &str = "jpg";

/// A downloaded, decoded and fingerprinted image awaiting dedup
#[derive(Debug)]
pub struct HashedImage {
    pub record: PostRecord,
    pub bytes: Vec<u8>,
    pub fingerprint: Fingerprint,
    pub format: Option<ImageFormat>,
    pub width: u32,
    pub height: u32,
}

impl HashedImage {
    /// File extension for the stored image
    pub fn extension(&self) -> String {
        self.record
            .url_extension()
            .or_else(|| {
                self.format
                    .and_then(|f| f.extensions_str().first())
                    .map(|ext| ext.to_string())
            })
            .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
    }
}

enum AttemptError {
    Retryable { message: String, severity: Severity },
    Fatal(DownloadError),
}

/// Downloads images for one job and feeds them through the dedup index
pub struct DownloadManager {
    client: Client,
    retry: RetryPolicy,
    site_dir: PathBuf,
    min_width: u32,
    min_height: u32,
    index: SharedIndex,
    cancel: CancellationToken,
}

impl DownloadManager {
    pub fn new(
        job: &CrawlJob,
        config: &Config,
        index: SharedIndex,
        cancel: CancellationToken,
    ) -> Result<Self, reqwest::Error> {
        let client = build_http_client(&config.user_agent, config.downloads.timeout())?;
        let retry = RetryPolicy::new(
            config.downloads.retries,
            config.downloads.retry_backoff(),
            config.crawler.max_delay(),
        );

        Ok(Self {
            client,
            retry,
            site_dir: job.site_dir(),
            min_width: job.min_width(),
            min_height: job.min_height(),
            index,
            cancel,
        })
    }

    pub fn index(&self) -> &SharedIndex {
        &self.index
    }

    /// Runs both halves for a single record
    pub async fn fetch_and_process(&self, record: PostRecord) -> Result<PostRecord, DownloadFailure> {
        let hashed = self.fetch_and_hash(record).await?;
        self.finalize(hashed).await
    }

    /// Downloads, decodes, filters by size and fingerprints one image
    pub async fn fetch_and_hash(&self, record: PostRecord) -> Result<HashedImage, DownloadFailure> {
        if self.cancel.is_cancelled() {
            return Err(DownloadFailure::new(record, DownloadError::Cancelled));
        }

        let bytes = match self.download(&record.image_url).await {
            Ok(bytes) => bytes,
            Err(error) => return Err(DownloadFailure::new(record, error)),
        };

        let decoded = tokio::task::spawn_blocking(move || {
            let result = image::load_from_memory(&bytes).map(|image| {
                let format = image::guess_format(&bytes).ok();
                (dhash(&image), image.width(), image.height(), format)
            });
            (bytes, result)
        })
        .await;

        let (bytes, (fingerprint, width, height, format)) = match decoded {
            Ok((bytes, Ok(decoded))) => (bytes, decoded),
            Ok((_, Err(e))) => {
                return Err(DownloadFailure::new(record, DownloadError::Decode(e.to_string())))
            }
            Err(e) => {
                return Err(DownloadFailure::new(record, DownloadError::Decode(e.to_string())))
            }
        };

        if width < self.min_width || height < self.min_height {
            tracing::debug!(
                "Post {} is {}x{}, below {}x{}",
                record.post_id,
                width,
                height,
                self.min_width,
                self.min_height
            );
            return Err(DownloadFailure::new(
                record,
                DownloadError::BelowMinimum { width, height },
            ));
        }

        Ok(HashedImage {
            record,
            bytes,
            fingerprint,
            format,
            width,
            height,
        })
    }

    /// Deduplicates a hashed image and stores it if it is unique
    pub async fn finalize(&self, hashed: HashedImage) -> Result<PostRecord, DownloadFailure> {
        let extension = hashed.extension();
        let HashedImage {
            mut record,
            bytes,
            fingerprint,
            width,
            height,
            ..
        } = hashed;

        if self.cancel.is_cancelled() {
            return Err(DownloadFailure::new(record, DownloadError::Cancelled));
        }

        record.set_dimensions(width, height);

        let original = lock_index(&self.index).query_and_insert(fingerprint, &record.post_id);
        if let Some(original) = original {
            record.set_duplicate(DuplicateStatus::DuplicateOf(original));
            return Ok(record);
        }
        record.set_duplicate(DuplicateStatus::Unique);

        let path = self
            .site_dir
            .join(format!("{}.{}", file_stem(&record.post_id), extension));
        match persist_image(&path, &bytes, &self.cancel).await {
            Ok(PersistOutcome::Written) => {
                tracing::debug!("Stored post {} at {}", record.post_id, path.display());
            }
            Ok(PersistOutcome::Unchanged) => {
                tracing::debug!("Post {} already stored", record.post_id);
            }
            Err(error) => {
                lock_index(&self.index).remove_primary(&record.post_id);
                return Err(DownloadFailure::new(record, error));
            }
        }

        record.set_local_path(path);
        Ok(record)
    }

    /// Downloads the bytes at `url`, retrying transient failures
    async fn download(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
                result = self.attempt(url) => result,
            };

            let (message, severity) = match result {
                Ok(bytes) => return Ok(bytes),
                Err(AttemptError::Fatal(error)) => return Err(error),
                Err(AttemptError::Retryable { message, severity }) => (message, severity),
            };

            if attempt >= self.retry.max_retries {
                return Err(DownloadError::Transient {
                    attempts: attempt + 1,
                    message,
                });
            }

            let wait = self.retry.backoff(attempt, severity);
            tracing::debug!(
                "Download of {} failed ({}), retrying in {:?}",
                url,
                message,
                wait
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
            attempt += 1;
        }
    }

    async fn attempt(&self, url: &str) -> Result<Vec<u8>, AttemptError> {
        let retryable = |message: String| AttemptError::Retryable {
            message,
            severity: Severity::Normal,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| retryable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AttemptError::Retryable {
                message: "HTTP 429".to_string(),
                severity: Severity::Extended,
            });
        }
        if status.is_server_error() {
            return Err(retryable(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(AttemptError::Fatal(DownloadError::Client {
                status: status.as_u16(),
            }));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| retryable(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Post id escaped into a file name
///
/// `[A-Za-z0-9_-]` pass through; every other byte becomes `%XX`. Since `%`
/// itself is always escaped, distinct ids never share a stem.
fn file_stem(post_id: &str) -> String {
    let mut stem = String::with_capacity(post_id.len());
    for byte in post_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("%{:02X}", byte));
        }
    }
    stem
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::DedupIndex;
    use crate::job::{JobRequest, Site};
    use image::{DynamicImage, Rgb, RgbImage};
    use std::io::Cursor;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn png_bytes(width: u32, height: u32, seed: u8) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            let v = ((x * 7 + y * 13) as u8).wrapping_mul(seed);
            Rgb([v, v.wrapping_add(40), v.wrapping_add(80)])
        });
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn manager(dir: &TempDir, threshold: u32) -> DownloadManager {
        manager_with_cancel(dir, threshold, CancellationToken::new())
    }

    fn manager_with_cancel(dir: &TempDir, threshold: u32, cancel: CancellationToken) -> DownloadManager {
        let request = JobRequest {
            output_dir: dir.path().to_path_buf(),
            min_width: 16,
            min_height: 16,
            hamming_threshold: threshold,
            ..JobRequest::default()
        };
        let job = CrawlJob::new(request).unwrap();
        let mut config = Config::default();
        config.downloads.retries = 2;
        config.downloads.retry_backoff = 1;
        let index = DedupIndex::new(job.hamming_threshold()).into_shared();
        DownloadManager::new(&job, &config, index, cancel).unwrap()
    }

    fn record(server: &MockServer, id: &str, file: &str) -> PostRecord {
        PostRecord::new(Site::Danbooru, id, format!("{}/data/{}", server.uri(), file))
    }

    #[tokio::test]
    async fn test_unique_image_stored() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/1.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(64, 48, 3)))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, 10);
        let stored = manager
            .fetch_and_process(record(&server, "1", "1.png"))
            .await
            .unwrap();

        assert_eq!(stored.duplicate(), &DuplicateStatus::Unique);
        assert_eq!(stored.width, Some(64));
        assert_eq!(stored.height, Some(48));
        let local = stored.local_path().unwrap();
        assert_eq!(local, dir.path().join("danbooru").join("1.png"));
        assert!(local.exists());
    }

    #[tokio::test]
    async fn test_identical_image_marked_duplicate() {
        let server = MockServer::start().await;
        let bytes = png_bytes(64, 64, 5);
        for file in ["a.png", "b.png"] {
            Mock::given(method("GET"))
                .and(path(format!("/data/{}", file)))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.clone()))
                .mount(&server)
                .await;
        }

        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, 10);
        let first = manager
            .fetch_and_process(record(&server, "10", "a.png"))
            .await
            .unwrap();
        let second = manager
            .fetch_and_process(record(&server, "11", "b.png"))
            .await
            .unwrap();

        assert!(!first.is_duplicate());
        assert_eq!(second.duplicate().original(), Some("10"));
        assert!(second.local_path().is_none());
        assert!(!dir.path().join("danbooru").join("11.png").exists());
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/gone.png"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let failure = manager(&dir, 10)
            .fetch_and_process(record(&server, "2", "gone.png"))
            .await
            .unwrap_err();

        assert!(matches!(failure.error, DownloadError::Client { status: 404 }));
        assert_eq!(failure.record.post_id, "2");
    }

    #[tokio::test]
    async fn test_server_errors_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/flaky.png"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let failure = manager(&dir, 10)
            .fetch_and_process(record(&server, "3", "flaky.png"))
            .await
            .unwrap_err();

        assert!(matches!(
            failure.error,
            DownloadError::Transient { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_undecodable_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/broken.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"<html>not an image</html>".to_vec()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let failure = manager(&dir, 10)
            .fetch_and_process(record(&server, "4", "broken.png"))
            .await
            .unwrap_err();

        assert_eq!(failure.error.kind(), "decode-error");
    }

    #[tokio::test]
    async fn test_small_image_filtered_and_not_indexed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/tiny.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(8, 8, 1)))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, 10);
        let failure = manager
            .fetch_and_process(record(&server, "5", "tiny.png"))
            .await
            .unwrap_err();

        assert!(!failure.error.is_failure());
        assert!(lock_index(manager.index()).is_empty());
        assert!(!dir.path().join("danbooru").exists());
    }

    #[tokio::test]
    async fn test_extension_from_content_when_url_has_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/6"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(32, 32, 9)))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, 10);
        let hashed = manager
            .fetch_and_hash(record(&server, "6", "6"))
            .await
            .unwrap();
        assert_eq!(hashed.extension(), "png");
    }

    #[tokio::test]
    async fn test_cancelled_before_download() {
        let dir = TempDir::new().unwrap();
        let request = JobRequest {
            output_dir: dir.path().to_path_buf(),
            ..JobRequest::default()
        };
        let job = CrawlJob::new(request).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let manager = DownloadManager::new(
            &job,
            &Config::default(),
            DedupIndex::new(10).into_shared(),
            cancel,
        )
        .unwrap();

        let record = PostRecord::new(Site::Danbooru, "7", "http://127.0.0.1:9/7.png");
        let failure = tokio::time::timeout(Duration::from_secs(5), manager.fetch_and_hash(record))
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(failure.error, DownloadError::Cancelled));
    }

    #[tokio::test]
    async fn test_failed_write_does_not_claim_cluster() {
        let server = MockServer::start().await;
        let bytes = png_bytes(64, 64, 7);
        for file in ["a.png", "b.png"] {
            Mock::given(method("GET"))
                .and(path(format!("/data/{}", file)))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.clone()))
                .mount(&server)
                .await;
        }

        let dir = TempDir::new().unwrap();
        let site_dir = dir.path().join("danbooru");
        // A plain file where the site directory should be makes the write fail
        std::fs::write(&site_dir, b"x").unwrap();

        let manager = manager(&dir, 10);
        let failure = manager
            .fetch_and_process(record(&server, "10", "a.png"))
            .await
            .unwrap_err();
        assert_eq!(failure.error.kind(), "io-error");
        assert!(lock_index(manager.index()).is_empty());

        std::fs::remove_file(&site_dir).unwrap();
        let second = manager
            .fetch_and_process(record(&server, "11", "b.png"))
            .await
            .unwrap();

        assert_eq!(second.duplicate(), &DuplicateStatus::Unique);
        let local = second.local_path().unwrap();
        assert_eq!(local, site_dir.join("11.png"));
        assert!(local.exists());

        let index = lock_index(manager.index());
        let primaries: Vec<&str> = index.entries().iter().map(|e| e.post_id.as_str()).collect();
        assert_eq!(primaries, vec!["11"]);
        assert!(index.duplicates().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_during_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/slow.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(png_bytes(64, 64, 2))
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let manager = manager_with_cancel(&dir, 10, cancel.clone());

        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
        let failure = tokio::time::timeout(
            Duration::from_secs(5),
            manager.fetch_and_process(record(&server, "8", "slow.png")),
        )
        .await
        .unwrap()
        .unwrap_err();
        trigger.await.unwrap();

        assert!(matches!(failure.error, DownloadError::Cancelled));
        let site_dir = dir.path().join("danbooru");
        assert!(!site_dir.join("8.png").exists());
        assert!(!site_dir.join("8.png.part").exists());
        assert!(lock_index(manager.index()).is_empty());
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("12345"), "12345");
        assert_eq!(file_stem("md5-ab_cd"), "md5-ab_cd");
        assert_eq!(file_stem("../etc"), "%2E%2E%2Fetc");
        assert_eq!(file_stem("\u{e9}"), "%C3%A9");
    }

    #[test]
    fn test_file_stem_keeps_distinct_ids_apart() {
        assert_ne!(file_stem("a.b"), file_stem("a_b"));
        assert_ne!(file_stem("a/b"), file_stem("a.b"));
        assert_ne!(file_stem("a%2Eb"), file_stem("a.b"));
    }
}
