//! Output module for crawl reports
//!
//! This module handles:
//! - The in-memory report of a crawl job
//! - Exporting image metadata as JSON
//! - Summarizing and printing run statistics

mod export;
mod report;
mod stats;

pub use export::{export_file_name, export_json, render_json};
pub use report::{CrawlReport, ItemFailure};
pub use stats::{print_statistics, CrawlStatistics};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::CrawlOutcome;
    use crate::download::{DownloadError, DownloadFailure};
    use crate::job::Site;
    use crate::state::{CrawlPhase, CrawlState, DuplicateStatus, PostRecord, TerminationReason};
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn sample_report() -> CrawlReport {
        let mut unique = PostRecord::new(Site::Danbooru, "1", "https://cdn.example.com/1.png");
        unique.tags.insert("smile".to_string());
        unique.tags.insert("1girl".to_string());
        unique.rating = Some("g".to_string());
        unique.set_duplicate(DuplicateStatus::Unique);
        unique.set_local_path(PathBuf::from("out/danbooru/1.png"));

        let mut duplicate = PostRecord::new(Site::Danbooru, "2", "https://cdn.example.com/2.png");
        duplicate.set_duplicate(DuplicateStatus::DuplicateOf("1".to_string()));

        let failed = PostRecord::new(Site::Danbooru, "3", "https://cdn.example.com/3.png");
        let failure = ItemFailure::from_download(DownloadFailure::new(
            failed,
            DownloadError::Client { status: 404 },
        ));

        let mut state = CrawlState::new(1);
        state.pages_attempted = 2;
        state.pages_fetched = 2;
        state.records_emitted = 3;
        state.termination = Some(TerminationReason::MaxPagesReached);

        let started_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        CrawlReport {
            site: Site::Danbooru,
            search_tags: "1girl rating:general".to_string(),
            records: vec![unique, duplicate],
            failures: vec![failure],
            filtered: Vec::new(),
            outcome: CrawlOutcome {
                phase: CrawlPhase::Done,
                reason: TerminationReason::MaxPagesReached,
                state,
            },
            started_at,
            finished_at: started_at + chrono::Duration::seconds(42),
        }
    }

    #[test]
    fn test_report_counts() {
        let report = sample_report();
        assert_eq!(report.unique_count(), 1);
        assert_eq!(report.duplicate_count(), 1);
        assert_eq!(report.failure_count(), 1);
        assert!(!report.is_empty());
    }

    #[test]
    fn test_render_json_shape() {
        let report = sample_report();
        let exported_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 1, 0).unwrap();
        let json = render_json(&report, exported_at).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["metadata"]["site"], "danbooru");
        assert_eq!(value["metadata"]["search_tags"], "1girl rating:general");
        assert_eq!(value["metadata"]["total_items"], 2);
        assert_eq!(value["metadata"]["duplicates"], 1);
        assert_eq!(value["metadata"]["failures"], 1);
        assert_eq!(value["metadata"]["exported_at"], "2024-05-01T12:01:00+00:00");

        let images = value["images"].as_array().unwrap();
        assert_eq!(images[0]["post_id"], "1");
        assert_eq!(images[0]["tags"], "1girl smile");
        assert_eq!(images[0]["rating"], "g");
        assert_eq!(images[0]["is_duplicate"], false);
        assert_eq!(images[0]["local_path"], "out/danbooru/1.png");
        assert_eq!(images[1]["is_duplicate"], true);
        assert!(images[1]["local_path"].is_null());

        let failures = value["failures"].as_array().unwrap();
        assert_eq!(failures[0]["post_id"], "3");
        assert_eq!(failures[0]["kind"], "client-error");
    }

    #[test]
    fn test_export_file_name() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 9, 8, 7).unwrap();
        assert_eq!(
            export_file_name("1girl rating:general", ts),
            "images_1girl_rating_general_20240501_090807.json"
        );
        assert_eq!(export_file_name("", ts), "images_all_20240501_090807.json");
    }

    #[test]
    fn test_export_json_writes_file() {
        let dir = TempDir::new().unwrap();
        let metadata_dir = dir.path().join("metadata");
        let path = export_json(&sample_report(), &metadata_dir).unwrap();

        assert!(path.starts_with(&metadata_dir));
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\"total_items\": 2"));
    }

    #[test]
    fn test_statistics_from_report() {
        let stats = CrawlStatistics::from_report(&sample_report());
        assert_eq!(stats.outcome, "done (max-pages-reached)");
        assert_eq!(stats.unique_stored, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.total_failures(), 1);
        assert_eq!(stats.failures_by_kind.get("client-error"), Some(&1));
        assert_eq!(stats.elapsed.as_secs(), 42);
    }
}
