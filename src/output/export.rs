//! JSON metadata export
//!
//! Writes `images_{tags}_{timestamp}.json` with the job metadata, every
//! processed image and every failure.

use crate::output::CrawlReport;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
struct ExportDocument<'a> {
    metadata: ExportMetadata<'a>,
    images: Vec<ExportImage<'a>>,
    failures: Vec<ExportFailure<'a>>,
}

#[derive(Debug, Serialize)]
struct ExportMetadata<'a> {
    site: &'static str,
    search_tags: &'a str,
    total_items: usize,
    duplicates: usize,
    failures: usize,
    exported_at: String,
}

#[derive(Debug, Serialize)]
struct ExportImage<'a> {
    post_id: &'a str,
    image_url: &'a str,
    tags: String,
    rating: Option<&'a str>,
    is_duplicate: bool,
    local_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct ExportFailure<'a> {
    post_id: Option<&'a str>,
    kind: &'a str,
    message: &'a str,
}

/// Renders the export document for a report
pub fn render_json(report: &CrawlReport, exported_at: DateTime<Utc>) -> Result<String> {
    let document = ExportDocument {
        metadata: ExportMetadata {
            site: report.site.name(),
            search_tags: &report.search_tags,
            total_items: report.records.len(),
            duplicates: report.duplicate_count(),
            failures: report.failure_count(),
            exported_at: exported_at.to_rfc3339(),
        },
        images: report
            .records
            .iter()
            .map(|record| ExportImage {
                post_id: &record.post_id,
                image_url: &record.image_url,
                tags: record.tags_joined(),
                rating: record.rating.as_deref(),
                is_duplicate: record.is_duplicate(),
                local_path: record.local_path().map(|p| p.display().to_string()),
            })
            .collect(),
        failures: report
            .failures
            .iter()
            .map(|failure| ExportFailure {
                post_id: failure.post_id.as_deref(),
                kind: &failure.kind,
                message: &failure.message,
            })
            .collect(),
    };

    Ok(serde_json::to_string_pretty(&document)?)
}

/// File name for an export: `images_{tags}_{timestamp}.json`
pub fn export_file_name(search_tags: &str, timestamp: DateTime<Utc>) -> String {
    let mut tags: String = search_tags
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    tags.truncate(80);
    if tags.is_empty() {
        tags.push_str("all");
    }
    format!("images_{}_{}.json", tags, timestamp.format("%Y%m%d_%H%M%S"))
}

/// Writes the export for `report` into `metadata_dir` and returns its path
pub fn export_json(report: &CrawlReport, metadata_dir: &Path) -> Result<PathBuf> {
    let now = Utc::now();
    let json = render_json(report, now)?;

    std::fs::create_dir_all(metadata_dir)?;
    let path = metadata_dir.join(export_file_name(&report.search_tags, now));
    std::fs::write(&path, json)?;

    tracing::info!(
        "Exported {} images to {}",
        report.records.len(),
        path.display()
    );
    Ok(path)
}
