//! Configuration module for booru-harvest
//!
//! This module handles loading, parsing, and validating the optional TOML
//! configuration file that tunes throttling, retries, the download pool and
//! fingerprint persistence.
//!
//! # Example
//!
//! ```no_run
//! use booru_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Page retries: {}", config.crawler.page_retries);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{Config, CrawlerConfig, DedupConfig, DownloadConfig, UserAgentConfig};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
