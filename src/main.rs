//! booru-harvest main entry point
//!
//! This is the command-line interface for the booru-harvest image crawler.

use booru_harvest::config::{load_config_with_hash, Config};
use booru_harvest::crawler::{extractor_for, HttpPageFetcher};
use booru_harvest::output::{export_json, print_statistics, CrawlStatistics};
use booru_harvest::{Coordinator, CrawlJob, JobRequest, Rating, Site};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// booru-harvest: A polite image-board harvester
///
/// booru-harvest walks the listing pages of a tag search one page at a time,
/// downloads full-resolution images, and skips near-duplicates using a
/// perceptual fingerprint.
#[derive(Parser, Debug)]
#[command(name = "booru-harvest")]
#[command(version)]
#[command(about = "A polite image-board harvester", long_about = None)]
struct Cli {
    /// Site to crawl (danbooru, safebooru, gelbooru)
    #[arg(long, default_value = "danbooru")]
    site: Site,

    /// Space-separated search tags
    #[arg(long, default_value = "rating:general")]
    tags: String,

    /// Rating filter (general, sensitive, questionable, explicit)
    #[arg(long)]
    rating: Option<Rating>,

    /// First listing page to fetch
    #[arg(long, default_value_t = 1)]
    start_page: u32,

    /// Stop after this many listing pages
    #[arg(long)]
    max_pages: Option<u32>,

    /// Minimum seconds between page fetches
    #[arg(long, default_value_t = 3.0)]
    delay: f64,

    /// Posts taken from each listing page
    #[arg(long, default_value_t = 20)]
    images_per_page: usize,

    /// Directory receiving `{site}/{post_id}.{ext}` files
    #[arg(long, default_value = "downloaded_images")]
    output_dir: PathBuf,

    /// Directory receiving the JSON metadata export
    #[arg(long, default_value = "metadata")]
    metadata_dir: PathBuf,

    /// Maximum Hamming distance for two images to count as duplicates
    #[arg(long, default_value_t = 10)]
    threshold: u32,

    /// Minimum image width in pixels
    #[arg(long, default_value_t = 200)]
    min_width: u32,

    /// Minimum image height in pixels
    #[arg(long, default_value_t = 200)]
    min_height: u32,

    /// Override the site's base URL (mirrors)
    #[arg(long)]
    base_url: Option<String>,

    /// Path to TOML configuration file
    #[arg(long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Validate the job and configuration and show the first search URL
    #[arg(long)]
    dry_run: bool,

    /// Skip writing the JSON metadata export
    #[arg(long)]
    no_export: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let (config, config_hash) = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            match load_config_with_hash(path) {
                Ok((cfg, hash)) => {
                    tracing::info!("Configuration loaded successfully (hash: {})", hash);
                    (cfg, hash)
                }
                Err(e) => {
                    tracing::error!("Failed to load configuration: {}", e);
                    return Err(e.into());
                }
            }
        }
        None => (Config::default(), String::new()),
    };

    let job = build_job(&cli)?;

    if cli.dry_run {
        handle_dry_run(&job, &config)?;
        return Ok(());
    }

    handle_crawl(job, config, config_hash, &cli).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("booru_harvest=info,warn"),
            1 => EnvFilter::new("booru_harvest=debug,info"),
            2 => EnvFilter::new("booru_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn build_job(cli: &Cli) -> Result<CrawlJob, Box<dyn std::error::Error>> {
    if !cli.delay.is_finite() || cli.delay < 0.0 {
        return Err(format!("--delay must be a non-negative number, got {}", cli.delay).into());
    }

    let job = CrawlJob::new(JobRequest {
        site: cli.site,
        tags: cli.tags.split_whitespace().map(str::to_string).collect(),
        rating: cli.rating,
        start_page: cli.start_page,
        max_pages: cli.max_pages,
        delay_floor: Duration::from_secs_f64(cli.delay),
        images_per_page: cli.images_per_page,
        output_dir: cli.output_dir.clone(),
        base_url: cli.base_url.clone(),
        hamming_threshold: cli.threshold,
        min_width: cli.min_width,
        min_height: cli.min_height,
    })?;
    Ok(job)
}

/// Handles the --dry-run mode: shows the job and the first page it would fetch
fn handle_dry_run(job: &CrawlJob, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== booru-harvest Dry Run ===\n");

    let terms = job.search_terms();
    println!("Job:");
    println!("  Site: {} ({})", job.site(), job.base_url());
    println!("  Search: {}", terms);
    println!("  Start page: {}", job.start_page());
    match job.max_pages() {
        Some(max) => println!("  Max pages: {}", max),
        None => println!("  Max pages: until end of results"),
    }
    println!("  Delay floor: {:?}", job.delay_floor());
    println!("  Images per page: {}", job.images_per_page());
    println!("  Output: {}", job.site_dir().display());
    println!("  Hamming threshold: {}", job.hamming_threshold());
    println!("  Minimum size: {}x{}", job.min_width(), job.min_height());

    println!("\nCrawler Configuration:");
    println!("  Max delay: {}ms", config.crawler.max_delay);
    println!("  Backoff factor: {}", config.crawler.backoff_factor);
    println!("  Page retries: {}", config.crawler.page_retries);
    println!("  Download workers: {}", config.downloads.workers);
    println!("  Download retries: {}", config.downloads.retries);

    println!("\nUser Agent: {}", config.user_agent.header_value());
    match &config.dedup.database_path {
        Some(path) => println!("Fingerprint database: {}", path),
        None => println!("Fingerprint database: none (dedup scoped to this run)"),
    }

    let first = extractor_for(job.site()).search_url(job.base_url(), &terms, job.start_page())?;
    println!("\n✓ Configuration is valid");
    println!("✓ Would start crawling at {}", first);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(
    job: CrawlJob,
    config: Config,
    config_hash: String,
    cli: &Cli,
) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, finishing in-flight work");
                cancel.cancel();
            }
        });
    }

    let fetcher = HttpPageFetcher::new(&config.user_agent, config.crawler.fetch_timeout())?;
    let coordinator = Coordinator::new(job, config, Arc::new(fetcher), cancel)?
        .with_config_hash(config_hash);

    let report = match coordinator.run().await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            return Err(e.into());
        }
    };

    if !cli.no_export {
        let path = export_json(&report, &cli.metadata_dir)?;
        println!("Metadata exported to: {}\n", path.display());
    }

    print_statistics(&CrawlStatistics::from_report(&report));

    if report.outcome.is_failed() {
        return Err(format!("crawl ended {}", report.outcome.reason).into());
    }

    Ok(())
}
