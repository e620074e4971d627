use crate::config::types::{Config, CrawlerConfig, DedupConfig, DownloadConfig, UserAgentConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_download_config(&config.downloads)?;
    validate_dedup_config(&config.dedup)?;
    validate_user_agent_config(&config.user_agent)?;
    Ok(())
}

/// Validates crawler throttling and retry configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.backoff_factor < 1.0 || !config.backoff_factor.is_finite() {
        return Err(ConfigError::Validation(format!(
            "backoff_factor must be a finite value >= 1.0, got {}",
            config.backoff_factor
        )));
    }

    if config.latency_window < 1 || config.latency_window > 100 {
        return Err(ConfigError::Validation(format!(
            "latency_window must be between 1 and 100, got {}",
            config.latency_window
        )));
    }

    if config.page_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "page_retries must be <= 10, got {}",
            config.page_retries
        )));
    }

    if config.fetch_timeout < 1 {
        return Err(ConfigError::Validation(
            "fetch_timeout must be >= 1 second".to_string(),
        ));
    }

    Ok(())
}

/// Validates download pool configuration
fn validate_download_config(config: &DownloadConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 32 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 32, got {}",
            config.workers
        )));
    }

    if config.retries > 10 {
        return Err(ConfigError::Validation(format!(
            "download retries must be <= 10, got {}",
            config.retries
        )));
    }

    if config.timeout < 1 {
        return Err(ConfigError::Validation(
            "download timeout must be >= 1 second".to_string(),
        ));
    }

    Ok(())
}

/// Validates dedup persistence configuration
fn validate_dedup_config(config: &DedupConfig) -> Result<(), ConfigError> {
    if let Some(path) = &config.database_path {
        if path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "database_path cannot be empty when set".to_string(),
            ));
        }
    }
    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters, hyphens and underscores, got '{}'",
            config.crawler_name
        )));
    }

    if let Some(contact) = &config.contact_url {
        Url::parse(contact)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;
    }

    Ok(())
}
