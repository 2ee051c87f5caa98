use crate::config::types::{Config, OutputConfig, RateConfig, RetryConfig, SiteConfig, TimeoutConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_site_config(&config.site)?;
    validate_rate_config(&config.rate)?;
    validate_retry_config(&config.retry)?;
    validate_timeout_config(&config.timeouts)?;
    validate_output_config(&config.output)?;
    Ok(())
}

fn validate_site_config(config: &SiteConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url must be http(s), got '{}'",
            config.base_url
        )));
    }

    Ok(())
}

fn validate_rate_config(config: &RateConfig) -> Result<(), ConfigError> {
    if config.floor_ms > config.ceiling_ms {
        return Err(ConfigError::Validation(format!(
            "rate floor-ms ({}) must not exceed ceiling-ms ({})",
            config.floor_ms, config.ceiling_ms
        )));
    }

    if !config.multiplier.is_finite() || config.multiplier < 1.0 {
        return Err(ConfigError::Validation(format!(
            "rate multiplier must be >= 1.0, got {}",
            config.multiplier
        )));
    }

    if config.decay_after < 1 {
        return Err(ConfigError::Validation(
            "rate decay-after must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    for (name, attempts) in [
        ("navigation-attempts", config.navigation_attempts),
        ("login-attempts", config.login_attempts),
        ("sink-attempts", config.sink_attempts),
    ] {
        if attempts < 1 {
            return Err(ConfigError::Validation(format!(
                "retry {} must be >= 1, got {}",
                name, attempts
            )));
        }
    }

    if config.backoff_base_ms > config.backoff_max_ms {
        return Err(ConfigError::Validation(format!(
            "retry backoff-base-ms ({}) must not exceed backoff-max-ms ({})",
            config.backoff_base_ms, config.backoff_max_ms
        )));
    }

    Ok(())
}

fn validate_timeout_config(config: &TimeoutConfig) -> Result<(), ConfigError> {
    if config.poll_ms == 0 {
        return Err(ConfigError::Validation(
            "timeouts poll-ms must be > 0".to_string(),
        ));
    }

    if config.content_ready_ms < config.poll_ms {
        return Err(ConfigError::Validation(format!(
            "timeouts content-ready-ms ({}) must be >= poll-ms ({})",
            config.content_ready_ms, config.poll_ms
        )));
    }

    if config.login_ms < config.poll_ms {
        return Err(ConfigError::Validation(format!(
            "timeouts login-ms ({}) must be >= poll-ms ({})",
            config.login_ms, config.poll_ms
        )));
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if config.records_path.as_deref() == Some("") {
        return Err(ConfigError::Validation(
            "records-path cannot be empty when set".to_string(),
        ));
    }

    Ok(())
}

/// Validates a profile slug as it appears in `/in/<slug>/`
pub fn validate_profile_slug(slug: &str) -> Result<(), ConfigError> {
    if slug.is_empty() {
        return Err(ConfigError::Validation(
            "profile slug cannot be empty".to_string(),
        ));
    }

    if !slug
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '%')
    {
        return Err(ConfigError::Validation(format!(
            "profile slug must be the URL suffix after /in/, got '{}'",
            slug
        )));
    }

    Ok(())
}
