use crate::config::types::{
    Config, CrawlerConfig, EgressConfig, EgressKind, SessionConfig, StorageConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_session_config(&config.session)?;
    validate_egress_config(&config.egress)?;
    validate_storage_config(&config.storage)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "base-url '{}' must use HTTPS scheme",
            config.base_url
        )));
    }

    if config.pool_size < 1 || config.pool_size > 64 {
        return Err(ConfigError::Validation(format!(
            "pool-size must be between 1 and 64, got {}",
            config.pool_size
        )));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max-attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.attempt_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "attempt-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.item_batch_size < 1 {
        return Err(ConfigError::Validation(format!(
            "item-batch-size must be >= 1, got {}",
            config.item_batch_size
        )));
    }

    Ok(())
}

/// Validates session configuration
fn validate_session_config(config: &SessionConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.challenge_markers.iter().any(|m| m.is_empty()) {
        return Err(ConfigError::Validation(
            "challenge-markers cannot contain empty strings".to_string(),
        ));
    }

    Ok(())
}

/// Validates egress configuration
fn validate_egress_config(config: &EgressConfig) -> Result<(), ConfigError> {
    if config.binary.trim().is_empty() {
        return Err(ConfigError::Validation(
            "egress binary cannot be empty".to_string(),
        ));
    }

    if config.host.trim().is_empty() {
        return Err(ConfigError::Validation(
            "egress host cannot be empty".to_string(),
        ));
    }

    if config.socks_port == 0 || config.control_port == 0 {
        return Err(ConfigError::Validation(
            "egress ports must be non-zero".to_string(),
        ));
    }

    if config.socks_port == config.control_port {
        return Err(ConfigError::Validation(format!(
            "socks-port and control-port must differ, both are {}",
            config.socks_port
        )));
    }

    if config.kind == EgressKind::Nym && config.nym.client_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "nym client-id cannot be empty".to_string(),
        ));
    }

    if let Some(check_url) = &config.ip_check_url {
        Url::parse(check_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid ip-check-url: {}", e)))?;
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.output_dir.is_empty() {
        return Err(ConfigError::Validation(
            "output-dir cannot be empty".to_string(),
        ));
    }

    if config.insert_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "insert-attempts must be >= 1, got {}",
            config.insert_attempts
        )));
    }

    Ok(())
}
