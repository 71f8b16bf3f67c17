//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, queue capacity > 0)
//! - Check the executor commands are usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SiteConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::SiteConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address '{0}' is not a socket address")]
    BindAddress(String),

    #[error("observability.metrics_address '{0}' is not a socket address")]
    MetricsAddress(String),

    #[error("cache.queue_capacity must be greater than zero")]
    QueueCapacity,

    #[error("cache.output_dir must not be empty")]
    OutputDir,

    #[error("executor.toolchain must name a program")]
    Toolchain,

    #[error("executor.formatter must name a program when set")]
    Formatter,

    #[error("executor.scratch_dir must be a plain directory name, got '{0}'")]
    ScratchDir(String),

    #[error("watch.debounce_ms must be greater than zero")]
    Debounce,

    #[error("timeouts.request_secs must be greater than zero")]
    RequestTimeout,
}

/// Check a parsed configuration for semantic problems.
pub fn validate_config(config: &SiteConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if config.cache.queue_capacity == 0 {
        errors.push(ValidationError::QueueCapacity);
    }

    if config.cache.output_dir.as_os_str().is_empty() {
        errors.push(ValidationError::OutputDir);
    }

    if config.executor.toolchain.first().map_or(true, |p| p.trim().is_empty()) {
        errors.push(ValidationError::Toolchain);
    }

    if let Some(formatter) = &config.executor.formatter {
        if formatter.first().map_or(true, |p| p.trim().is_empty()) {
            errors.push(ValidationError::Formatter);
        }
    }

    let scratch = &config.executor.scratch_dir;
    if scratch.is_empty() || scratch.contains(['/', '\\']) || scratch == ".." || scratch == "." {
        errors.push(ValidationError::ScratchDir(scratch.clone()));
    }

    if config.watch.debounce_ms == 0 {
        errors.push(ValidationError::Debounce);
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::RequestTimeout);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&SiteConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = SiteConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.cache.queue_capacity = 0;
        config.executor.toolchain.clear();
        config.executor.scratch_dir = "../escape".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::QueueCapacity));
        assert!(errors.contains(&ValidationError::Toolchain));
    }
}
