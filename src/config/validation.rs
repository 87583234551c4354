//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ratios in range)
//! - Validate endpoints and addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{AppConfig, BatchSettings, MetricsMode};
use crate::observability::resource::parse_attributes;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.service.name.trim().is_empty() {
        errors.push(ValidationError::new("service.name", "must not be empty"));
    }
    if let Err(message) = parse_attributes(&config.service.resource_attributes) {
        errors.push(ValidationError::new("service.resource_attributes", message));
    }

    check_url(&mut errors, "collector.endpoint", &config.collector.endpoint);
    if config.collector.timeout_ms == 0 {
        errors.push(ValidationError::new("collector.timeout_ms", "must be greater than 0"));
    }

    check_batch(&mut errors, "logging.batch", &config.logging.batch);
    if let Some(loki) = &config.logging.loki {
        check_url(&mut errors, "logging.loki.endpoint", &loki.endpoint);
    }

    if !(0.0..=1.0).contains(&config.tracing.sampling_ratio) {
        errors.push(ValidationError::new("tracing.sampling_ratio", "must be between 0.0 and 1.0"));
    }
    check_batch(&mut errors, "tracing.batch", &config.tracing.batch);

    if config.metrics.enabled {
        match config.metrics.mode {
            MetricsMode::Push => {
                check_url(&mut errors, "metrics.push_endpoint", &config.metrics.push_endpoint);
                if config.metrics.export_interval_ms == 0 {
                    errors.push(ValidationError::new("metrics.export_interval_ms", "must be greater than 0"));
                }
                if config.metrics.runtime_stats_interval_ms == 0 {
                    errors.push(ValidationError::new(
                        "metrics.runtime_stats_interval_ms",
                        "must be greater than 0",
                    ));
                }
            }
            MetricsMode::Pull => {
                check_addr(&mut errors, "metrics.scrape_address", &config.metrics.scrape_address);
            }
        }
        if config.metrics.export_timeout_ms == 0 {
            errors.push(ValidationError::new("metrics.export_timeout_ms", "must be greater than 0"));
        }
    }

    if config.lifecycle.shutdown_timeout_secs == 0 {
        errors.push(ValidationError::new("lifecycle.shutdown_timeout_secs", "must be greater than 0"));
    }

    check_addr(&mut errors, "server.bind_address", &config.server.bind_address);
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::new("server.request_timeout_secs", "must be greater than 0"));
    }

    check_url(&mut errors, "client.endpoint", &config.client.endpoint);
    if config.client.timeout_secs == 0 {
        errors.push(ValidationError::new("client.timeout_secs", "must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_url(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    match reqwest::Url::parse(value) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => errors.push(ValidationError::new(
            field,
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new(field, format!("invalid URL '{}': {}", value, e))),
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("invalid socket address '{}'", value)));
    }
}

fn check_batch(errors: &mut Vec<ValidationError>, field: &str, batch: &BatchSettings) {
    if batch.max_batch_size == 0 {
        errors.push(ValidationError::new(format!("{}.max_batch_size", field), "must be greater than 0"));
    }
    if batch.max_queue_size < batch.max_batch_size {
        errors.push(ValidationError::new(
            format!("{}.max_queue_size", field),
            "must be at least max_batch_size",
        ));
    }
    if batch.scheduled_delay_ms == 0 {
        errors.push(ValidationError::new(
            format!("{}.scheduled_delay_ms", field),
            "must be greater than 0",
        ));
    }
}
