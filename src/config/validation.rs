//! Configuration validation.
//!
//! Serde handles syntax; this module checks values and references:
//! - value ranges (parallelism > 0, timeouts > 0)
//! - backend URL scheme
//! - access rule syntax
//! - scanner types known to the registry
//! - locale tags known to the classifier
//!
//! All problems are collected, not just the first.

use std::fmt;
use std::net::SocketAddr;

use url::Url;

use crate::config::schema::{GuardConfig, PipelineConfig};
use crate::locale::Locale;
use crate::scanner::registry::ScannerRegistry;
use crate::security::access_control::AccessRule;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration against the built-in scanner registry.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    validate_with_registry(config, &ScannerRegistry::builtin())
}

/// Validate a configuration; scanner types are checked against `registry`.
pub fn validate_with_registry(
    config: &GuardConfig,
    registry: &ScannerRegistry,
) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("invalid socket address {:?}", config.listener.bind_address),
        ));
    }
    if config.listener.max_body_size == 0 {
        errors.push(ValidationError::new("listener.max_body_size", "must be > 0"));
    }

    match Url::parse(&config.backend.url) {
        Ok(url) if url.scheme() == "http" => {}
        Ok(url) => errors.push(ValidationError::new(
            "backend.url",
            format!("unsupported scheme {:?} (plain http only)", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new("backend.url", e.to_string())),
    }
    if config.backend.request_timeout_secs == 0 {
        errors.push(ValidationError::new("backend.request_timeout_secs", "must be > 0"));
    }
    if config.backend.stream_idle_timeout_secs == 0 {
        errors.push(ValidationError::new("backend.stream_idle_timeout_secs", "must be > 0"));
    }

    if config.admission.max_parallel == 0 {
        errors.push(ValidationError::new("admission.max_parallel", "must be > 0"));
    }
    if config.admission.queue_timeout_ms == 0 {
        errors.push(ValidationError::new("admission.queue_timeout_ms", "must be > 0"));
    }

    for (field, rules) in [("access.allow", &config.access.allow), ("access.deny", &config.access.deny)] {
        for rule in rules {
            if let Err(e) = AccessRule::parse(rule) {
                errors.push(ValidationError::new(field, e.to_string()));
            }
        }
    }

    if config.scanners.timeout_ms == 0 {
        errors.push(ValidationError::new("scanners.timeout_ms", "must be > 0"));
    }
    validate_pipeline("scanners.input", &config.scanners.input, registry, &mut errors);
    validate_pipeline("scanners.output", &config.scanners.output, registry, &mut errors);

    if config.relay.max_segment_bytes == 0 {
        errors.push(ValidationError::new("relay.max_segment_bytes", "must be > 0"));
    }
    if config.relay.max_buffered_bytes < config.relay.max_segment_bytes {
        errors.push(ValidationError::new(
            "relay.max_buffered_bytes",
            "must not be smaller than relay.max_segment_bytes",
        ));
    }

    if Locale::from_tag(&config.locale.default).is_none() {
        errors.push(ValidationError::new(
            "locale.default",
            format!("unsupported locale {:?}", config.locale.default),
        ));
    }
    for tag in config.locale.messages.keys() {
        if Locale::from_tag(tag).is_none() {
            errors.push(ValidationError::new(
                "locale.messages",
                format!("unsupported locale {:?}", tag),
            ));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address {:?}", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_pipeline(
    field: &str,
    pipeline: &PipelineConfig,
    registry: &ScannerRegistry,
    errors: &mut Vec<ValidationError>,
) {
    let mut seen = std::collections::HashSet::new();
    for spec in &pipeline.scanners {
        if !registry.contains(&spec.kind) {
            errors.push(ValidationError::new(
                format!("{}.scanners", field),
                format!("unknown scanner type {:?}", spec.kind),
            ));
        }
        if !seen.insert(spec.display_name().to_string()) {
            errors.push(ValidationError::new(
                format!("{}.scanners", field),
                format!("duplicate scanner name {:?}", spec.display_name()),
            ));
        }
    }
}
