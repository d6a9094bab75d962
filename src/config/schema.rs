//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the guarded inference proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// Inference backend the guard forwards to.
    pub backend: BackendConfig,

    /// Concurrency pool and wait queue in front of the backend.
    pub admission: AdmissionConfig,

    /// Client network origin filtering.
    pub access: AccessConfig,

    /// Input and output scanner pipelines.
    pub scanners: ScannersConfig,

    /// Response relay behaviour.
    pub relay: RelayConfig,

    /// Locale detection and error message templates.
    pub locale: LocaleConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum accepted request body in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Backend inference service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL, e.g. "http://127.0.0.1:11434". Request paths are appended as-is.
    pub url: String,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Time allowed for the backend to produce response headers, in seconds.
    pub request_timeout_secs: u64,

    /// Maximum silence between two streamed chunks, in seconds.
    pub stream_idle_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:11434".to_string(),
            connect_timeout_secs: 5,
            request_timeout_secs: 120,
            stream_idle_timeout_secs: 60,
        }
    }
}

/// Admission control.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Maximum concurrent backend calls.
    pub max_parallel: usize,

    /// Maximum number of waiting requests. `"unbounded"` in the file maps to `None`.
    #[serde(with = "queue_limit")]
    pub max_queue: Option<usize>,

    /// How long a request may wait for a slot, in milliseconds.
    pub queue_timeout_ms: u64,

    /// Value of the Retry-After header on backpressure responses.
    pub retry_after_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            max_queue: Some(64),
            queue_timeout_ms: 30_000,
            retry_after_secs: 5,
        }
    }
}

mod queue_limit {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Depth(usize),
        Word(String),
    }

    pub fn serialize<S: Serializer>(value: &Option<usize>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(depth) => s.serialize_u64(*depth as u64),
            None => s.serialize_str("unbounded"),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<usize>, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Depth(depth) => Ok(Some(depth)),
            Raw::Word(word) if word == "unbounded" => Ok(None),
            Raw::Word(word) => Err(serde::de::Error::custom(format!(
                "max_queue must be a number or \"unbounded\", got {:?}",
                word
            ))),
        }
    }
}

/// IP allow/deny lists. Entries are exact addresses or CIDR ranges.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AccessConfig {
    pub allow: Vec<String>,
    pub deny: Vec<String>,

    /// Take the client address from X-Forwarded-For / X-Real-IP.
    /// Only enable behind a load balancer that overwrites these headers.
    pub trust_forwarded_for: bool,
}

/// Pipeline failure policy.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    /// Stop at the first failing scanner.
    #[default]
    FailFast,
    /// Run every scanner and report every verdict.
    FailComplete,
}

/// One configured scanner.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScannerSpec {
    /// Registry key, e.g. "BanSubstrings".
    #[serde(rename = "type")]
    pub kind: String,

    /// Name reported in verdicts. Defaults to the type.
    #[serde(default)]
    pub name: Option<String>,

    /// Advisory scanners are reported but never fail the pipeline.
    #[serde(default)]
    pub advisory: bool,

    /// Scanner specific options.
    #[serde(default)]
    pub options: serde_json::Value,
}

impl ScannerSpec {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.kind)
    }
}

/// Ordering and policy of one pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub scanners: Vec<ScannerSpec>,
    pub fail_mode: FailMode,
    /// Treat a scanner that could not run as a failure.
    pub block_on_scanner_error: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scanners: Vec::new(),
            fail_mode: FailMode::FailFast,
            block_on_scanner_error: false,
        }
    }
}

/// Scanner pipelines.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScannersConfig {
    /// Per-scanner execution timeout in milliseconds.
    pub timeout_ms: u64,
    pub input: PipelineConfig,
    pub output: PipelineConfig,
}

impl Default for ScannersConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2_000,
            input: PipelineConfig::default(),
            output: PipelineConfig::default(),
        }
    }
}

/// What happens to a response once output scanning fails.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AbortMode {
    /// Keep what was already forwarded, end the stream with an error record.
    #[default]
    Soft,
    /// Buffer the whole response and replace it with an error record.
    Hard,
}

/// Relay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    pub abort_mode: AbortMode,

    /// Upper bound for a buffered (non-streaming or hard-abort) response.
    pub max_buffered_bytes: usize,

    /// Upper bound for one stream segment.
    pub max_segment_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            abort_mode: AbortMode::Soft,
            max_buffered_bytes: 8 * 1024 * 1024,
            max_segment_bytes: 64 * 1024,
        }
    }
}

/// Locale detection and message templates.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LocaleConfig {
    /// Locale used when the prompt carries no strong signal.
    pub default: String,

    /// Minimum count of locale-defining characters.
    pub min_signal_chars: usize,

    /// Overrides: locale tag -> error code -> template.
    pub messages: HashMap<String, HashMap<String, String>>,
}

impl Default for LocaleConfig {
    fn default() -> Self {
        Self {
            default: "en".to_string(),
            min_signal_chars: 2,
            messages: HashMap::new(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
