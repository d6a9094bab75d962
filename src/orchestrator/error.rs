//! Error taxonomy and client-visible error records.

use std::collections::BTreeMap;
use std::fmt;

use axum::http::StatusCode;
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::admission::AdmissionError;
use crate::locale::Locale;
use crate::orchestrator::state::RequestState;
use crate::relay::UpstreamError;
use crate::scanner::verdict::ScannerSummary;
use crate::scanner::PipelineVerdict;

/// Machine-readable error code, the `error` field of an error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    AccessDenied,
    InvalidRequest,
    PromptBlocked,
    ResponseBlocked,
    AdmissionRejected,
    UpstreamError,
    ScannerError,
    InternalError,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 8] = [
        ErrorCode::AccessDenied,
        ErrorCode::InvalidRequest,
        ErrorCode::PromptBlocked,
        ErrorCode::ResponseBlocked,
        ErrorCode::AdmissionRejected,
        ErrorCode::UpstreamError,
        ErrorCode::ScannerError,
        ErrorCode::InternalError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AccessDenied => "access_denied",
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::PromptBlocked => "prompt_blocked",
            ErrorCode::ResponseBlocked => "response_blocked",
            ErrorCode::AdmissionRejected => "admission_rejected",
            ErrorCode::UpstreamError => "upstream_error",
            ErrorCode::ScannerError => "scanner_error",
            ErrorCode::InternalError => "internal_error",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Every way a request can end unsuccessfully.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("access denied: {reason}")]
    AccessDenied { reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("prompt blocked by {:?}", .0.failed_scanners())]
    PromptBlocked(PipelineVerdict),

    #[error("response blocked by {:?}", .0.failed_scanners())]
    ResponseBlocked(PipelineVerdict),

    /// Scanners failed to run and policy escalates that to a failure.
    #[error("scanners unavailable: {:?}", .0.failed_scanners())]
    ScannerUnavailable(PipelineVerdict),

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GuardError {
    /// Classify a failed pipeline run.
    pub fn from_verdict(verdict: PipelineVerdict, blocked: fn(PipelineVerdict) -> GuardError) -> Self {
        if verdict.failed_on_errors_only() {
            GuardError::ScannerUnavailable(verdict)
        } else {
            blocked(verdict)
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            GuardError::AccessDenied { .. } => ErrorCode::AccessDenied,
            GuardError::InvalidRequest(_) | GuardError::PayloadTooLarge { .. } => {
                ErrorCode::InvalidRequest
            }
            GuardError::PromptBlocked(_) => ErrorCode::PromptBlocked,
            GuardError::ResponseBlocked(_) => ErrorCode::ResponseBlocked,
            GuardError::ScannerUnavailable(_) => ErrorCode::ScannerError,
            GuardError::Admission(_) => ErrorCode::AdmissionRejected,
            GuardError::Upstream(_) => ErrorCode::UpstreamError,
            GuardError::Internal(_) => ErrorCode::InternalError,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GuardError::AccessDenied { .. } => StatusCode::FORBIDDEN,
            GuardError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GuardError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GuardError::PromptBlocked(_) | GuardError::ResponseBlocked(_) => StatusCode::BAD_REQUEST,
            GuardError::ScannerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GuardError::Admission(AdmissionError::QueueFull) => StatusCode::TOO_MANY_REQUESTS,
            GuardError::Admission(_) => StatusCode::SERVICE_UNAVAILABLE,
            GuardError::Upstream(e) => e.status(),
            GuardError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Terminal lifecycle state this error ends in.
    pub fn terminal_state(&self) -> RequestState {
        match self {
            GuardError::AccessDenied { .. } => RequestState::Denied,
            GuardError::PromptBlocked(_) | GuardError::ResponseBlocked(_) => RequestState::Blocked,
            GuardError::Admission(_) => RequestState::Rejected,
            GuardError::InvalidRequest(_)
            | GuardError::PayloadTooLarge { .. }
            | GuardError::ScannerUnavailable(_)
            | GuardError::Upstream(_)
            | GuardError::Internal(_) => RequestState::Failed,
        }
    }

    pub fn verdict(&self) -> Option<&PipelineVerdict> {
        match self {
            GuardError::PromptBlocked(v)
            | GuardError::ResponseBlocked(v)
            | GuardError::ScannerUnavailable(v) => Some(v),
            _ => None,
        }
    }

    /// Value of `details.reason`, when one is safe to show.
    fn detail_reason(&self) -> Option<String> {
        match self {
            GuardError::InvalidRequest(reason) => Some(reason.clone()),
            GuardError::PayloadTooLarge { limit } => Some(format!("body exceeds {} bytes", limit)),
            GuardError::Admission(e) => Some(e.reason().to_string()),
            GuardError::Upstream(e) => Some(e.to_string()),
            _ => None,
        }
    }
}

/// `details` object of an error body.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scanners: Option<BTreeMap<String, ScannerSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The only state returned to a client on failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub error: ErrorCode,
    pub message: String,
    pub language: Locale,
    pub details: ErrorDetails,
    #[serde(skip)]
    pub status: StatusCode,
    /// Seconds for the Retry-After header.
    #[serde(skip)]
    pub retry_after: Option<u64>,
}

impl ErrorRecord {
    /// Build the record for `error`; `message` is already localized.
    pub fn new(error: &GuardError, message: String, language: Locale, retry_after: u64) -> Self {
        let retry_after = match error {
            GuardError::Admission(_) => Some(retry_after),
            GuardError::ScannerUnavailable(_) => Some(retry_after),
            _ => None,
        };
        Self {
            error: error.code(),
            message,
            language,
            details: ErrorDetails {
                scanners: error.verdict().map(PipelineVerdict::summary),
                reason: error.detail_reason(),
            },
            status: error.status(),
            retry_after,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!("{{\"error\":\"{}\"}}", self.error.as_str())
        })
    }
}
