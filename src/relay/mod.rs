//! Backend forwarding and response-side scanning.
//!
//! # Data Flow
//! ```text
//! BackendRequest + AdmissionTicket
//!     → backend.rs (single outbound call, headers bounded by request timeout)
//!     → segment.rs (framing: SSE / NDJSON lines, or one whole-body segment)
//!     → stream.rs (output pipeline on the accumulated text, per segment)
//!     → RelayEvent stream (forwarded / redacted / aborted / upstream failure)
//! ```
//!
//! # Design Decisions
//! - The ticket travels with the response stream and is released when the
//!   backend side is finished, or dropped with the stream on disconnect
//! - Scanning is a per-segment transform plus an explicit abort signal
//! - Soft abort is streamed; hard abort buffers and decides before the
//!   first byte reaches the client
//! - The relay never formats client-visible errors; it reports events and
//!   the orchestrator renders them

pub mod backend;
pub mod segment;
pub mod stream;

use axum::http::StatusCode;
use thiserror::Error;

pub use backend::{content_coding, Backend, BackendRequest, BackendResponse, HttpBackend};
pub use segment::{Framing, StreamSegment};
pub use stream::{EventStream, RelayError, RelayEvent, RelayResponse, SegmentAction, StreamingRelay};

/// Backend-side failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("backend connection failed: {0}")]
    Connect(String),

    #[error("backend returned {0}")]
    Status(StatusCode),

    #[error("backend did not respond in time")]
    Timeout,

    #[error("backend stream failed: {0}")]
    Stream(String),

    #[error("backend response exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("could not build backend request: {0}")]
    InvalidRequest(String),

    #[error("backend response uses content coding {0}")]
    UnsupportedEncoding(String),
}

impl UpstreamError {
    /// 504 for timeouts, 502 otherwise.
    pub fn status(&self) -> StatusCode {
        match self {
            UpstreamError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}
