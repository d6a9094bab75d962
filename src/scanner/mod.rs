//! Content scanning subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     ScannerSpec[] (config)
//!     → registry.rs (type name → constructor)
//!     → pipeline.rs (ordered, immutable ScannerPipeline per direction)
//!
//! Per request:
//!     text → ScannerSet::evaluate(text, kind)
//!         → each Scanner::check in order (bounded by the scanner timeout)
//!         → PipelineVerdict (verdict.rs)
//! ```
//!
//! # Design Decisions
//! - Pipelines are built once; the hot path only walks a Vec of Arc'd scanners
//! - A scanner that fails to run is distinct from a content failure
//! - Sanitizers chain: each scanner sees the previous scanner's output
//! - Pipelines hold no per-request state and are shared across tasks

pub mod builtin;
pub mod pipeline;
pub mod registry;
pub mod remote;
pub mod verdict;

use async_trait::async_trait;
use thiserror::Error;

pub use pipeline::{PipelineKind, ScannerPipeline, ScannerSet};
pub use registry::ScannerRegistry;
pub use verdict::{PipelineVerdict, ScanOutcome, ScanVerdict};

/// A scanner could not produce a verdict.
#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("scanner timed out after {0} ms")]
    Timeout(u64),

    #[error("remote scanner request failed: {0}")]
    Remote(String),

    #[error("scanner failed: {0}")]
    Execution(String),
}

/// One content check.
#[async_trait]
pub trait Scanner: Send + Sync {
    async fn check(&self, text: &str) -> Result<ScanOutcome, ScannerError>;
}
