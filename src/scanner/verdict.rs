//! Scan results.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::scanner::pipeline::PipelineKind;

/// What a scanner reports about one text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub passed: bool,
    pub reason: Option<String>,
    /// Replacement text when the scanner rewrote its input.
    pub sanitized: Option<String>,
}

impl ScanOutcome {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
            sanitized: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
            sanitized: None,
        }
    }

    pub fn sanitized(text: String, reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            reason: Some(reason.into()),
            sanitized: Some(text),
        }
    }
}

/// Per-scanner result inside a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct ScanVerdict {
    pub scanner: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip)]
    pub sanitized: Option<String>,
    /// Reported, never blocking.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub advisory: bool,
    /// The scanner did not run to completion.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub errored: bool,
}

impl ScanVerdict {
    /// A failure that counts against the pipeline.
    pub fn is_blocking(&self) -> bool {
        !self.passed && !self.advisory
    }
}

/// Entry of the `details.scanners` map in error bodies.
#[derive(Debug, Clone, Serialize)]
pub struct ScannerSummary {
    pub passed: bool,
    pub reason: Option<String>,
}

/// Aggregate of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineVerdict {
    pub kind: PipelineKind,
    pub passed: bool,
    pub verdicts: Vec<ScanVerdict>,
    /// Text after all sanitizers ran, if any changed it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sanitized: Option<String>,
}

impl PipelineVerdict {
    pub fn empty(kind: PipelineKind) -> Self {
        Self {
            kind,
            passed: true,
            verdicts: Vec::new(),
            sanitized: None,
        }
    }

    /// Names of the scanners that failed the pipeline.
    pub fn failed_scanners(&self) -> Vec<&str> {
        self.verdicts
            .iter()
            .filter(|v| v.is_blocking())
            .map(|v| v.scanner.as_str())
            .collect()
    }

    /// True when the pipeline failed and every blocking failure was an
    /// execution error rather than a content finding.
    pub fn failed_on_errors_only(&self) -> bool {
        !self.passed
            && self
                .verdicts
                .iter()
                .filter(|v| v.is_blocking())
                .all(|v| v.errored)
    }

    pub fn summary(&self) -> BTreeMap<String, ScannerSummary> {
        self.verdicts
            .iter()
            .map(|v| {
                (
                    v.scanner.clone(),
                    ScannerSummary {
                        passed: v.passed,
                        reason: v.reason.clone(),
                    },
                )
            })
            .collect()
    }
}
