//! Ordered scanner execution.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::FailMode;
use crate::observability::metrics;
use crate::scanner::verdict::{PipelineVerdict, ScanVerdict};
use crate::scanner::{Scanner, ScannerError};

/// Which direction a pipeline guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    Input,
    Output,
}

impl PipelineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::Input => "input",
            PipelineKind::Output => "output",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scanner in its configured slot.
#[derive(Clone)]
pub struct PipelineEntry {
    pub name: String,
    pub advisory: bool,
    pub scanner: Arc<dyn Scanner>,
}

impl fmt::Debug for PipelineEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineEntry")
            .field("name", &self.name)
            .field("advisory", &self.advisory)
            .finish()
    }
}

/// Immutable, ordered set of scanners for one direction.
#[derive(Debug, Clone)]
pub struct ScannerPipeline {
    kind: PipelineKind,
    entries: Vec<PipelineEntry>,
    fail_mode: FailMode,
    block_on_scanner_error: bool,
    timeout: Duration,
}

impl ScannerPipeline {
    pub fn new(
        kind: PipelineKind,
        entries: Vec<PipelineEntry>,
        fail_mode: FailMode,
        block_on_scanner_error: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            kind,
            entries,
            fail_mode,
            block_on_scanner_error,
            timeout,
        }
    }

    /// A pipeline with no scanners; every text passes.
    pub fn disabled(kind: PipelineKind) -> Self {
        Self::new(kind, Vec::new(), FailMode::FailFast, false, Duration::from_secs(1))
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn scanner_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Run with the configured failure policy.
    pub async fn evaluate(&self, text: &str) -> PipelineVerdict {
        self.evaluate_with(text, self.fail_mode).await
    }

    /// Run with an explicit failure policy.
    pub async fn evaluate_with(&self, text: &str, mode: FailMode) -> PipelineVerdict {
        let mut current: Cow<'_, str> = Cow::Borrowed(text);
        let mut verdicts = Vec::with_capacity(self.entries.len());
        let mut passed = true;

        for entry in &self.entries {
            let verdict = self.run_one(entry, &current).await;
            metrics::record_scan(self.kind.as_str(), &entry.name, &verdict);

            if verdict.passed {
                if let Some(sanitized) = &verdict.sanitized {
                    current = Cow::Owned(sanitized.clone());
                }
            }

            let blocking = verdict.is_blocking();
            verdicts.push(verdict);
            if blocking {
                passed = false;
                if mode == FailMode::FailFast {
                    break;
                }
            }
        }

        let sanitized = match current {
            Cow::Owned(text) => Some(text),
            Cow::Borrowed(_) => None,
        };

        PipelineVerdict {
            kind: self.kind,
            passed,
            verdicts,
            sanitized,
        }
    }

    async fn run_one(&self, entry: &PipelineEntry, text: &str) -> ScanVerdict {
        let result = match tokio::time::timeout(self.timeout, entry.scanner.check(text)).await {
            Ok(result) => result,
            Err(_) => Err(ScannerError::Timeout(self.timeout.as_millis() as u64)),
        };

        match result {
            Ok(outcome) => ScanVerdict {
                scanner: entry.name.clone(),
                passed: outcome.passed,
                reason: outcome.reason,
                sanitized: outcome.sanitized,
                advisory: entry.advisory,
                errored: false,
            },
            Err(e) => {
                // never a silent pass: the error is logged whichever way policy goes
                tracing::warn!(
                    pipeline = %self.kind,
                    scanner = %entry.name,
                    error = %e,
                    blocking = self.block_on_scanner_error,
                    "Scanner execution failed"
                );
                ScanVerdict {
                    scanner: entry.name.clone(),
                    passed: !self.block_on_scanner_error,
                    reason: Some(e.to_string()),
                    sanitized: None,
                    advisory: entry.advisory,
                    errored: true,
                }
            }
        }
    }
}

/// Both pipelines, selected by kind.
#[derive(Debug, Clone)]
pub struct ScannerSet {
    pub input: ScannerPipeline,
    pub output: ScannerPipeline,
}

impl ScannerSet {
    pub fn pipeline(&self, kind: PipelineKind) -> &ScannerPipeline {
        match kind {
            PipelineKind::Input => &self.input,
            PipelineKind::Output => &self.output,
        }
    }

    pub async fn evaluate(&self, text: &str, kind: PipelineKind) -> PipelineVerdict {
        self.pipeline(kind).evaluate(text).await
    }
}
