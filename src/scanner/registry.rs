//! Scanner type registry.
//!
//! Maps the `type` of a configured scanner to a constructor. Pipelines are
//! assembled from the registry once at startup; an unknown type or bad
//! options abort startup with a `ConfigError`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::config::{ConfigError, PipelineConfig, ScannersConfig};
use crate::scanner::builtin::{BanSubstrings, InvisibleText, RegexScanner, TokenLimit};
use crate::scanner::pipeline::{PipelineEntry, PipelineKind, ScannerPipeline, ScannerSet};
use crate::scanner::remote::RemoteScanner;
use crate::scanner::Scanner;

/// Builds a scanner from its `options` table.
pub type Constructor = fn(&serde_json::Value) -> Result<Arc<dyn Scanner>, String>;

#[derive(Clone)]
pub struct ScannerRegistry {
    constructors: HashMap<&'static str, Constructor>,
}

impl ScannerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with every built-in scanner type.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("BanSubstrings", |o| Ok(Arc::new(BanSubstrings::from_options(o)?)));
        registry.register("Regex", |o| Ok(Arc::new(RegexScanner::from_options(o)?)));
        registry.register("TokenLimit", |o| Ok(Arc::new(TokenLimit::from_options(o)?)));
        registry.register("InvisibleText", |o| Ok(Arc::new(InvisibleText::from_options(o)?)));
        registry.register("Remote", |o| Ok(Arc::new(RemoteScanner::from_options(o)?)));
        registry
    }

    /// Add or replace a scanner type.
    pub fn register(&mut self, kind: &'static str, constructor: Constructor) {
        self.constructors.insert(kind, constructor);
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.constructors.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// Construct one scanner.
    pub fn build(&self, kind: &str, options: &serde_json::Value) -> Result<Arc<dyn Scanner>, String> {
        let constructor = self
            .constructors
            .get(kind)
            .ok_or_else(|| format!("unknown scanner type {:?}", kind))?;
        constructor(options)
    }

    /// Construct the ordered pipeline for one direction.
    pub fn build_pipeline(
        &self,
        kind: PipelineKind,
        config: &PipelineConfig,
        timeout: Duration,
    ) -> Result<ScannerPipeline, ConfigError> {
        let mut entries = Vec::with_capacity(config.scanners.len());
        for spec in &config.scanners {
            let name = spec.display_name().to_string();
            let scanner = self
                .build(&spec.kind, &spec.options)
                .map_err(|reason| ConfigError::Scanner {
                    name: name.clone(),
                    reason,
                })?;
            entries.push(PipelineEntry {
                name,
                advisory: spec.advisory,
                scanner,
            });
        }

        tracing::info!(
            pipeline = %kind,
            scanners = ?entries.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            fail_mode = ?config.fail_mode,
            "Scanner pipeline built"
        );

        Ok(ScannerPipeline::new(
            kind,
            entries,
            config.fail_mode,
            config.block_on_scanner_error,
            timeout,
        ))
    }

    /// Construct both pipelines.
    pub fn build_set(&self, config: &ScannersConfig) -> Result<ScannerSet, ConfigError> {
        let timeout = Duration::from_millis(config.timeout_ms);
        Ok(ScannerSet {
            input: self.build_pipeline(PipelineKind::Input, &config.input, timeout)?,
            output: self.build_pipeline(PipelineKind::Output, &config.output, timeout)?,
        })
    }
}

impl Default for ScannerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl std::fmt::Debug for ScannerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScannerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Decode a scanner's options table; a missing table is an empty one.
pub fn parse_options<T: DeserializeOwned>(options: &serde_json::Value) -> Result<T, String> {
    let value = if options.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        options.clone()
    };
    serde_json::from_value(value).map_err(|e| e.to_string())
}
