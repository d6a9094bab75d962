//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is loaded once before serving traffic and never mutated
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AbortMode, AccessConfig, AdmissionConfig, BackendConfig, FailMode, GuardConfig, ListenerConfig,
    LocaleConfig, LogFormat, ObservabilityConfig, PipelineConfig, RelayConfig, ScannerSpec,
    ScannersConfig,
};
