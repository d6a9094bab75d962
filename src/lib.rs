//! Guarded inference proxy library.

// Request path
pub mod admission;
pub mod http;
pub mod orchestrator;
pub mod relay;
pub mod scanner;

// Policy
pub mod locale;
pub mod security;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::schema::GuardConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use orchestrator::Orchestrator;
