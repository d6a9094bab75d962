//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID + trace layers)
//!     → guarded routes → orchestrator
//!     → ops.rs (health, stats, config, diagnostic scan)
//!     → response.rs (ErrorRecord → JSON response)
//!     → Send to client
//! ```

pub mod ops;
pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
