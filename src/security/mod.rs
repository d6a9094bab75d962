//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → access_control.rs (client origin against allow/deny rules)
//!     → Pass to body read and scanning
//! ```
//!
//! # Design Decisions
//! - Runs before the body is read: disallowed origins are never scanned
//! - Deny rules win over allow rules
//! - Forwarded-for headers are only trusted when configured

pub mod access_control;

pub use access_control::{AccessController, AccessDecision, AccessRule};
