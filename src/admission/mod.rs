//! Admission control in front of the backend.
//!
//! # Data Flow
//! ```text
//! acquire(deadline)
//!     → free slot?              → AdmissionTicket (active)
//!     → queue at capacity?      → AdmissionError::QueueFull (no wait)
//!     → wait in FIFO order      → AdmissionTicket (active)
//!                               → AdmissionError::QueueTimeout at the deadline
//! ticket dropped / released     → slot returned, exactly once
//! ```
//!
//! # Design Decisions
//! - Slots are a fair tokio `Semaphore`; waiters are served in enqueue order
//!   and a newcomer cannot take a slot ahead of a waiter
//! - The queue depth is a separate atomic with a CAS bound check
//! - Tickets and queue places are RAII guards, so a dropped request future
//!   (client disconnect) can neither leak a slot nor be granted one later
//! - Counters are atomics; stats reads never block admission

pub mod controller;
pub mod ticket;

use thiserror::Error;

pub use controller::{AdmissionController, AdmissionStats};
pub use ticket::{AdmissionTicket, TicketState};

/// Backpressure outcomes of `acquire`.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("admission queue is full")]
    QueueFull,

    #[error("timed out waiting for an admission slot")]
    QueueTimeout,

    /// The controller was closed for shutdown.
    #[error("admission controller is closed")]
    Closed,
}

impl AdmissionError {
    /// Value reported as `details.reason`.
    pub fn reason(&self) -> &'static str {
        match self {
            AdmissionError::QueueFull => "queue_full",
            AdmissionError::QueueTimeout => "queue_timeout",
            AdmissionError::Closed => "shutting_down",
        }
    }
}
