//! Per-request lifecycle state machine.
//!
//! ```text
//! Received → AccessChecked → LanguageClassified → InputScanned
//!          → Admitted → Relaying → OutputScanned* → Completed
//!
//! any non-terminal state → Blocked | Failed | Rejected | Denied
//! ```

use std::fmt;
use std::time::Instant;

use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    AccessChecked,
    LanguageClassified,
    InputScanned,
    Admitted,
    Relaying,
    OutputScanned,
    Completed,
    Blocked,
    Failed,
    Rejected,
    Denied,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Completed
                | RequestState::Blocked
                | RequestState::Failed
                | RequestState::Rejected
                | RequestState::Denied
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Received => "received",
            RequestState::AccessChecked => "access_checked",
            RequestState::LanguageClassified => "language_classified",
            RequestState::InputScanned => "input_scanned",
            RequestState::Admitted => "admitted",
            RequestState::Relaying => "relaying",
            RequestState::OutputScanned => "output_scanned",
            RequestState::Completed => "completed",
            RequestState::Blocked => "blocked",
            RequestState::Failed => "failed",
            RequestState::Rejected => "rejected",
            RequestState::Denied => "denied",
        }
    }

    pub fn can_transition_to(&self, next: RequestState) -> bool {
        use RequestState::*;
        if self.is_terminal() {
            return false;
        }
        match next {
            AccessChecked => *self == Received,
            LanguageClassified => *self == AccessChecked,
            InputScanned => *self == LanguageClassified,
            Admitted => *self == InputScanned,
            Relaying => *self == Admitted,
            OutputScanned => matches!(self, Relaying | OutputScanned),
            Completed => matches!(self, Relaying | OutputScanned),
            Blocked | Failed | Rejected | Denied => true,
            Received => false,
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one request through its states and records the outcome once.
///
/// A lifecycle dropped before reaching a terminal state was cancelled by
/// the client; that is recorded as its own outcome.
#[derive(Debug)]
pub struct Lifecycle {
    request_id: String,
    state: RequestState,
    started: Instant,
    segments: u64,
}

impl Lifecycle {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            state: RequestState::Received,
            started: Instant::now(),
            segments: 0,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn segments(&self) -> u64 {
        self.segments
    }

    /// Move to `next`. Invalid transitions are logged and ignored.
    pub fn advance(&mut self, next: RequestState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                request_id = %self.request_id,
                from = %self.state,
                to = %next,
                "Invalid lifecycle transition"
            );
            return false;
        }
        if next == RequestState::OutputScanned {
            self.segments += 1;
        }
        tracing::debug!(
            request_id = %self.request_id,
            from = %self.state,
            to = %next,
            "Lifecycle transition"
        );
        self.state = next;
        if next.is_terminal() {
            metrics::record_request(next.as_str(), self.started);
        }
        true
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            tracing::debug!(
                request_id = %self.request_id,
                state = %self.state,
                "Request cancelled by client"
            );
            metrics::record_request("cancelled", self.started);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RequestState::*;

    #[test]
    fn test_happy_path() {
        let mut life = Lifecycle::new("r1");
        for next in [
            AccessChecked,
            LanguageClassified,
            InputScanned,
            Admitted,
            Relaying,
            OutputScanned,
            OutputScanned,
            Completed,
        ] {
            assert!(life.advance(next), "transition to {}", next);
        }
        assert_eq!(life.segments(), 2);
        assert!(life.state().is_terminal());
    }

    #[test]
    fn test_failure_from_any_state() {
        for state in [Received, AccessChecked, InputScanned, Admitted, Relaying, OutputScanned] {
            for terminal in [Blocked, Failed, Rejected, Denied] {
                assert!(state.can_transition_to(terminal));
            }
        }
    }

    #[test]
    fn test_invalid_transitions_are_ignored() {
        let mut life = Lifecycle::new("r2");
        assert!(!life.advance(Admitted));
        assert_eq!(life.state(), Received);

        assert!(life.advance(Denied));
        assert!(!life.advance(Failed));
        assert!(!life.advance(AccessChecked));
        assert_eq!(life.state(), Denied);

        assert!(!Received.can_transition_to(Completed));
    }
}
