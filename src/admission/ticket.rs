//! Admission tickets.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OwnedSemaphorePermit;

use crate::admission::controller::Counters;

/// Lifecycle of a ticket. A queued ticket is the pending `acquire`
/// future itself; the value handed out is always `Active` until released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketState {
    Queued,
    Active,
    Released,
}

/// A granted concurrency slot.
///
/// The slot is returned when the ticket is released or dropped, whichever
/// happens first. Releasing twice is impossible: `release` consumes the
/// ticket and `Drop` only acts on a ticket still holding its permit.
#[derive(Debug)]
pub struct AdmissionTicket {
    id: u64,
    waited: Duration,
    permit: Option<OwnedSemaphorePermit>,
    counters: Arc<Counters>,
}

impl AdmissionTicket {
    pub(crate) fn new(
        id: u64,
        waited: Duration,
        permit: OwnedSemaphorePermit,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            id,
            waited,
            permit: Some(permit),
            counters,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Time spent queued before the slot was granted.
    pub fn waited(&self) -> Duration {
        self.waited
    }

    pub fn state(&self) -> TicketState {
        if self.permit.is_some() {
            TicketState::Active
        } else {
            TicketState::Released
        }
    }

    /// Return the slot now.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(permit) = self.permit.take() {
            let active = self.counters.active.fetch_sub(1, Ordering::AcqRel) - 1;
            // decrement before the slot is handed on so `active` never overshoots
            drop(permit);
            crate::observability::metrics::record_admission_load(
                active,
                self.counters.queued.load(Ordering::Acquire),
            );
            tracing::debug!(ticket = self.id, active, "Admission ticket released");
        }
    }
}

impl Drop for AdmissionTicket {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// A place in the wait queue; frees the place when dropped.
pub(crate) struct QueuePlace {
    counters: Arc<Counters>,
}

impl QueuePlace {
    /// Reserve a place unless `limit` places are taken.
    pub(crate) fn try_reserve(counters: &Arc<Counters>, limit: Option<usize>) -> Option<Self> {
        let mut prev = counters.queued.load(Ordering::Relaxed);
        loop {
            if limit.is_some_and(|max| prev >= max) {
                return None;
            }
            match counters.queued.compare_exchange_weak(
                prev,
                prev + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }
        Some(Self {
            counters: counters.clone(),
        })
    }
}

impl Drop for QueuePlace {
    fn drop(&mut self) {
        self.counters.queued.fetch_sub(1, Ordering::AcqRel);
    }
}
