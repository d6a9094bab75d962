//! Bounded concurrency pool with a bounded FIFO wait queue.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::admission::ticket::{AdmissionTicket, QueuePlace};
use crate::admission::AdmissionError;
use crate::config::AdmissionConfig;
use crate::observability::metrics;

/// Shared counters, updated by the controller and by tickets.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) active: AtomicUsize,
    pub(crate) peak_active: AtomicUsize,
    pub(crate) queued: AtomicUsize,
    pub(crate) total_admitted: AtomicU64,
    pub(crate) rejected_queue_full: AtomicU64,
    pub(crate) rejected_queue_timeout: AtomicU64,
    next_ticket: AtomicU64,
}

/// Point-in-time snapshot of the controller.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AdmissionStats {
    pub active: usize,
    pub peak_active: usize,
    pub queued: usize,
    pub total_admitted: u64,
    pub total_rejected: u64,
    pub rejected_queue_full: u64,
    pub rejected_queue_timeout: u64,
    pub max_parallel: usize,
    /// `None` when the queue is unbounded.
    pub max_queue: Option<usize>,
}

#[derive(Debug)]
pub struct AdmissionController {
    slots: Arc<Semaphore>,
    counters: Arc<Counters>,
    max_parallel: usize,
    max_queue: Option<usize>,
}

impl AdmissionController {
    pub fn new(max_parallel: usize, max_queue: Option<usize>) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_parallel)),
            counters: Arc::new(Counters::default()),
            max_parallel,
            max_queue,
        }
    }

    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self::new(config.max_parallel, config.max_queue)
    }

    /// Obtain a slot, waiting in FIFO order until `deadline` at most.
    ///
    /// Returns `QueueFull` without suspending when the queue is at capacity.
    /// Dropping the returned future while it waits gives up the queue place;
    /// the slot is then never granted to this caller.
    pub async fn acquire(&self, deadline: Instant) -> Result<AdmissionTicket, AdmissionError> {
        let enqueued_at = Instant::now();

        // fast path; fails whenever earlier waiters exist
        if let Ok(permit) = self.slots.clone().try_acquire_owned() {
            return Ok(self.grant(permit, enqueued_at));
        }
        if self.slots.is_closed() {
            return Err(AdmissionError::Closed);
        }

        let Some(place) = QueuePlace::try_reserve(&self.counters, self.max_queue) else {
            self.counters.rejected_queue_full.fetch_add(1, Ordering::Relaxed);
            metrics::record_admission_rejected(AdmissionError::QueueFull.reason());
            tracing::debug!(
                queued = self.counters.queued.load(Ordering::Relaxed),
                "Admission queue full"
            );
            return Err(AdmissionError::QueueFull);
        };
        self.publish_load();

        let waited = tokio::time::timeout_at(deadline, self.slots.clone().acquire_owned()).await;
        drop(place);

        match waited {
            Ok(Ok(permit)) => Ok(self.grant(permit, enqueued_at)),
            Ok(Err(_closed)) => {
                self.publish_load();
                Err(AdmissionError::Closed)
            }
            Err(_elapsed) => {
                self.counters.rejected_queue_timeout.fetch_add(1, Ordering::Relaxed);
                metrics::record_admission_rejected(AdmissionError::QueueTimeout.reason());
                self.publish_load();
                tracing::debug!(
                    waited_ms = enqueued_at.elapsed().as_millis() as u64,
                    "Admission queue timeout"
                );
                Err(AdmissionError::QueueTimeout)
            }
        }
    }

    /// Explicit release; equivalent to dropping the ticket.
    pub fn release(&self, ticket: AdmissionTicket) {
        ticket.release();
    }

    /// Reject every waiter and all future callers.
    pub fn close(&self) {
        self.slots.close();
    }

    fn grant(&self, permit: OwnedSemaphorePermit, enqueued_at: Instant) -> AdmissionTicket {
        let active = self.counters.active.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters.peak_active.fetch_max(active, Ordering::Relaxed);
        self.counters.total_admitted.fetch_add(1, Ordering::Relaxed);
        let id = self.counters.next_ticket.fetch_add(1, Ordering::Relaxed);
        let waited = enqueued_at.elapsed();

        self.publish_load();
        tracing::debug!(
            ticket = id,
            active,
            waited_ms = waited.as_millis() as u64,
            "Admission ticket granted"
        );
        AdmissionTicket::new(id, waited, permit, self.counters.clone())
    }

    fn publish_load(&self) {
        metrics::record_admission_load(
            self.counters.active.load(Ordering::Relaxed),
            self.counters.queued.load(Ordering::Relaxed),
        );
    }

    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::Acquire)
    }

    pub fn queued(&self) -> usize {
        self.counters.queued.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> AdmissionStats {
        let c = &self.counters;
        let rejected_queue_full = c.rejected_queue_full.load(Ordering::Relaxed);
        let rejected_queue_timeout = c.rejected_queue_timeout.load(Ordering::Relaxed);
        AdmissionStats {
            active: c.active.load(Ordering::Relaxed),
            peak_active: c.peak_active.load(Ordering::Relaxed),
            queued: c.queued.load(Ordering::Relaxed),
            total_admitted: c.total_admitted.load(Ordering::Relaxed),
            total_rejected: rejected_queue_full + rejected_queue_timeout,
            rejected_queue_full,
            rejected_queue_timeout,
            max_parallel: self.max_parallel,
            max_queue: self.max_queue,
        }
    }
}
