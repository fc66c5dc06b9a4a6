use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::protocol::ResponseData;
use crate::request_id::next_request_id;

/// Terminal outcome of one proxied fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// The host answered with `success: true`.
    Delivered(ResponseData),
    /// The host answered with `success: false` and this error message.
    Failed(String),
    /// The host answered with a response the worker cannot use.
    Malformed(String),
    /// No answer arrived before the deadline.
    TimedOut,
}

/// One in-flight proxied fetch awaiting its `FETCH_RESPONSE`.
///
/// `settle` consumes the request, so each one is resolved at most once.
#[derive(Debug)]
struct PendingRequest {
    url: String,
    registered_at: Instant,
    tx: oneshot::Sender<Settlement>,
    timer: Option<AbortHandle>,
}

impl PendingRequest {
    fn settle(self, request_id: &str, outcome: Settlement) {
        if !matches!(outcome, Settlement::TimedOut) {
            if let Some(timer) = &self.timer {
                timer.abort();
            }
        }

        tracing::debug!(
            request_id,
            url = %self.url,
            elapsed_ms = self.registered_at.elapsed().as_millis() as u64,
            outcome = outcome_label(&outcome),
            "pending request settled"
        );

        // The caller may have dropped its future; the outcome is then lost.
        let _ = self.tx.send(outcome);
    }

    fn discard(self) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
    }
}

fn outcome_label(outcome: &Settlement) -> &'static str {
    match outcome {
        Settlement::Delivered(_) => "delivered",
        Settlement::Failed(_) => "failed",
        Settlement::Malformed(_) => "malformed",
        Settlement::TimedOut => "timed_out",
    }
}

/// Table of in-flight proxied fetches keyed by request id.
///
/// Shared between the interceptor's message handler and each request's
/// timeout task. Every mutation is a single insert or remove under the lock;
/// removing an absent id is a no-op, so whichever of response and timeout
/// arrives second does nothing.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<String, PendingRequest>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new pending request under a fresh id and return the id
    /// with the receiver that will observe its settlement.
    ///
    /// An id that collides with a live entry is regenerated, so live ids are
    /// always unique.
    pub fn register(&self, url: &str) -> (String, oneshot::Receiver<Settlement>) {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.lock();

        let mut request_id = next_request_id();
        while entries.contains_key(&request_id) {
            request_id = next_request_id();
        }

        entries.insert(
            request_id.clone(),
            PendingRequest {
                url: url.to_string(),
                registered_at: Instant::now(),
                tx,
                timer: None,
            },
        );

        (request_id, rx)
    }

    /// Attach the timeout task to a registered request. If the request is
    /// already gone the timer is aborted immediately.
    pub fn attach_timer(&self, request_id: &str, timer: AbortHandle) {
        match self.lock().get_mut(request_id) {
            Some(entry) => entry.timer = Some(timer),
            None => timer.abort(),
        }
    }

    /// Settle and remove the request. Returns `false` if no live request has
    /// this id (already settled, timed out, or never registered).
    pub fn settle(&self, request_id: &str, outcome: Settlement) -> bool {
        // Release the lock before waking the waiter.
        let entry = self.lock().remove(request_id);
        match entry {
            Some(entry) => {
                entry.settle(request_id, outcome);
                true
            }
            None => false,
        }
    }

    /// Remove the request without settling it. The waiter observes a closed
    /// channel.
    pub fn discard(&self, request_id: &str) -> bool {
        let entry = self.lock().remove(request_id);
        match entry {
            Some(entry) => {
                entry.discard();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}
