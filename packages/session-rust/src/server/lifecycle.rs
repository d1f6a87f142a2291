//! Acceptance gate for the server adapter.
//!
//! Transport threads read the state on every inbound message, so it lives in
//! an `ArcSwap`. Requests handed to the handler hold an [`InFlightGuard`]
//! until their response is sent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

/// Server adapter state.
///
/// State machine: Starting -> Running -> Closed. Closed is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Opened but not yet accepting messages.
    Starting,
    /// Accepting messages and invoking the request handler.
    Running,
    /// Rejecting every message.
    Closed,
}

/// Gates message acceptance and counts requests still being handled.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: ArcSwap<AdapterState>,
    in_flight: Arc<AtomicU64>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(AdapterState::Starting),
            in_flight: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Moves `Starting` to `Running`. A closed adapter stays closed.
    ///
    /// Returns `true` if the adapter is running afterwards.
    pub(crate) fn start(&self) -> bool {
        let previous = self.state.rcu(|state| match **state {
            AdapterState::Starting => Arc::new(AdapterState::Running),
            _ => Arc::clone(state),
        });
        *previous != AdapterState::Closed
    }

    /// Moves to `Closed`. Returns `false` if already closed.
    pub(crate) fn close(&self) -> bool {
        let previous = self.state.swap(Arc::new(AdapterState::Closed));
        *previous != AdapterState::Closed
    }

    pub(crate) fn state(&self) -> AdapterState {
        **self.state.load()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state() == AdapterState::Running
    }

    /// Marks a request as handed to the handler. The guard travels with the
    /// request's responder, so the count drops when the reply is sent or the
    /// responder is dropped unanswered.
    pub(crate) fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    pub(crate) fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Polls until every handed-out request has been answered, giving up after
    /// `timeout`. A timeout too large to represent polls until drained.
    ///
    /// Returns `false` if requests were still unanswered at the deadline.
    pub(crate) async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now().checked_add(timeout);

        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                return true;
            }

            if deadline.is_some_and(|deadline| tokio::time::Instant::now() >= deadline) {
                return false;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// One unanswered request; owned by its responder.
#[derive(Debug)]
pub(crate) struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
