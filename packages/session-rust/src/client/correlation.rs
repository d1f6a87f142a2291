//! Pending-request table keyed by the correlation id written into
//! `Message::context`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use busline_core::{BusError, Reply, Trace};
use dashmap::DashMap;

use crate::request::{deliver_response, CancelToken, Response, ResponseHandler};
use crate::status::status_for_reply;
use crate::traits::ReplyHandler;

/// A request that has been accepted but not yet answered.
pub(crate) struct PendingRequest {
    pub(crate) handler: Arc<dyn ResponseHandler>,
    pub(crate) deadline: Option<Instant>,
    pub(crate) cancel: CancelToken,
    pub(crate) trace: Trace,
}

/// What the sender should do with a queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Preflight {
    /// Already answered; nothing to send.
    Gone,
    Expired,
    Canceled,
    Ready { remaining: Option<Duration> },
}

/// Correlates replies with the requests that caused them.
///
/// Removing an entry is the only way to answer a request, so each request
/// is answered at most once no matter how replies and local failures race.
pub(crate) struct CorrelationMap {
    pending: DashMap<u64, PendingRequest>,
    next_id: AtomicU64,
}

impl CorrelationMap {
    pub(crate) fn new() -> Self {
        Self {
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Records a pending request and returns its correlation id.
    pub(crate) fn register(&self, pending: PendingRequest) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending.insert(id, pending);
        id
    }

    /// Checks a queued request against its deadline and cancel flag.
    pub(crate) fn preflight(&self, id: u64) -> Preflight {
        let Some(entry) = self.pending.get(&id) else {
            return Preflight::Gone;
        };
        let now = Instant::now();
        match entry.deadline {
            Some(deadline) if deadline <= now => Preflight::Expired,
            _ if entry.cancel.is_canceled() => Preflight::Canceled,
            deadline => Preflight::Ready {
                remaining: deadline.map(|d| d.saturating_duration_since(now)),
            },
        }
    }

    /// Answers a pending request with a reply. Returns `false` when no
    /// request with the reply's context is pending.
    pub(crate) fn dispatch(&self, reply: Reply) -> bool {
        let correlation_id = reply.context;
        let Some((_, pending)) = self.pending.remove(&correlation_id) else {
            return false;
        };
        let status = status_for_reply(&reply);
        tracing::debug!(correlation_id, status = status.as_u16(), "request answered");
        deliver_response(pending.handler.as_ref(), Response::with_reply(status, reply));
        true
    }

    /// Answers a pending request with a locally synthesized error reply.
    pub(crate) fn fail(&self, id: u64, error: BusError) -> bool {
        let trace = match self.pending.get(&id) {
            Some(entry) => entry.trace.clone(),
            None => return false,
        };
        let mut reply = Reply::new();
        reply.context = id;
        reply.trace = trace;
        reply.add_error(error);
        self.dispatch(reply)
    }

    /// Drops a pending request without answering it.
    pub(crate) fn forget(&self, id: u64) -> bool {
        self.pending.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

impl ReplyHandler for CorrelationMap {
    fn handle_reply(&self, reply: Reply) {
        let correlation_id = reply.context;
        if !self.dispatch(reply) {
            tracing::warn!(correlation_id, "dropping reply for unknown request");
        }
    }
}
