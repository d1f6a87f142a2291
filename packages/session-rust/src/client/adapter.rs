//! Client side of the bridge: generic requests become bus messages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use busline_core::ResourceRef;

use super::correlation::{CorrelationMap, PendingRequest};
use super::sender::{OutboundJob, SendLoop};
use super::worker::QueueWorker;
use crate::config::ClientConfig;
use crate::request::{Payload, Request, RequestError, RequestHandler, ResponseHandler};
use crate::shared::{SessionError, SharedBus, SharedSourceSession};
use crate::traits::{ReplyHandler, SourceSessionParams};

/// Sends requests over a source session and routes replies back to the
/// callers that issued them.
///
/// `handle_request` only records and enqueues; a single worker task sends
/// queued messages in submission order. Every accepted request receives
/// exactly one response: the transport's reply, or a locally synthesized one
/// for expired, canceled, fatally rejected or closed-out requests.
///
/// Dropping the adapter without [`close`](Self::close) stops the worker in
/// the background: a send already handed to the transport completes, and
/// every request still queued is answered with `SEND_QUEUE_CLOSED`.
pub struct ClientSessionAdapter {
    pending: Arc<CorrelationMap>,
    worker: QueueWorker<SendLoop>,
    default_timeout: Option<Duration>,
    closed: AtomicBool,
}

impl ClientSessionAdapter {
    /// Opens a source session on `bus` and starts the send worker. Must be
    /// called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the session cannot be opened.
    pub fn open(
        bus: &ResourceRef<SharedBus>,
        params: &SourceSessionParams,
        config: &ClientConfig,
    ) -> Result<Self, SessionError> {
        let pending = Arc::new(CorrelationMap::new());
        let reply_handler: Arc<dyn ReplyHandler> = pending.clone();
        let session = SharedSourceSession::open(bus, params, reply_handler)?;
        let worker = QueueWorker::start(SendLoop::new(
            session,
            Arc::clone(&pending),
            config.retry_interval(),
        ));
        tracing::info!(
            retry_interval_ms = config.retry_interval_ms,
            "client session adapter opened"
        );
        Ok(Self {
            pending,
            worker,
            default_timeout: config.default_timeout(),
            closed: AtomicBool::new(false),
        })
    }

    /// Stops accepting requests, answers every unsent one with
    /// `SEND_QUEUE_CLOSED`, and releases the session.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.worker.stop().await;
        tracing::info!(
            awaiting_reply = self.pending.len(),
            "client session adapter closed"
        );
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Requests accepted but not yet answered.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl RequestHandler for ClientSessionAdapter {
    fn handle_request(
        &self,
        request: Request,
        handler: Arc<dyn ResponseHandler>,
    ) -> Result<(), RequestError> {
        let deadline = request
            .timeout()
            .or(self.default_timeout)
            .and_then(|timeout| request.created().checked_add(timeout));
        let cancel = request.cancel_token();
        let uri = request.uri().to_string();
        let Payload::Message(mut message) = request.into_payload() else {
            return Err(RequestError::UnsupportedRequest { uri });
        };
        if self.is_closed() {
            return Err(RequestError::Closed);
        }

        let id = self.pending.register(PendingRequest {
            handler,
            deadline,
            cancel,
            trace: message.trace.clone(),
        });
        message.context = id;
        message.time_remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        let route = message.route.clone();

        if let Err(job) = self.worker.submit(OutboundJob { id, message }) {
            self.pending.forget(job.id);
            return Err(RequestError::Closed);
        }
        tracing::debug!(correlation_id = id, %route, "request queued");
        Ok(())
    }

    fn handle_timeout(&self, request: &Request, _handler: Arc<dyn ResponseHandler>) {
        tracing::debug!(
            uri = %request.uri(),
            "ignoring caller timeout; the transport always replies"
        );
    }
}

impl std::fmt::Debug for ClientSessionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSessionAdapter")
            .field("pending", &self.pending.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
