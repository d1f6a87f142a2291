//! Server side of the bridge: inbound messages become generic requests.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use busline_core::{codes, BusError, Message, Reply, ResourceRef};
use http::StatusCode;
use metrics::counter;
use parking_lot::Mutex;

use super::lifecycle::{AdapterState, Lifecycle};
use super::response::ServerResponseHandler;
use crate::config::ServerConfig;
use crate::request::{Request, RequestHandler, Response, ResponseHandler};
use crate::shared::{SessionError, SharedBus, SharedDestinationSession};
use crate::traits::{DestinationSessionParams, MessageHandler};

/// Where replies go, as seen by the message handler.
enum SessionSlot {
    /// The transport may deliver before session creation returns; those
    /// messages wait here and are answered busy once the session is stored.
    Opening(Vec<Message>),
    Open(ResourceRef<SharedDestinationSession>),
    Released,
}

/// Message handler registered with the destination session.
struct ServerCore {
    host: String,
    handler: Arc<dyn RequestHandler>,
    lifecycle: Lifecycle,
    session: Mutex<SessionSlot>,
}

impl ServerCore {
    /// Stores the opened session and answers everything delivered meanwhile.
    fn attach(&self, session: ResourceRef<SharedDestinationSession>) {
        let early = match std::mem::replace(
            &mut *self.session.lock(),
            SessionSlot::Open(session.refer()),
        ) {
            SessionSlot::Opening(early) => early,
            SessionSlot::Open(_) | SessionSlot::Released => Vec::new(),
        };
        if !early.is_empty() {
            tracing::debug!(count = early.len(), "answering messages delivered during open");
        }
        for message in &early {
            self.reply_busy(&session, message);
        }
    }

    fn reply_busy(&self, session: &SharedDestinationSession, message: &Message) {
        counter!("busline_server_busy_replies_total").increment(1);
        tracing::debug!(
            correlation_id = message.context,
            route = %message.route,
            state = ?self.lifecycle.state(),
            "adapter not running; answering busy"
        );
        session.reply(Reply::error_for(
            message,
            BusError::from_code(codes::SESSION_BUSY, "Session is not accepting requests"),
        ));
    }
}

impl MessageHandler for ServerCore {
    fn handle_message(&self, message: Message) {
        let correlation_id = message.context;
        let session = match &mut *self.session.lock() {
            SessionSlot::Open(session) => Some(session.refer()),
            SessionSlot::Opening(early) => {
                early.push(message);
                return;
            }
            SessionSlot::Released => None,
        };
        let Some(session) = session else {
            tracing::warn!(
                correlation_id,
                route = %message.route,
                "message arrived after the session was released; dropped"
            );
            return;
        };

        if !self.lifecycle.is_running() {
            self.reply_busy(&session, &message);
            return;
        }

        let template = Reply::for_message(&message);
        let request = match Request::from_message(&self.host, message) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(correlation_id, error = %err, "rejecting message");
                let mut reply = template;
                reply.add_error(BusError::from_code(codes::APP_FATAL_ERROR, err.to_string()));
                session.reply(reply);
                return;
            }
        };

        counter!("busline_server_requests_total").increment(1);
        let responder = Arc::new(ServerResponseHandler::new(
            template,
            session,
            self.lifecycle.in_flight_guard(),
        ));
        let response_handler: Arc<dyn ResponseHandler> = responder.clone();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.handler.handle_request(request, response_handler)
        }));

        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => {
                tracing::warn!(correlation_id, error = %err, "request handler failed");
                err.to_string()
            }
            Err(_) => {
                tracing::error!(correlation_id, "request handler panicked");
                "Request handler panicked".to_string()
            }
        };
        let mut reply = Reply::new();
        reply.add_error(BusError::from_code(codes::APP_FATAL_ERROR, failure));
        responder.complete(Response::with_reply(StatusCode::INTERNAL_SERVER_ERROR, reply));
    }
}

/// Receives messages on a destination session and hands them to a
/// [`RequestHandler`] as generic requests.
///
/// Starts in [`AdapterState::Starting`]; until [`start`](Self::start) is
/// called, and again after [`close`](Self::close), every message is answered
/// with `SESSION_BUSY` without reaching the handler.
pub struct ServerSessionAdapter {
    core: Arc<ServerCore>,
    drain_timeout: Duration,
}

impl ServerSessionAdapter {
    /// Opens a destination session on `bus` that feeds `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the session cannot be opened.
    pub fn open(
        bus: &ResourceRef<SharedBus>,
        params: &DestinationSessionParams,
        handler: Arc<dyn RequestHandler>,
        config: &ServerConfig,
    ) -> Result<Self, SessionError> {
        let core = Arc::new(ServerCore {
            host: config.host.clone(),
            handler,
            lifecycle: Lifecycle::new(),
            session: Mutex::new(SessionSlot::Opening(Vec::new())),
        });
        let message_handler: Arc<dyn MessageHandler> = core.clone();
        let session = match SharedDestinationSession::open(bus, params, message_handler) {
            Ok(session) => session,
            Err(err) => {
                if let SessionSlot::Opening(early) =
                    std::mem::replace(&mut *core.session.lock(), SessionSlot::Released)
                {
                    if !early.is_empty() {
                        tracing::warn!(
                            count = early.len(),
                            "session failed to open; early messages cannot be answered"
                        );
                    }
                }
                return Err(err);
            }
        };
        core.attach(session);
        tracing::info!(name = %params.name, host = %config.host, "server session adapter opened");
        Ok(Self {
            core,
            drain_timeout: config.drain_timeout(),
        })
    }

    /// Begins accepting messages. Returns `false` if the adapter was closed.
    pub fn start(&self) -> bool {
        let running = self.core.lifecycle.start();
        if running {
            tracing::info!("server session adapter running");
        }
        running
    }

    /// Stops accepting messages. Requests already handed to the handler can
    /// still respond. Returns `false` if already closed.
    pub fn close(&self) -> bool {
        let closed = self.core.lifecycle.close();
        if closed {
            tracing::info!(in_flight = self.in_flight(), "server session adapter closed");
        }
        closed
    }

    /// Closes, then waits up to `timeout` for in-flight requests to respond.
    ///
    /// Returns `true` if every in-flight request finished in time.
    pub async fn close_and_drain(&self, timeout: Duration) -> bool {
        self.close();
        let drained = self.core.lifecycle.wait_for_drain(timeout).await;
        if !drained {
            tracing::warn!(
                in_flight = self.in_flight(),
                "drain timed out with requests still in flight"
            );
        }
        drained
    }

    /// The drain timeout from configuration.
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    #[must_use]
    pub fn state(&self) -> AdapterState {
        self.core.lifecycle.state()
    }

    /// Requests handed to the handler that have not yet responded.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.core.lifecycle.in_flight_count()
    }
}

impl Drop for ServerSessionAdapter {
    fn drop(&mut self) {
        self.core.lifecycle.close();
        let session = std::mem::replace(&mut *self.core.session.lock(), SessionSlot::Released);
        drop(session);
    }
}

impl std::fmt::Debug for ServerSessionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSessionAdapter")
            .field("host", &self.core.host)
            .field("state", &self.state())
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use busline_core::Trace;

    use super::*;
    use crate::request::{request_fn, RequestError};
    use crate::test_support::MockBus;

    struct Harness {
        mock: Arc<MockBus>,
        _bus: ResourceRef<SharedBus>,
        adapter: ServerSessionAdapter,
        calls: Arc<AtomicUsize>,
    }

    impl Harness {
        fn inject(&self, message: Message) {
            self.mock.destination().inject(message);
        }

        fn replies(&self) -> Vec<Reply> {
            self.mock.destination().replies()
        }
    }

    fn harness<F>(respond: F) -> Harness
    where
        F: Fn(Request, Arc<dyn ResponseHandler>) -> Result<(), RequestError>
            + Send
            + Sync
            + 'static,
    {
        crate::telemetry::init_test_tracing();
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let handler = request_fn(move |request, responder| {
            counted.fetch_add(1, Ordering::SeqCst);
            respond(request, responder)
        });
        let mock = MockBus::new();
        let bus = SharedBus::open(mock.clone());
        let adapter = ServerSessionAdapter::open(
            &bus,
            &DestinationSessionParams::default(),
            handler,
            &ServerConfig::default(),
        )
        .unwrap();
        Harness {
            mock,
            _bus: bus,
            adapter,
            calls,
        }
    }

    fn respond_with(status: StatusCode, reply: Option<Reply>) -> impl Fn(Request, Arc<dyn ResponseHandler>) -> Result<(), RequestError> + Send + Sync + 'static {
        move |_request, responder| {
            let response = match reply.clone() {
                Some(reply) => Response::with_reply(status, reply),
                None => Response::new(status),
            };
            responder.handle_response(response)?;
            Ok(())
        }
    }

    fn message(context: u64, route: &str) -> Message {
        let mut trace = Trace::new(2);
        trace.note("client hop");
        let mut message = Message::new(route, b"ping".to_vec()).with_trace(trace);
        message.context = context;
        message
    }

    fn codes_of(reply: &Reply) -> Vec<u32> {
        reply.errors().iter().map(|e| e.code).collect()
    }

    #[test]
    fn busy_until_started() {
        let h = harness(respond_with(StatusCode::OK, None));
        assert_eq!(h.adapter.state(), AdapterState::Starting);

        h.inject(message(7, "search/0"));

        let replies = h.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].context, 7);
        assert_eq!(codes_of(&replies[0]), [codes::SESSION_BUSY]);
        assert!(!replies[0].has_fatal_errors());
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn running_adapter_answers_with_handler_reply() {
        let h = harness(respond_with(
            StatusCode::OK,
            Some(Reply::new().with_payload(b"pong".to_vec())),
        ));
        assert!(h.adapter.start());

        let sent = message(11, "search/0");
        h.inject(sent.clone());

        let replies = h.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].payload.as_deref(), Some(&b"pong"[..]));
        assert_eq!(replies[0].context, 11);
        assert_eq!(replies[0].trace, sent.trace);
        assert!(!replies[0].has_errors());
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.adapter.in_flight(), 0);
    }

    #[test]
    fn handler_sees_bus_uri_and_message() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let h = harness(move |request, responder| {
            *sink.lock() = Some((request.uri().to_string(), request.message().cloned()));
            responder.handle_response(Response::new(StatusCode::OK))?;
            Ok(())
        });
        h.adapter.start();
        h.inject(message(3, "docproc/2"));

        let (uri, forwarded) = seen.lock().clone().unwrap();
        assert_eq!(uri, "mbus://localhost/docproc/2");
        assert_eq!(forwarded.unwrap().payload, b"ping".to_vec());
    }

    #[test]
    fn closed_adapter_is_busy_and_cannot_restart() {
        let h = harness(respond_with(StatusCode::OK, None));
        h.adapter.start();
        assert!(h.adapter.close());
        assert!(!h.adapter.start());

        h.inject(message(1, "search/0"));

        assert_eq!(codes_of(&h.replies()[0]), [codes::SESSION_BUSY]);
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn invalid_route_is_rejected_without_handler() {
        let h = harness(respond_with(StatusCode::OK, None));
        h.adapter.start();

        h.inject(message(5, "bad route"));

        let replies = h.replies();
        assert_eq!(codes_of(&replies[0]), [codes::APP_FATAL_ERROR]);
        assert_eq!(replies[0].context, 5);
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn status_becomes_protocol_error() {
        let h = harness(respond_with(StatusCode::SERVICE_UNAVAILABLE, None));
        h.adapter.start();
        h.inject(message(1, "search/0"));
        assert_eq!(codes_of(&h.replies()[0]), [codes::SESSION_BUSY]);

        let h = harness(respond_with(StatusCode::GATEWAY_TIMEOUT, None));
        h.adapter.start();
        h.inject(message(1, "search/0"));
        assert_eq!(codes_of(&h.replies()[0]), [codes::TIMEOUT]);
    }

    #[test]
    fn existing_fatal_error_is_kept() {
        let mut carried = Reply::new();
        carried.add_error(BusError::from_code(codes::NETWORK_ERROR, "downstream down"));
        let h = harness(respond_with(StatusCode::SERVICE_UNAVAILABLE, Some(carried)));
        h.adapter.start();

        h.inject(message(1, "search/0"));

        let reply = &h.replies()[0];
        assert_eq!(codes_of(reply), [codes::NETWORK_ERROR]);
        assert_eq!(reply.errors()[0].message, "downstream down");
    }

    #[test]
    fn fatal_status_escalates_transient_reply() {
        let mut carried = Reply::new();
        carried.add_error(BusError::from_code(codes::SESSION_BUSY, "busy"));
        let h = harness(respond_with(StatusCode::INTERNAL_SERVER_ERROR, Some(carried)));
        h.adapter.start();

        h.inject(message(1, "search/0"));

        assert_eq!(
            codes_of(&h.replies()[0]),
            [codes::SESSION_BUSY, codes::APP_FATAL_ERROR]
        );
    }

    #[test]
    fn handler_error_is_answered_with_fatal_reply() {
        let h = harness(|_, _| Err(anyhow::anyhow!("index offline").into()));
        h.adapter.start();

        h.inject(message(9, "search/0"));

        let replies = h.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].context, 9);
        assert_eq!(codes_of(&replies[0]), [codes::APP_FATAL_ERROR]);
        assert!(replies[0].errors()[0].message.contains("index offline"));
        assert_eq!(h.adapter.in_flight(), 0);
    }

    #[test]
    fn handler_panic_is_answered_with_fatal_reply() {
        let h = harness(|_, _| panic!("handler bug"));
        h.adapter.start();

        h.inject(message(4, "search/0"));

        let replies = h.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(codes_of(&replies[0]), [codes::APP_FATAL_ERROR]);
    }

    #[test]
    fn dropped_responder_sends_fatal_reply() {
        let h = harness(|_, responder| {
            drop(responder);
            Ok(())
        });
        h.adapter.start();

        h.inject(message(6, "search/0"));

        let replies = h.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].context, 6);
        assert_eq!(codes_of(&replies[0]), [codes::APP_FATAL_ERROR]);
        assert_eq!(h.adapter.in_flight(), 0);
    }

    #[test]
    fn first_response_wins() {
        let h = harness(|_, responder| {
            responder.handle_response(Response::new(StatusCode::OK))?;
            responder.handle_response(Response::new(StatusCode::INTERNAL_SERVER_ERROR))?;
            Ok(())
        });
        h.adapter.start();

        h.inject(message(2, "search/0"));

        let replies = h.replies();
        assert_eq!(replies.len(), 1);
        assert!(!replies[0].has_errors());
    }

    #[test]
    fn handler_context_is_overwritten_with_request_context() {
        let mut forged = Reply::new();
        forged.context = 12_345;
        forged.trace = Trace::new(9);
        let h = harness(respond_with(StatusCode::OK, Some(forged)));
        h.adapter.start();

        let sent = message(8, "search/0");
        h.inject(sent.clone());

        let reply = &h.replies()[0];
        assert_eq!(reply.context, 8);
        assert_eq!(reply.trace, sent.trace);
    }

    fn parking_harness() -> (Harness, Arc<Mutex<Vec<Arc<dyn ResponseHandler>>>>) {
        let parked = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&parked);
        let h = harness(move |_, responder| {
            sink.lock().push(responder);
            Ok(())
        });
        (h, parked)
    }

    #[tokio::test]
    async fn close_and_drain_waits_for_late_responses() {
        let (h, parked) = parking_harness();
        h.adapter.start();
        h.inject(message(1, "search/0"));
        h.inject(message(2, "search/1"));
        assert_eq!(h.adapter.in_flight(), 2);
        assert!(h.replies().is_empty());

        let responders: Vec<_> = parked.lock().drain(..).collect();
        let late = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            for responder in responders {
                responder
                    .handle_response(Response::new(StatusCode::OK))
                    .unwrap();
            }
        });

        assert!(h.adapter.close_and_drain(Duration::from_secs(2)).await);
        late.await.unwrap();
        assert_eq!(h.replies().len(), 2);
        assert_eq!(h.adapter.state(), AdapterState::Closed);
    }

    #[tokio::test]
    async fn close_and_drain_times_out() {
        let (h, _parked) = parking_harness();
        h.adapter.start();
        h.inject(message(1, "search/0"));

        assert!(!h.adapter.close_and_drain(Duration::from_millis(30)).await);
        assert_eq!(h.adapter.in_flight(), 1);
    }

    #[test]
    fn session_outlives_adapter_until_responders_finish() {
        let (h, parked) = parking_harness();
        h.adapter.start();
        h.inject(message(1, "search/0"));

        let Harness { mock, _bus, adapter, .. } = h;
        let destination = mock.destination();
        drop(adapter);
        assert!(!destination.is_destroyed());

        let responder = parked.lock().pop().unwrap();
        responder
            .handle_response(Response::new(StatusCode::OK))
            .unwrap();
        assert_eq!(destination.replies().len(), 1);
        drop(responder);
        assert!(destination.is_destroyed());
        assert_eq!(mock.events(), ["destination destroyed"]);
    }

    #[test]
    fn messages_delivered_during_open_are_answered_busy() {
        let mock = MockBus::new();
        mock.deliver_during_open(message(11, "search/0"));
        mock.deliver_during_open(message(12, "search/1"));
        let bus = SharedBus::open(mock.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let adapter = ServerSessionAdapter::open(
            &bus,
            &DestinationSessionParams::default(),
            request_fn(move |_request, _responder| {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            &ServerConfig::default(),
        )
        .unwrap();

        let replies = mock.destination().replies();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].context, 11);
        assert_eq!(replies[1].context, 12);
        assert!(replies.iter().all(|r| codes_of(r) == [codes::SESSION_BUSY]));
        assert_eq!(replies[0].trace, message(11, "search/0").trace);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        adapter.start();
        mock.destination().inject(message(13, "search/2"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_adapter_releases_session() {
        let h = harness(respond_with(StatusCode::OK, None));
        let Harness { mock, _bus, adapter, .. } = h;
        drop(adapter);
        assert!(mock.destination().is_destroyed());

        mock.destination().inject(message(1, "search/0"));
        assert!(mock.destination().replies().is_empty());
    }
}
