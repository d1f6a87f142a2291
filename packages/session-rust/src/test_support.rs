//! In-memory bus and session doubles for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use busline_core::{BusError, Message, Reply};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};

use crate::request::{response_fn, Response, ResponseHandler};
use crate::traits::{
    DestinationSession, DestinationSessionParams, MessageBus, MessageHandler, ReplyHandler,
    SendRejected, SourceSession, SourceSessionParams,
};

type EventLog = Arc<Mutex<Vec<&'static str>>>;

pub(crate) struct MockBus {
    events: EventLog,
    destroyed: AtomicBool,
    open_failure: Mutex<Option<BusError>>,
    early_messages: Mutex<Vec<Message>>,
    sources: Mutex<Vec<Arc<MockSourceSession>>>,
    destinations: Mutex<Vec<Arc<MockDestinationSession>>>,
}

impl MockBus {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            events: EventLog::default(),
            destroyed: AtomicBool::new(false),
            open_failure: Mutex::new(None),
            early_messages: Mutex::new(Vec::new()),
            sources: Mutex::new(Vec::new()),
            destinations: Mutex::new(Vec::new()),
        })
    }

    /// Teardown calls observed so far, in order.
    pub(crate) fn events(&self) -> Vec<&'static str> {
        self.events.lock().clone()
    }

    pub(crate) fn fail_next_open(&self, error: BusError) {
        *self.open_failure.lock() = Some(error);
    }

    /// Delivers `message` to the next destination handler before session
    /// creation returns, as an eager transport may.
    pub(crate) fn deliver_during_open(&self, message: Message) {
        self.early_messages.lock().push(message);
    }

    pub(crate) fn source(&self) -> Arc<MockSourceSession> {
        Arc::clone(self.sources.lock().last().expect("no source session opened"))
    }

    pub(crate) fn destination(&self) -> Arc<MockDestinationSession> {
        Arc::clone(
            self.destinations
                .lock()
                .last()
                .expect("no destination session opened"),
        )
    }
}

impl MessageBus for MockBus {
    fn create_source_session(
        &self,
        _params: &SourceSessionParams,
        reply_handler: Arc<dyn ReplyHandler>,
    ) -> Result<Arc<dyn SourceSession>, BusError> {
        if let Some(err) = self.open_failure.lock().take() {
            return Err(err);
        }
        let session = Arc::new(MockSourceSession {
            events: Arc::clone(&self.events),
            reply_handler,
            script: Mutex::new(VecDeque::new()),
            gate: Mutex::new(None),
            attempts: AtomicUsize::new(0),
            accepted: Mutex::new(Vec::new()),
            auto_reply: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        });
        self.sources.lock().push(Arc::clone(&session));
        Ok(session)
    }

    fn create_destination_session(
        &self,
        _params: &DestinationSessionParams,
        message_handler: Arc<dyn MessageHandler>,
    ) -> Result<Arc<dyn DestinationSession>, BusError> {
        if let Some(err) = self.open_failure.lock().take() {
            return Err(err);
        }
        let session = Arc::new(MockDestinationSession {
            events: Arc::clone(&self.events),
            handler: Mutex::new(Some(Arc::clone(&message_handler))),
            replies: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        });
        self.destinations.lock().push(Arc::clone(&session));
        let early = std::mem::take(&mut *self.early_messages.lock());
        for message in early {
            message_handler.handle_message(message);
        }
        Ok(session)
    }

    fn destroy(&self) -> bool {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.events.lock().push("bus destroyed");
        true
    }
}

/// Source session with scripted send outcomes.
///
/// Each send pops the next scripted outcome; an empty script accepts. When
/// a gate is installed every send waits for a permit first.
pub(crate) struct MockSourceSession {
    events: EventLog,
    reply_handler: Arc<dyn ReplyHandler>,
    script: Mutex<VecDeque<BusError>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    attempts: AtomicUsize,
    accepted: Mutex<Vec<Message>>,
    auto_reply: AtomicBool,
    destroyed: AtomicBool,
}

impl MockSourceSession {
    pub(crate) fn reject_next(&self, error: BusError) {
        self.script.lock().push_back(error);
    }

    /// Makes every later send wait for a permit from the returned semaphore.
    pub(crate) fn install_gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Answers every accepted message with an empty reply echoing its payload.
    pub(crate) fn reply_automatically(&self) {
        self.auto_reply.store(true, Ordering::SeqCst);
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn accepted(&self) -> Vec<Message> {
        self.accepted.lock().clone()
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Delivers a reply as the transport would.
    pub(crate) fn deliver(&self, reply: Reply) {
        self.reply_handler.handle_reply(reply);
    }

    pub(crate) async fn wait_for_attempts(&self, attempts: usize) {
        for _ in 0..1_000 {
            if self.attempts() >= attempts {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("expected {attempts} send attempts, saw {}", self.attempts());
    }
}

#[async_trait]
impl SourceSession for MockSourceSession {
    async fn send(&self, message: Message) -> Result<(), SendRejected> {
        let gate = self.gate.lock().clone();
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        let scripted = self.script.lock().pop_front();
        if let Some(error) = scripted {
            return Err(SendRejected::new(error, message));
        }
        self.accepted.lock().push(message.clone());
        if self.auto_reply.load(Ordering::SeqCst) {
            let reply = Reply::for_message(&message).with_payload(message.payload.clone());
            self.reply_handler.handle_reply(reply);
        }
        Ok(())
    }

    fn destroy(&self) -> bool {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.events.lock().push("source destroyed");
        true
    }
}

/// Destination session recording every reply it is asked to send.
pub(crate) struct MockDestinationSession {
    events: EventLog,
    handler: Mutex<Option<Arc<dyn MessageHandler>>>,
    replies: Mutex<Vec<Reply>>,
    destroyed: AtomicBool,
}

impl MockDestinationSession {
    /// Delivers an inbound message as the transport would. Messages arriving
    /// after destroy are dropped.
    pub(crate) fn inject(&self, message: Message) {
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler.handle_message(message);
        }
    }

    pub(crate) fn replies(&self) -> Vec<Reply> {
        self.replies.lock().clone()
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl DestinationSession for MockDestinationSession {
    fn reply(&self, reply: Reply) {
        self.replies.lock().push(reply);
    }

    fn destroy(&self) -> bool {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.handler.lock().take();
        self.events.lock().push("destination destroyed");
        true
    }
}

struct NoopHandler;

impl ReplyHandler for NoopHandler {
    fn handle_reply(&self, _reply: Reply) {}
}

impl MessageHandler for NoopHandler {
    fn handle_message(&self, _message: Message) {}
}

pub(crate) fn noop_reply_handler() -> Arc<dyn ReplyHandler> {
    Arc::new(NoopHandler)
}

pub(crate) fn noop_message_handler() -> Arc<dyn MessageHandler> {
    Arc::new(NoopHandler)
}

/// A response handler forwarding every response into a channel.
pub(crate) fn collector() -> (Arc<dyn ResponseHandler>, mpsc::UnboundedReceiver<Response>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = response_fn(move |response| {
        tx.send(response)
            .map_err(|_| anyhow::anyhow!("collector dropped"))
    });
    (handler, rx)
}

/// Waits for the next collected response, failing the test after a second.
pub(crate) async fn next_response(rx: &mut mpsc::UnboundedReceiver<Response>) -> Response {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for a response")
        .expect("collector closed")
}
