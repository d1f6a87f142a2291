//! Generic request/response model the adapters bridge onto the bus.
//!
//! Callers speak in [`Request`]s and [`Response`]s through
//! [`RequestHandler`] and [`ResponseHandler`]; the client adapter turns them
//! into message sends, the server adapter turns inbound messages into them.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use busline_core::{Message, Reply};
use http::StatusCode;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned synchronously by [`RequestHandler::handle_request`].
///
/// A request rejected with one of these never receives a response.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("unsupported request for {uri}: payload is not a bus message")]
    UnsupportedRequest { uri: String },
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("handler is closed")]
    Closed,
    #[error("handler failed: {0}")]
    Handler(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag shared between a request and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// What a request carries. Only `Message` payloads can cross the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Message(Message),
    Raw(Vec<u8>),
}

/// A request with a time budget measured from its creation.
#[derive(Debug)]
pub struct Request {
    uri: String,
    payload: Payload,
    created: Instant,
    timeout: Option<Duration>,
    cancel: CancelToken,
}

impl Request {
    #[must_use]
    pub fn new(uri: impl Into<String>, payload: Payload) -> Self {
        Self {
            uri: uri.into(),
            payload,
            created: Instant::now(),
            timeout: None,
            cancel: CancelToken::default(),
        }
    }

    /// Wraps an inbound message as a request addressed to
    /// `mbus://{host}/{route}`, inheriting the message's time budget.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidUri`] if the route contains whitespace
    /// or control characters.
    pub fn from_message(host: &str, message: Message) -> Result<Self, RequestError> {
        let uri = format!("mbus://{host}/{}", message.route);
        if message
            .route
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(RequestError::InvalidUri { uri });
        }
        let timeout = message.time_remaining;
        let mut request = Self::new(uri, Payload::Message(message));
        request.timeout = timeout;
        Ok(request)
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    #[must_use]
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// The bus message, if this request carries one.
    #[must_use]
    pub fn message(&self) -> Option<&Message> {
        match &self.payload {
            Payload::Message(message) => Some(message),
            Payload::Raw(_) => None,
        }
    }

    #[must_use]
    pub fn created(&self) -> Instant {
        self.created
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Point in time when the budget runs out. `None` without a timeout or
    /// when the budget reaches past any representable instant.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.timeout.and_then(|timeout| self.created.checked_add(timeout))
    }

    /// Budget left, saturating at zero. `None` without a timeout.
    #[must_use]
    pub fn time_remaining(&self) -> Option<Duration> {
        self.timeout
            .map(|timeout| timeout.saturating_sub(self.created.elapsed()))
    }

    /// A handle that cancels this request even after it was submitted.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Outcome of a request: an abstract status plus the bus reply, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: StatusCode,
    reply: Option<Reply>,
}

impl Response {
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reply: None,
        }
    }

    #[must_use]
    pub fn with_reply(status: StatusCode, reply: Reply) -> Self {
        Self {
            status,
            reply: Some(reply),
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn reply(&self) -> Option<&Reply> {
        self.reply.as_ref()
    }

    #[must_use]
    pub fn into_reply(self) -> Option<Reply> {
        self.reply
    }
}

// ---------------------------------------------------------------------------
// Handler traits
// ---------------------------------------------------------------------------

/// Receives the single response to a request.
pub trait ResponseHandler: Send + Sync {
    /// # Errors
    ///
    /// Implementations report failures to the adapter, which logs them.
    fn handle_response(&self, response: Response) -> anyhow::Result<()>;
}

/// Accepts requests and eventually answers each through its
/// [`ResponseHandler`].
pub trait RequestHandler: Send + Sync {
    /// Takes ownership of `request`; `handler` must receive exactly one
    /// response unless this returns an error.
    ///
    /// # Errors
    ///
    /// Returns an error when the request is rejected up front.
    fn handle_request(
        &self,
        request: Request,
        handler: Arc<dyn ResponseHandler>,
    ) -> Result<(), RequestError>;

    /// Called when the caller gave up waiting. Answers with a timeout status
    /// unless overridden.
    fn handle_timeout(&self, request: &Request, handler: Arc<dyn ResponseHandler>) {
        tracing::debug!(uri = %request.uri(), "request timed out at caller");
        deliver_response(handler.as_ref(), Response::new(StatusCode::REQUEST_TIMEOUT));
    }
}

/// [`ResponseHandler`] backed by a closure. See [`response_fn`].
pub struct ResponseFn<F>(F);

impl<F> ResponseHandler for ResponseFn<F>
where
    F: Fn(Response) -> anyhow::Result<()> + Send + Sync,
{
    fn handle_response(&self, response: Response) -> anyhow::Result<()> {
        (self.0)(response)
    }
}

impl<F> fmt::Debug for ResponseFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseFn")
    }
}

/// Wraps a closure as a shareable [`ResponseHandler`].
pub fn response_fn<F>(f: F) -> Arc<dyn ResponseHandler>
where
    F: Fn(Response) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(ResponseFn(f))
}

/// [`RequestHandler`] backed by a closure. See [`request_fn`].
pub struct RequestFn<F>(F);

impl<F> RequestHandler for RequestFn<F>
where
    F: Fn(Request, Arc<dyn ResponseHandler>) -> Result<(), RequestError> + Send + Sync,
{
    fn handle_request(
        &self,
        request: Request,
        handler: Arc<dyn ResponseHandler>,
    ) -> Result<(), RequestError> {
        (self.0)(request, handler)
    }
}

impl<F> fmt::Debug for RequestFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RequestFn")
    }
}

/// Wraps a closure as a shareable [`RequestHandler`].
pub fn request_fn<F>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(Request, Arc<dyn ResponseHandler>) -> Result<(), RequestError> + Send + Sync + 'static,
{
    Arc::new(RequestFn(f))
}

/// Hands `response` to user code, containing errors and panics.
///
/// Returns `true` if the handler accepted the response.
pub(crate) fn deliver_response(handler: &dyn ResponseHandler, response: Response) -> bool {
    let status = response.status().as_u16();
    match panic::catch_unwind(AssertUnwindSafe(|| handler.handle_response(response))) {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            tracing::warn!(status, error = %err, "response handler failed");
            false
        }
        Err(_) => {
            tracing::error!(status, "response handler panicked");
            false
        }
    }
}
