//! Collaborator contracts for the transport underneath the adapters.
//!
//! The adapters consume these traits and never implement them: a concrete
//! transport supplies the bus, the sessions, and the threads that call back
//! into [`ReplyHandler`] and [`MessageHandler`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use busline_core::{BusError, Message, Reply};

/// A message the session refused to accept, handed back for a retry.
#[derive(Debug, thiserror::Error)]
#[error("send rejected: {error}")]
pub struct SendRejected {
    pub error: BusError,
    pub message: Message,
}

impl SendRejected {
    #[must_use]
    pub fn new(error: BusError, message: Message) -> Self {
        Self { error, message }
    }
}

/// Receives replies to messages sent through a [`SourceSession`].
///
/// Called on transport threads; implementations must not block.
pub trait ReplyHandler: Send + Sync {
    fn handle_reply(&self, reply: Reply);
}

/// Receives inbound messages delivered to a [`DestinationSession`].
///
/// May be called concurrently for different messages.
pub trait MessageHandler: Send + Sync {
    fn handle_message(&self, message: Message);
}

/// Sending side of a bus connection.
#[async_trait]
pub trait SourceSession: Send + Sync {
    /// Hands a message to the transport.
    ///
    /// Accepted messages are guaranteed to produce exactly one reply through
    /// the session's [`ReplyHandler`], even if that reply only carries an
    /// error.
    async fn send(&self, message: Message) -> Result<(), SendRejected>;

    /// Closes the session. Returns `false` if it was already closed.
    fn destroy(&self) -> bool;
}

/// Receiving side of a bus connection.
pub trait DestinationSession: Send + Sync {
    /// Sends a reply back to the originator of the message with the same
    /// context.
    fn reply(&self, reply: Reply);

    /// Closes the session. Returns `false` if it was already closed.
    fn destroy(&self) -> bool;
}

/// A heavyweight bus connection that sessions are opened on.
pub trait MessageBus: Send + Sync {
    /// Opens a sending session whose replies go to `reply_handler`.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if the session cannot be created.
    fn create_source_session(
        &self,
        params: &SourceSessionParams,
        reply_handler: Arc<dyn ReplyHandler>,
    ) -> Result<Arc<dyn SourceSession>, BusError>;

    /// Opens a receiving session whose messages go to `message_handler`.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if the session cannot be created.
    fn create_destination_session(
        &self,
        params: &DestinationSessionParams,
        message_handler: Arc<dyn MessageHandler>,
    ) -> Result<Arc<dyn DestinationSession>, BusError>;

    /// Tears the connection down. Returns `false` if it was already torn down.
    fn destroy(&self) -> bool;
}

/// Parameters for opening a [`SourceSession`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSessionParams {
    /// Upper bound on messages the transport keeps in flight, if any.
    pub max_pending: Option<usize>,
    /// Transport-level timeout applied to messages without their own budget.
    pub timeout: Option<Duration>,
}

/// Parameters for opening a [`DestinationSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationSessionParams {
    /// Name the session registers under.
    pub name: String,
    /// Whether the name is published for discovery.
    pub broadcast: bool,
}

impl Default for DestinationSessionParams {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            broadcast: true,
        }
    }
}
