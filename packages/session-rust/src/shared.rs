//! Reference-counted bus and session wrappers.
//!
//! The bus connection is torn down only after every session opened on it has
//! been destroyed and the bus owner has released its own reference, whatever
//! order those releases happen in.

use std::fmt;
use std::sync::Arc;

use busline_core::{BusError, Destroyable, Message, Reply, ResourceRef, SharedResource};
use parking_lot::Mutex;

use crate::traits::{
    DestinationSession, DestinationSessionParams, MessageBus, MessageHandler, ReplyHandler,
    SendRejected, SourceSession, SourceSessionParams,
};

/// Errors raised while opening a session on a shared bus.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to open session: {0}")]
    Open(#[from] BusError),
}

// ---------------------------------------------------------------------------
// SharedBus
// ---------------------------------------------------------------------------

/// A [`MessageBus`] owned through [`ResourceRef`]s.
pub struct SharedBus {
    bus: Arc<dyn MessageBus>,
}

impl SharedBus {
    /// Takes ownership of `bus`; the returned reference is the owner's.
    pub fn open(bus: Arc<dyn MessageBus>) -> ResourceRef<Self> {
        SharedResource::open(Self { bus })
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }
}

impl Destroyable for SharedBus {
    fn destroy(&self) -> bool {
        let destroyed = self.bus.destroy();
        tracing::info!(destroyed, "message bus destroyed");
        destroyed
    }
}

impl fmt::Debug for SharedBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBus").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// A source session holding a reference to the bus it was opened on.
pub struct SharedSourceSession {
    session: Arc<dyn SourceSession>,
    bus: Mutex<Option<ResourceRef<SharedBus>>>,
}

impl SharedSourceSession {
    /// Opens a source session on `bus`, taking a bus reference for the
    /// session's lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Open`] if the transport refuses the session.
    pub fn open(
        bus: &ResourceRef<SharedBus>,
        params: &SourceSessionParams,
        reply_handler: Arc<dyn ReplyHandler>,
    ) -> Result<ResourceRef<Self>, SessionError> {
        let session = bus.bus().create_source_session(params, reply_handler)?;
        tracing::debug!("source session opened");
        Ok(SharedResource::open(Self {
            session,
            bus: Mutex::new(Some(bus.refer())),
        }))
    }

    /// Hands `message` to the underlying session.
    ///
    /// # Errors
    ///
    /// Returns the rejection reported by the transport.
    pub async fn send(&self, message: Message) -> Result<(), SendRejected> {
        self.session.send(message).await
    }
}

impl Destroyable for SharedSourceSession {
    fn destroy(&self) -> bool {
        let destroyed = self.session.destroy();
        tracing::info!(destroyed, "source session destroyed");
        let bus = self.bus.lock().take();
        if let Some(bus) = bus {
            bus.release();
        }
        destroyed
    }
}

impl fmt::Debug for SharedSourceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSourceSession")
            .field("bus", &*self.bus.lock())
            .finish_non_exhaustive()
    }
}

/// A destination session holding a reference to the bus it was opened on.
pub struct SharedDestinationSession {
    session: Arc<dyn DestinationSession>,
    bus: Mutex<Option<ResourceRef<SharedBus>>>,
}

impl SharedDestinationSession {
    /// Opens a destination session on `bus`, taking a bus reference for the
    /// session's lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Open`] if the transport refuses the session.
    pub fn open(
        bus: &ResourceRef<SharedBus>,
        params: &DestinationSessionParams,
        message_handler: Arc<dyn MessageHandler>,
    ) -> Result<ResourceRef<Self>, SessionError> {
        let session = bus
            .bus()
            .create_destination_session(params, message_handler)?;
        tracing::debug!(name = %params.name, "destination session opened");
        Ok(SharedResource::open(Self {
            session,
            bus: Mutex::new(Some(bus.refer())),
        }))
    }

    pub fn reply(&self, reply: Reply) {
        self.session.reply(reply);
    }
}

impl Destroyable for SharedDestinationSession {
    fn destroy(&self) -> bool {
        let destroyed = self.session.destroy();
        tracing::info!(destroyed, "destination session destroyed");
        let bus = self.bus.lock().take();
        if let Some(bus) = bus {
            bus.release();
        }
        destroyed
    }
}

impl fmt::Debug for SharedDestinationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedDestinationSession")
            .field("bus", &*self.bus.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use busline_core::codes;

    use super::*;
    use crate::test_support::{noop_message_handler, noop_reply_handler, MockBus};

    #[test]
    fn bus_outlives_sessions_when_owner_releases_first() {
        let mock = MockBus::new();
        let owner = SharedBus::open(mock.clone());
        let source = SharedSourceSession::open(
            &owner,
            &SourceSessionParams::default(),
            noop_reply_handler(),
        )
        .unwrap();
        let destination = SharedDestinationSession::open(
            &owner,
            &DestinationSessionParams::default(),
            noop_message_handler(),
        )
        .unwrap();
        assert_eq!(owner.ref_count(), 3);

        assert!(!owner.release());
        assert!(mock.events().is_empty());

        assert!(source.release());
        assert_eq!(mock.events(), ["source destroyed"]);

        assert!(destination.release());
        assert_eq!(
            mock.events(),
            ["source destroyed", "destination destroyed", "bus destroyed"]
        );
    }

    #[test]
    fn owner_release_last_destroys_bus() {
        let mock = MockBus::new();
        let owner = SharedBus::open(mock.clone());
        let source = SharedSourceSession::open(
            &owner,
            &SourceSessionParams::default(),
            noop_reply_handler(),
        )
        .unwrap();

        drop(source);
        assert_eq!(mock.events(), ["source destroyed"]);
        assert_eq!(owner.ref_count(), 1);

        assert!(owner.release());
        assert_eq!(mock.events(), ["source destroyed", "bus destroyed"]);
    }

    #[test]
    fn session_refs_keep_session_alive() {
        let mock = MockBus::new();
        let owner = SharedBus::open(mock.clone());
        let source = SharedSourceSession::open(
            &owner,
            &SourceSessionParams::default(),
            noop_reply_handler(),
        )
        .unwrap();
        let second = source.refer();

        assert!(!source.release());
        assert!(mock.events().is_empty());
        assert!(second.release());
        assert_eq!(mock.events(), ["source destroyed"]);
    }

    #[test]
    fn open_failure_takes_no_bus_reference() {
        let mock = MockBus::new();
        mock.fail_next_open(BusError::from_code(codes::NETWORK_SHUTDOWN, "bus is down"));
        let owner = SharedBus::open(mock.clone());

        let err = SharedSourceSession::open(
            &owner,
            &SourceSessionParams::default(),
            noop_reply_handler(),
        )
        .unwrap_err();
        let SessionError::Open(cause) = err;
        assert_eq!(cause.code, codes::NETWORK_SHUTDOWN);
        assert_eq!(owner.ref_count(), 1);
    }
}
