//! Message and reply value types exchanged with the transport.
//!
//! These carry no encoding logic. The `context` field is the correlation
//! slot: whatever a sender writes on a [`Message`] comes back on the matching
//! [`Reply`]. [`Trace`] is opaque to this crate and is copied, never
//! inspected.

pub mod error;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use error::{codes, BusError};

/// Opaque trace handle propagated with messages and replies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    level: u32,
    entries: Vec<String>,
}

impl Trace {
    #[must_use]
    pub fn new(level: u32) -> Self {
        Self {
            level,
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Appends a note when tracing is enabled (level above zero).
    pub fn note(&mut self, entry: impl Into<String>) {
        if self.level > 0 {
            self.entries.push(entry.into());
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

/// An outbound request on a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Route or destination name; resolved by the transport.
    pub route: String,
    pub payload: Vec<u8>,
    /// Correlation slot echoed onto the reply.
    pub context: u64,
    pub trace: Trace,
    /// Remaining time budget, `None` for no timeout.
    pub time_remaining: Option<Duration>,
    /// Number of times the transport has resent this message.
    pub retry: u32,
}

impl Message {
    #[must_use]
    pub fn new(route: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            route: route.into(),
            payload,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_trace(mut self, trace: Trace) -> Self {
        self.trace = trace;
        self
    }

    #[must_use]
    pub fn with_time_remaining(mut self, remaining: Duration) -> Self {
        self.time_remaining = Some(remaining);
        self
    }
}

/// The answer to a [`Message`], possibly carrying errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub payload: Option<Vec<u8>>,
    pub context: u64,
    pub trace: Trace,
    errors: Vec<BusError>,
    /// Delay requested by the receiver before a resend, if any.
    pub retry_delay: Option<Duration>,
}

impl Reply {
    /// An empty reply carrying no payload and no errors.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty reply correlated with `message`: same context, same trace.
    #[must_use]
    pub fn for_message(message: &Message) -> Self {
        Self {
            context: message.context,
            trace: message.trace.clone(),
            ..Self::default()
        }
    }

    /// An empty reply for `message` carrying a single error.
    #[must_use]
    pub fn error_for(message: &Message, error: BusError) -> Self {
        let mut reply = Self::for_message(message);
        reply.add_error(error);
        reply
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn add_error(&mut self, error: BusError) {
        self.errors.push(error);
    }

    #[must_use]
    pub fn errors(&self) -> &[BusError] {
        &self.errors
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    #[must_use]
    pub fn has_fatal_errors(&self) -> bool {
        self.errors.iter().any(BusError::is_fatal)
    }
}
