//! Failure causes carried by async operations.

use crate::protocol::BusError;

/// Cause recorded when an [`AsyncOperation`](crate::AsyncOperation) fails.
///
/// The message is kept verbatim so observers see exactly what the producer
/// reported.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct OperationError {
    message: String,
}

impl OperationError {
    /// Creates a cause with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the message exactly as it was supplied.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for OperationError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<BusError> for OperationError {
    fn from(err: BusError) -> Self {
        Self::new(err.message)
    }
}
