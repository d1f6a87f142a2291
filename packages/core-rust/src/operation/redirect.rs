//! Type-redirecting view over an [`AsyncOperation`].

use std::fmt;
use std::sync::Arc;

use super::{AsyncOperation, ListenerId, Operation};
use crate::error::OperationError;

/// Exposes an `AsyncOperation<S>` as an operation producing `T`.
///
/// The conversion runs lazily on every [`result`](Operation::result) call.
/// Completion state, cause, progress, naming and cancellation are read from
/// the inner operation. Listeners registered here receive the redirected
/// view, not the inner operation.
pub struct RedirectedOperation<S, T> {
    inner: AsyncOperation<S>,
    convert: Arc<dyn Fn(S) -> T + Send + Sync>,
}

impl<S, T> Clone for RedirectedOperation<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            convert: Arc::clone(&self.convert),
        }
    }
}

impl<S, T> RedirectedOperation<S, T> {
    pub fn new<F>(inner: AsyncOperation<S>, convert: F) -> Self
    where
        F: Fn(S) -> T + Send + Sync + 'static,
    {
        Self {
            inner,
            convert: Arc::new(convert),
        }
    }

    /// The wrapped operation. Completing it completes this view.
    #[must_use]
    pub fn inner(&self) -> &AsyncOperation<S> {
        &self.inner
    }
}

impl<S, T> Operation for RedirectedOperation<S, T>
where
    S: Clone + Send + 'static,
    T: 'static,
{
    type Output = T;

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn is_done(&self) -> bool {
        self.inner.is_done()
    }

    fn is_success(&self) -> bool {
        self.inner.is_success()
    }

    fn result(&self) -> Option<T> {
        self.inner.result().map(|value| (self.convert)(value))
    }

    fn cause(&self) -> Option<OperationError> {
        self.inner.cause()
    }

    fn progress(&self) -> Option<f64> {
        self.inner.progress()
    }

    fn cancel(&self) {
        self.inner.cancel();
    }

    fn is_canceled(&self) -> bool {
        self.inner.is_canceled()
    }

    fn register<F>(&self, listener: F) -> ListenerId
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        let outer = self.clone();
        self.inner.register(move |_| listener(&outer))
    }

    fn unregister(&self, id: ListenerId) -> bool {
        self.inner.unregister(id)
    }
}

impl<S, T> fmt::Debug for RedirectedOperation<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedirectedOperation")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}
