//! Completable async operations with exactly-once listener delivery.
//!
//! An [`AsyncOperation`] is completed at most once, either with a value or
//! with a failure cause (optionally carrying a partial result). Listeners are
//! `FnOnce` callbacks: each one is owned by exactly one delivery path, either
//! the completing thread or the registering thread when the operation is
//! already done, so it runs once and only after the result is fully stored.
//!
//! Two adapters compose operations without inheritance:
//! - [`RedirectedOperation`] exposes an inner operation under a different
//!   result type through a conversion closure.
//! - [`chain_on_success`] wires a source operation into a target operation,
//!   forwarding failures verbatim.

pub mod chain;
pub mod redirect;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::OperationError;

pub use chain::{chain_on_success, chain_on_success_with};
pub use redirect::RedirectedOperation;

/// Handle identifying a registered listener, used to unregister it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Completion state of an operation. Terminal once it leaves `Unset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Unset,
    Success,
    Failure,
}

/// Read side shared by [`AsyncOperation`] and its adapters.
pub trait Operation: Send + Sync {
    /// The result type observers see.
    type Output;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn is_done(&self) -> bool;

    fn is_success(&self) -> bool;

    /// The success value, or the partial result of a failed operation.
    fn result(&self) -> Option<Self::Output>;

    fn cause(&self) -> Option<OperationError>;

    /// `Some(1.0)` once done, otherwise the last supplied estimate, if any.
    fn progress(&self) -> Option<f64>;

    /// Sets the cooperative cancellation flag. Does not complete the operation.
    fn cancel(&self);

    fn is_canceled(&self) -> bool;

    /// Registers a listener invoked exactly once with this operation.
    ///
    /// If the operation is already done, the listener runs before this call
    /// returns.
    fn register<F>(&self, listener: F) -> ListenerId
    where
        F: FnOnce(&Self) + Send + 'static,
        Self: Sized;

    /// Removes a listener that has not fired yet. Unknown or already-fired
    /// ids are ignored and return `false`.
    fn unregister(&self, id: ListenerId) -> bool;
}

type Listener<V> = Box<dyn FnOnce(&AsyncOperation<V>) + Send>;

struct State<V> {
    state: OperationState,
    result: Option<V>,
    cause: Option<OperationError>,
    progress: Option<f64>,
    listeners: Vec<(ListenerId, Listener<V>)>,
    next_listener: u64,
}

struct Shared<V> {
    name: String,
    description: String,
    state: Mutex<State<V>>,
    done: Condvar,
    canceled: AtomicBool,
}

/// A unit of work that completes at most once with success or failure.
///
/// Cloning produces another handle to the same operation; any handle may
/// complete it, from any thread.
pub struct AsyncOperation<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for AsyncOperation<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V> AsyncOperation<V> {
    /// Creates a pending operation.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                description: description.into(),
                state: Mutex::new(State {
                    state: OperationState::Unset,
                    result: None,
                    cause: None,
                    progress: None,
                    listeners: Vec::new(),
                    next_listener: 0,
                }),
                done: Condvar::new(),
                canceled: AtomicBool::new(false),
            }),
        }
    }

    /// Current completion state.
    #[must_use]
    pub fn state(&self) -> OperationState {
        self.shared.state.lock().state
    }

    /// Completes the operation successfully.
    ///
    /// Returns `false` without touching anything if the operation was
    /// already completed.
    pub fn set_result(&self, value: V) -> bool {
        self.complete(OperationState::Success, Some(value), None)
    }

    /// Fails the operation, optionally keeping a partial result.
    ///
    /// Returns `false` without touching anything if the operation was
    /// already completed.
    pub fn set_failure(&self, cause: OperationError, partial: Option<V>) -> bool {
        self.complete(OperationState::Failure, partial, Some(cause))
    }

    /// Records a progress estimate for a pending operation. NaN clears it.
    pub fn set_progress(&self, progress: f64) {
        let estimate = if progress.is_nan() {
            None
        } else {
            Some(progress.clamp(0.0, 1.0))
        };
        self.shared.state.lock().progress = estimate;
    }

    /// Blocks until the operation is done or `timeout` elapses.
    ///
    /// Returns whether the operation is done.
    /// A timeout too large to represent waits without a limit.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.shared.state.lock();
        while state.state == OperationState::Unset {
            match deadline {
                Some(deadline) => {
                    if self.shared.done.wait_until(&mut state, deadline).timed_out() {
                        return state.state != OperationState::Unset;
                    }
                }
                None => self.shared.done.wait(&mut state),
            }
        }
        true
    }

    /// Wraps this operation so it is observed through `convert`.
    pub fn redirect<T, F>(self, convert: F) -> RedirectedOperation<V, T>
    where
        F: Fn(V) -> T + Send + Sync + 'static,
    {
        RedirectedOperation::new(self, convert)
    }

    fn complete(
        &self,
        outcome: OperationState,
        result: Option<V>,
        cause: Option<OperationError>,
    ) -> bool {
        let listeners = {
            let mut state = self.shared.state.lock();
            if state.state != OperationState::Unset {
                return false;
            }
            state.state = outcome;
            state.result = result;
            state.cause = cause;
            std::mem::take(&mut state.listeners)
        };
        self.shared.done.notify_all();

        tracing::trace!(
            operation = %self.shared.name,
            outcome = ?outcome,
            listeners = listeners.len(),
            "operation completed"
        );

        for (id, listener) in listeners {
            self.deliver(id, listener);
        }
        true
    }

    fn deliver(&self, id: ListenerId, listener: Listener<V>) {
        if panic::catch_unwind(AssertUnwindSafe(|| listener(self))).is_err() {
            tracing::error!(
                operation = %self.shared.name,
                listener = id.0,
                "operation listener panicked"
            );
        }
    }
}

impl<V> Operation for AsyncOperation<V>
where
    V: Clone + Send + 'static,
{
    type Output = V;

    fn name(&self) -> &str {
        &self.shared.name
    }

    fn description(&self) -> &str {
        &self.shared.description
    }

    fn is_done(&self) -> bool {
        self.state() != OperationState::Unset
    }

    fn is_success(&self) -> bool {
        self.state() == OperationState::Success
    }

    fn result(&self) -> Option<V> {
        self.shared.state.lock().result.clone()
    }

    fn cause(&self) -> Option<OperationError> {
        self.shared.state.lock().cause.clone()
    }

    fn progress(&self) -> Option<f64> {
        let state = self.shared.state.lock();
        if state.state == OperationState::Unset {
            state.progress
        } else {
            Some(1.0)
        }
    }

    fn cancel(&self) {
        self.shared.canceled.store(true, Ordering::Release);
    }

    fn is_canceled(&self) -> bool {
        self.shared.canceled.load(Ordering::Acquire)
    }

    fn register<F>(&self, listener: F) -> ListenerId
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        let id = ListenerId(state.next_listener);
        state.next_listener += 1;
        if state.state == OperationState::Unset {
            state.listeners.push((id, Box::new(listener)));
            return id;
        }
        drop(state);
        self.deliver(id, Box::new(listener));
        id
    }

    fn unregister(&self, id: ListenerId) -> bool {
        let mut state = self.shared.state.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(registered, _)| *registered != id);
        state.listeners.len() != before
    }
}

impl<V> fmt::Debug for AsyncOperation<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("AsyncOperation")
            .field("name", &self.shared.name)
            .field("state", &state.state)
            .field("pending_listeners", &state.listeners.len())
            .field("canceled", &self.shared.canceled.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
