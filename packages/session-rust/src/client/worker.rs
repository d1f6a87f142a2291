//! Single-consumer queue worker.
//!
//! Provides a generic `QueueWorker<R>` that drains an unbounded mpsc channel
//! one task at a time through a `QueueRunnable`. Tasks still queued when the
//! worker stops are handed back through `QueueRunnable::abandon`, so nothing
//! submitted is silently lost.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// QueueRunnable trait
// ---------------------------------------------------------------------------

/// Task handler executed by `QueueWorker`.
#[async_trait]
pub trait QueueRunnable: Send + 'static {
    /// The type of task this runnable processes.
    type Task: Send + 'static;

    /// Process a single task. Long waits should also watch `stop`.
    async fn run(&mut self, task: Self::Task, stop: &StopSignal);

    /// Called for every task still queued when the worker stops.
    fn abandon(&mut self, task: Self::Task);

    /// Called once after the queue has been drained. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// StopSignal
// ---------------------------------------------------------------------------

/// Read side of the worker's stop flag.
#[derive(Debug, Clone)]
pub struct StopSignal(watch::Receiver<bool>);

impl StopSignal {
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once stop was requested or the worker handle was dropped.
    pub async fn stopped(&self) {
        let mut rx = self.0.clone();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

// ---------------------------------------------------------------------------
// QueueWorker
// ---------------------------------------------------------------------------

/// FIFO worker that processes tasks sequentially on one tokio task.
pub struct QueueWorker<R: QueueRunnable> {
    tx: Mutex<Option<mpsc::UnboundedSender<R::Task>>>,
    stop_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<R: QueueRunnable> QueueWorker<R> {
    /// Spawns the worker task. Must be called within a tokio runtime.
    pub fn start(mut runnable: R) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<R::Task>();
        let (stop_tx, stop_rx) = watch::channel(false);
        let stop = StopSignal(stop_rx);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = stop.stopped() => break,
                    task = rx.recv() => match task {
                        Some(task) => runnable.run(task, &stop).await,
                        None => break,
                    },
                }
            }

            rx.close();
            let mut abandoned = 0usize;
            while let Ok(task) = rx.try_recv() {
                runnable.abandon(task);
                abandoned += 1;
            }
            if abandoned > 0 {
                tracing::debug!(abandoned, "queue worker stopped with pending tasks");
            }
            runnable.shutdown().await;
        });

        Self {
            tx: Mutex::new(Some(tx)),
            stop_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Enqueues a task behind everything submitted before it.
    ///
    /// # Errors
    ///
    /// Hands the task back if the worker has been stopped.
    pub fn submit(&self, task: R::Task) -> Result<(), R::Task> {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(task).map_err(|err| err.0),
            None => Err(task),
        }
    }

    /// Stops accepting tasks, interrupts the current one, abandons the rest
    /// and waits for the worker task to finish. Later calls return at once.
    pub async fn stop(&self) {
        self.tx.lock().take();
        self.stop_tx.send_replace(true);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "queue worker task failed");
            }
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }
}

/// Dropping the handle stops the worker without waiting for it: the current
/// task sees the stop signal and queued tasks are abandoned on the worker task.
impl<R: QueueRunnable> Drop for QueueWorker<R> {
    fn drop(&mut self) {
        self.tx.get_mut().take();
        self.stop_tx.send_replace(true);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
