//! The send loop run by the client adapter's queue worker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use busline_core::{codes, BusError, Message, ResourceRef};
use metrics::counter;

use super::correlation::{CorrelationMap, Preflight};
use super::worker::{QueueRunnable, StopSignal};
use crate::shared::SharedSourceSession;
use crate::traits::SendRejected;

/// A message waiting for its turn on the source session.
#[derive(Debug)]
pub(crate) struct OutboundJob {
    pub(crate) id: u64,
    pub(crate) message: Message,
}

/// Sends queued messages one at a time, retrying transient rejections.
///
/// Owns the adapter's session reference; the reference is released when the
/// worker drops the loop after shutdown.
pub(crate) struct SendLoop {
    session: ResourceRef<SharedSourceSession>,
    pending: Arc<CorrelationMap>,
    retry_interval: Duration,
}

impl SendLoop {
    pub(crate) fn new(
        session: ResourceRef<SharedSourceSession>,
        pending: Arc<CorrelationMap>,
        retry_interval: Duration,
    ) -> Self {
        Self {
            session,
            pending,
            retry_interval,
        }
    }

    fn synthesize(&self, id: u64, code: u32, message: &str) {
        counter!("busline_client_synthesized_replies_total", "code" => codes::name(code))
            .increment(1);
        tracing::debug!(correlation_id = id, code, "answering request locally");
        self.pending.fail(id, BusError::from_code(code, message));
    }
}

#[async_trait]
impl QueueRunnable for SendLoop {
    type Task = OutboundJob;

    async fn run(&mut self, job: OutboundJob, stop: &StopSignal) {
        let OutboundJob { id, mut message } = job;
        loop {
            let remaining = match self.pending.preflight(id) {
                Preflight::Gone => return,
                Preflight::Expired => {
                    self.synthesize(id, codes::TIMEOUT, "Timed out before the request was sent");
                    return;
                }
                Preflight::Canceled => {
                    self.synthesize(id, codes::SEND_ABORTED, "Request canceled before send");
                    return;
                }
                Preflight::Ready { remaining } => remaining,
            };
            if stop.is_stopped() {
                self.synthesize(id, codes::SEND_QUEUE_CLOSED, "Send queue closed");
                return;
            }

            message.time_remaining = remaining;
            counter!("busline_client_sends_total").increment(1);
            match self.session.send(message).await {
                Ok(()) => {
                    tracing::debug!(correlation_id = id, "message accepted by transport");
                    return;
                }
                Err(SendRejected { error, message: returned }) if !error.is_fatal() => {
                    counter!("busline_client_retries_total").increment(1);
                    tracing::debug!(
                        correlation_id = id,
                        code = error.code,
                        error = %error.message,
                        "transient send failure; retrying"
                    );
                    message = returned;
                    message.retry += 1;

                    let pause = remaining.map_or(self.retry_interval, |r| r.min(self.retry_interval));
                    tokio::select! {
                        () = tokio::time::sleep(pause) => {}
                        () = stop.stopped() => {
                            self.synthesize(id, codes::SEND_QUEUE_CLOSED, "Send queue closed");
                            return;
                        }
                    }
                }
                Err(SendRejected { error, .. }) => {
                    counter!("busline_client_fatal_send_errors_total").increment(1);
                    tracing::warn!(
                        correlation_id = id,
                        code = error.code,
                        error = %error.message,
                        "fatal send failure"
                    );
                    self.pending.fail(id, error);
                    return;
                }
            }
        }
    }

    fn abandon(&mut self, job: OutboundJob) {
        self.synthesize(job.id, codes::SEND_QUEUE_CLOSED, "Send queue closed");
    }

    async fn shutdown(&mut self) {
        tracing::debug!(pending = self.pending.len(), "client send loop stopped");
    }
}
