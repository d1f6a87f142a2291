//! Per-message responder handed to the server's request handler.

use busline_core::{codes, BusError, Reply, ResourceRef};
use parking_lot::Mutex;

use super::lifecycle::InFlightGuard;
use crate::request::{Response, ResponseHandler};
use crate::shared::SharedDestinationSession;
use crate::status::apply_status;

struct Unanswered {
    template: Reply,
    session: ResourceRef<SharedDestinationSession>,
    _in_flight: InFlightGuard,
}

/// Turns the response to one inbound message into a correlated reply.
///
/// Holds its own session reference, so a reply can still go out after the
/// adapter is dropped. The first response wins. A handler dropped without
/// responding answers with a fatal error instead of leaving the sender
/// waiting.
pub(crate) struct ServerResponseHandler {
    correlation_id: u64,
    slot: Mutex<Option<Unanswered>>,
}

impl ServerResponseHandler {
    /// `template` carries the context and trace every reply must echo.
    pub(crate) fn new(
        template: Reply,
        session: ResourceRef<SharedDestinationSession>,
        in_flight: InFlightGuard,
    ) -> Self {
        Self {
            correlation_id: template.context,
            slot: Mutex::new(Some(Unanswered {
                template,
                session,
                _in_flight: in_flight,
            })),
        }
    }

    /// Sends the reply for `response`. Returns `false` if a response was
    /// already sent.
    pub(crate) fn complete(&self, response: Response) -> bool {
        let status = response.status();
        let Some(unanswered) = self.slot.lock().take() else {
            tracing::warn!(
                correlation_id = self.correlation_id,
                status = status.as_u16(),
                "response already sent; ignoring"
            );
            return false;
        };
        send(unanswered, response.into_reply().unwrap_or_default(), status);
        true
    }
}

fn send(unanswered: Unanswered, mut reply: Reply, status: http::StatusCode) {
    reply.context = unanswered.template.context;
    reply.trace = unanswered.template.trace;
    apply_status(&mut reply, status);
    tracing::debug!(
        correlation_id = reply.context,
        status = status.as_u16(),
        errors = reply.errors().len(),
        "sending reply"
    );
    unanswered.session.reply(reply);
}

impl ResponseHandler for ServerResponseHandler {
    fn handle_response(&self, response: Response) -> anyhow::Result<()> {
        self.complete(response);
        Ok(())
    }
}

impl Drop for ServerResponseHandler {
    fn drop(&mut self) {
        if let Some(unanswered) = self.slot.get_mut().take() {
            tracing::warn!(
                correlation_id = self.correlation_id,
                "request handler dropped without responding"
            );
            let mut reply = Reply::new();
            reply.add_error(BusError::from_code(
                codes::APP_FATAL_ERROR,
                "Request handler dropped without responding",
            ));
            send(unanswered, reply, http::StatusCode::INTERNAL_SERVER_ERROR);
        }
    }
}
