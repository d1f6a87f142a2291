//! Mapping between abstract response statuses and bus errors.

use busline_core::{codes, BusError, Reply};
use http::StatusCode;

/// Status a caller sees for a bus reply.
///
/// No errors is `200`. Fatal errors give `408` when one of them is a
/// timeout and `500` otherwise. Only transient errors give `503`.
#[must_use]
pub fn status_for_reply(reply: &Reply) -> StatusCode {
    if !reply.has_errors() {
        return StatusCode::OK;
    }
    if !reply.has_fatal_errors() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    if reply.errors().iter().any(|e| e.code == codes::TIMEOUT) {
        StatusCode::REQUEST_TIMEOUT
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Bus error for a response status, `None` for success statuses.
#[must_use]
pub fn error_for_status(status: StatusCode) -> Option<BusError> {
    if status.is_success() {
        return None;
    }
    let code = match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => codes::TIMEOUT,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => codes::SESSION_BUSY,
        _ => codes::APP_FATAL_ERROR,
    };
    let message = match status.canonical_reason() {
        Some(reason) => format!("Request failed with status {} {reason}", status.as_u16()),
        None => format!("Request failed with status {}", status.as_u16()),
    };
    Some(BusError::from_code(code, message))
}

/// Adds the error for `status` to `reply` unless the reply already carries
/// an error at least as severe. Existing errors are never removed.
///
/// Returns whether an error was added.
pub fn apply_status(reply: &mut Reply, status: StatusCode) -> bool {
    let Some(error) = error_for_status(status) else {
        return false;
    };
    if reply.has_fatal_errors() || (reply.has_errors() && !error.is_fatal()) {
        return false;
    }
    reply.add_error(error);
    true
}
