//! Transport error codes and the error value carried on replies.

use serde::{Deserialize, Serialize};

/// Well-known error codes.
///
/// Codes in `TRANSIENT_ERROR..FATAL_ERROR` are transient and may be retried;
/// codes in `FATAL_ERROR..ERROR_LIMIT` are fatal. The `APP_*` ranges are
/// reserved for application-defined codes of either class.
pub mod codes {
    pub const NONE: u32 = 0;

    pub const TRANSIENT_ERROR: u32 = 100_000;
    pub const SEND_QUEUE_FULL: u32 = TRANSIENT_ERROR + 1;
    pub const NO_ADDRESS_FOR_SERVICE: u32 = TRANSIENT_ERROR + 2;
    pub const CONNECTION_ERROR: u32 = TRANSIENT_ERROR + 3;
    pub const UNKNOWN_SESSION: u32 = TRANSIENT_ERROR + 4;
    pub const SESSION_BUSY: u32 = TRANSIENT_ERROR + 5;
    pub const SEND_ABORTED: u32 = TRANSIENT_ERROR + 6;
    pub const HANDSHAKE_FAILED: u32 = TRANSIENT_ERROR + 7;
    pub const APP_TRANSIENT_ERROR: u32 = TRANSIENT_ERROR + 50_000;

    pub const FATAL_ERROR: u32 = 200_000;
    pub const SEND_QUEUE_CLOSED: u32 = FATAL_ERROR + 1;
    pub const ILLEGAL_ROUTE: u32 = FATAL_ERROR + 2;
    pub const NO_SERVICES_FOR_ROUTE: u32 = FATAL_ERROR + 3;
    pub const ENCODE_ERROR: u32 = FATAL_ERROR + 5;
    pub const NETWORK_ERROR: u32 = FATAL_ERROR + 6;
    pub const UNKNOWN_PROTOCOL: u32 = FATAL_ERROR + 7;
    pub const DECODE_ERROR: u32 = FATAL_ERROR + 8;
    pub const TIMEOUT: u32 = FATAL_ERROR + 9;
    pub const INCOMPATIBLE_VERSION: u32 = FATAL_ERROR + 10;
    pub const UNKNOWN_POLICY: u32 = FATAL_ERROR + 11;
    pub const NETWORK_SHUTDOWN: u32 = FATAL_ERROR + 12;
    pub const POLICY_ERROR: u32 = FATAL_ERROR + 13;
    pub const SEQUENCE_ERROR: u32 = FATAL_ERROR + 14;
    pub const APP_FATAL_ERROR: u32 = FATAL_ERROR + 50_000;

    pub const ERROR_LIMIT: u32 = 300_000;

    /// Whether `code` falls in the fatal range.
    #[must_use]
    pub fn is_fatal(code: u32) -> bool {
        (FATAL_ERROR..ERROR_LIMIT).contains(&code)
    }

    /// Symbolic name for logging. Unlisted codes report their class.
    #[must_use]
    pub fn name(code: u32) -> &'static str {
        match code {
            NONE => "NONE",
            SEND_QUEUE_FULL => "SEND_QUEUE_FULL",
            NO_ADDRESS_FOR_SERVICE => "NO_ADDRESS_FOR_SERVICE",
            CONNECTION_ERROR => "CONNECTION_ERROR",
            UNKNOWN_SESSION => "UNKNOWN_SESSION",
            SESSION_BUSY => "SESSION_BUSY",
            SEND_ABORTED => "SEND_ABORTED",
            HANDSHAKE_FAILED => "HANDSHAKE_FAILED",
            SEND_QUEUE_CLOSED => "SEND_QUEUE_CLOSED",
            ILLEGAL_ROUTE => "ILLEGAL_ROUTE",
            NO_SERVICES_FOR_ROUTE => "NO_SERVICES_FOR_ROUTE",
            ENCODE_ERROR => "ENCODE_ERROR",
            NETWORK_ERROR => "NETWORK_ERROR",
            UNKNOWN_PROTOCOL => "UNKNOWN_PROTOCOL",
            DECODE_ERROR => "DECODE_ERROR",
            TIMEOUT => "TIMEOUT",
            INCOMPATIBLE_VERSION => "INCOMPATIBLE_VERSION",
            UNKNOWN_POLICY => "UNKNOWN_POLICY",
            NETWORK_SHUTDOWN => "NETWORK_SHUTDOWN",
            POLICY_ERROR => "POLICY_ERROR",
            SEQUENCE_ERROR => "SEQUENCE_ERROR",
            c if (APP_FATAL_ERROR..ERROR_LIMIT).contains(&c) => "APP_FATAL_ERROR",
            c if is_fatal(c) => "FATAL_ERROR",
            c if (APP_TRANSIENT_ERROR..FATAL_ERROR).contains(&c) => "APP_TRANSIENT_ERROR",
            c if (TRANSIENT_ERROR..FATAL_ERROR).contains(&c) => "TRANSIENT_ERROR",
            _ => "UNKNOWN",
        }
    }
}

/// An error reported by the transport or synthesized locally.
///
/// Only `fatal` drives control flow; `message` is relayed to callers
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{message} (code {code})")]
pub struct BusError {
    pub code: u32,
    pub message: String,
    pub fatal: bool,
}

impl BusError {
    /// Creates an error with the severity supplied by the transport.
    #[must_use]
    pub fn new(code: u32, message: impl Into<String>, fatal: bool) -> Self {
        Self {
            code,
            message: message.into(),
            fatal,
        }
    }

    /// Creates an error whose severity follows the code range.
    #[must_use]
    pub fn from_code(code: u32, message: impl Into<String>) -> Self {
        Self::new(code, message, codes::is_fatal(code))
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    #[must_use]
    pub fn code_name(&self) -> &'static str {
        codes::name(self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_follows_code_range() {
        assert!(!BusError::from_code(codes::SESSION_BUSY, "busy").is_fatal());
        assert!(!BusError::from_code(codes::APP_TRANSIENT_ERROR + 3, "x").is_fatal());
        assert!(BusError::from_code(codes::TIMEOUT, "late").is_fatal());
        assert!(BusError::from_code(codes::APP_FATAL_ERROR, "x").is_fatal());
        assert!(!BusError::from_code(codes::ERROR_LIMIT, "x").is_fatal());
    }

    #[test]
    fn explicit_severity_is_kept() {
        let err = BusError::new(codes::SESSION_BUSY, "escalated", true);
        assert!(err.is_fatal());
        assert_eq!(err.message, "escalated");
    }

    #[test]
    fn names_cover_ranges() {
        assert_eq!(codes::name(codes::TIMEOUT), "TIMEOUT");
        assert_eq!(codes::name(codes::APP_FATAL_ERROR + 12), "APP_FATAL_ERROR");
        assert_eq!(codes::name(codes::FATAL_ERROR + 40), "FATAL_ERROR");
        assert_eq!(codes::name(codes::TRANSIENT_ERROR + 40), "TRANSIENT_ERROR");
        assert_eq!(codes::name(7), "UNKNOWN");
    }

    #[test]
    fn display_includes_message_and_code() {
        let err = BusError::from_code(codes::TIMEOUT, "timed out");
        assert_eq!(err.to_string(), "timed out (code 200009)");
    }

    #[test]
    fn serializes_camel_case() {
        let err = BusError::from_code(codes::SESSION_BUSY, "busy");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], 100_005);
        assert_eq!(json["fatal"], false);
    }
}
