//! busline sessions: shared bus lifecycle plus the client and server
//! adapters that bridge generic requests onto message send/reply.

pub mod client;
pub mod config;
pub mod request;
pub mod server;
pub mod shared;
pub mod status;
pub mod telemetry;
pub mod traits;

#[cfg(test)]
mod test_support;

pub use client::{ClientService, ClientSessionAdapter};
pub use config::{AdapterConfig, ClientConfig, ConfigError, LoggingConfig, ServerConfig};
pub use request::{
    request_fn, response_fn, CancelToken, Payload, Request, RequestError, RequestHandler,
    Response, ResponseHandler,
};
pub use server::{AdapterState, ServerSessionAdapter};
pub use shared::{SessionError, SharedBus, SharedDestinationSession, SharedSourceSession};
pub use status::{apply_status, error_for_status, status_for_reply};
pub use traits::{
    DestinationSession, DestinationSessionParams, MessageBus, MessageHandler, ReplyHandler,
    SendRejected, SourceSession, SourceSessionParams,
};
