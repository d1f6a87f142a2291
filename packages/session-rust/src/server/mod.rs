//! Server side: inbound messages in, generic requests out.

mod adapter;
mod lifecycle;
mod response;

pub use adapter::ServerSessionAdapter;
pub use lifecycle::AdapterState;
