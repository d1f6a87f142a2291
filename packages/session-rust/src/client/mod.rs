//! Client side: generic requests in, message sends out.

mod adapter;
mod correlation;
mod sender;
mod service;
pub mod worker;

pub use adapter::ClientSessionAdapter;
pub use service::ClientService;
