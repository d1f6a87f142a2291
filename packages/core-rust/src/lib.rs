//! `busline` core: async operations, shared resources, and message/reply types.

pub mod error;
pub mod operation;
pub mod protocol;
pub mod shared;

pub use error::OperationError;
pub use operation::{
    chain_on_success, chain_on_success_with, AsyncOperation, ListenerId, Operation,
    OperationState, RedirectedOperation,
};
pub use protocol::{codes, BusError, Message, Reply, Trace};
pub use shared::{Destroyable, ResourceRef, SharedResource};
