//! Byne challenge protocol core.
//! No I/O: hosts feed it bytes and timer events and act on what it returns.

pub mod endpoint;
pub mod failover;
pub mod protocol;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod wire;

pub use endpoint::{Endpoint, EndpointError, EndpointSet};
pub use failover::{Decision, Failover, FailoverError, FailoverState, Trigger};
pub use protocol::{Command, Parity, Reply, Request, MAX_VALUE, PROTOCOL_VERSION};
pub use scheduler::{Cadence, CadenceError, StallDetector};
pub use server::ServerCore;
pub use session::{increment_step, ClientIdentity, EmptyIdentity, Session, WorkItem};
pub use wire::{
    decode_message, decode_reply, decode_request, encode_message, encode_reply, encode_request,
    FrameBuffer, FrameDecodeError, FrameEncodeError, ProtocolViolation,
};
