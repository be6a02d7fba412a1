//! Per-connection protocol engine: block framing, transport reassembly,
//! handshake, heartbeat/liveness, and request/command/response dispatch.
//!
//! This crate owns everything the wire protocol needs and nothing about
//! how connections are accepted or dialed — that lives in `conduit`.

pub mod block;
pub mod commander;
pub mod error;
pub mod framer;
pub mod payload;
pub mod protocol;
pub mod pulse;
mod rand_id;
pub mod transport;
pub mod validator;

pub use block::{Block, BlockType};
pub use commander::{Commander, CommanderEvent, CommanderHandle, DisconnectReason, HandlerTable, Role};
pub use error::{PayloadError, ProtocolError, RpcError, TransportError};
pub use payload::{DefaultJsonSerializer, EnvelopeKind, PayloadEnvelope, Serializer};
pub use protocol::{Protocol, State};
pub use pulse::{Pulse, PulseLimit};
pub use rand_id::connection_id;
pub use transport::Transport;
pub use validator::{DefaultValidator, Validator, VerifyOutcome};
