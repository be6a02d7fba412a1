//! Socket listener/dialer glue around `conduit-core`'s protocol engine:
//! `Server`, `Client`, environment-driven `Config`, and a `tracing`-based
//! logging facility.

pub mod client;
pub mod config;
pub mod logging;
pub mod server;

pub use client::Client;
pub use config::{Config, TransportKind};
pub use server::{Extension, Server, ServiceHandler};

pub use conduit_core::{
    connection_id, Block, BlockType, Commander, CommanderEvent, CommanderHandle,
    DefaultJsonSerializer, DefaultValidator, DisconnectReason, EnvelopeKind, HandlerTable,
    PayloadEnvelope, Protocol, PulseLimit, Role, RpcError, Serializer, State, Transport,
    TransportError, Validator, VerifyOutcome,
};

/// Convenient glob import for applications built on top of `conduit`.
pub mod prelude {
    pub use crate::{Client, Config, Extension, Server, ServiceHandler, TransportKind};
    pub use conduit_core::{
        Commander, CommanderEvent, CommanderHandle, DisconnectReason, HandlerTable,
        PayloadEnvelope, Role, RpcError,
    };
}
