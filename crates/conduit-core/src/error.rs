//! Error types at each layer boundary of the protocol engine.

use crate::block::BlockError;

/// Errors surfaced by a [`crate::transport::Transport`] backend.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing error: {0}")]
    Framing(#[from] BlockError),
    #[cfg(feature = "websocket")]
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Errors surfaced by the payload codec.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("serializer encode error: {0}")]
    Encode(String),
    #[error("serializer decode error: {0}")]
    Decode(String),
    #[error("envelope failed validation: unknown kind {0}")]
    InvalidKind(u8),
}

/// Errors surfaced by the [`crate::protocol::Protocol`] state machine.
///
/// Protocol-state violations are not fatal (§7): they are logged and
/// discarded by the caller, which is why this type only models failures
/// that warrant propagating past the state gate itself.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Crate-wide error returned from the public `Commander`/`Client`/`Server`
/// surface, wrapping the lower layers.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("disconnected: {0:?}")]
    Disconnected(crate::commander::DisconnectReason),
    #[error("request {name:?} timed out")]
    Timeout { name: String },
}
