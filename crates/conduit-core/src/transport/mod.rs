//! Transport enum and the per-backend trait it dispatches to.
//!
//! The public API is the [`Transport`] enum; each backend lives in its own
//! module and implements the internal [`TransportBackend`] trait. Frame
//! reassembly (`Framer`) is shared by every backend that cannot rely on
//! message boundaries.

use crate::block::Block;
use crate::error::TransportError;

#[cfg(feature = "stream")]
pub mod stream;
#[cfg(feature = "websocket")]
pub mod websocket;
pub mod mem;

#[cfg(feature = "stream")]
pub use stream::StreamTransport;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
pub use mem::MemTransport;

pub(crate) trait TransportBackend: Send + Sync {
    async fn send_block(&self, block: Block) -> Result<(), TransportError>;
    async fn recv_block(&self) -> Result<Block, TransportError>;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

/// A framed, bidirectional connection. Selected at process start by
/// configuration (§6), never negotiated on the wire.
#[derive(Clone)]
pub enum Transport {
    #[cfg(feature = "stream")]
    Stream(StreamTransport),
    #[cfg(feature = "websocket")]
    WebSocket(WebSocketTransport),
    Mem(MemTransport),
}

impl Transport {
    pub async fn send_block(&self, block: Block) -> Result<(), TransportError> {
        match self {
            #[cfg(feature = "stream")]
            Transport::Stream(t) => t.send_block(block).await,
            #[cfg(feature = "websocket")]
            Transport::WebSocket(t) => t.send_block(block).await,
            Transport::Mem(t) => t.send_block(block).await,
        }
    }

    pub async fn recv_block(&self) -> Result<Block, TransportError> {
        match self {
            #[cfg(feature = "stream")]
            Transport::Stream(t) => t.recv_block().await,
            #[cfg(feature = "websocket")]
            Transport::WebSocket(t) => t.recv_block().await,
            Transport::Mem(t) => t.recv_block().await,
        }
    }

    pub fn close(&self) {
        match self {
            #[cfg(feature = "stream")]
            Transport::Stream(t) => t.close(),
            #[cfg(feature = "websocket")]
            Transport::WebSocket(t) => t.close(),
            Transport::Mem(t) => t.close(),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            #[cfg(feature = "stream")]
            Transport::Stream(t) => t.is_closed(),
            #[cfg(feature = "websocket")]
            Transport::WebSocket(t) => t.is_closed(),
            Transport::Mem(t) => t.is_closed(),
        }
    }

    /// An in-memory connected pair, for tests and local composition.
    pub fn mem_pair() -> (Self, Self) {
        let (a, b) = MemTransport::pair();
        (Transport::Mem(a), Transport::Mem(b))
    }
}
