//! In-process transport backend: a [`Block`] channel wired to a twin,
//! end to end.
//!
//! Used by `conduit-testkit` and by unit tests elsewhere in this crate that
//! want a connected pair without touching a socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::block::Block;
use crate::error::TransportError;

use super::TransportBackend;

const CHANNEL_CAPACITY: usize = 64;

/// One half of a connected pair's wiring: where blocks written here land,
/// and where blocks addressed to here arrive. `shut` is this half's own
/// close flag — the two halves of a pair do not share one, so a transport
/// close on one side only stops that side's own further I/O; the peer
/// finds out once its read actually fails.
struct Link {
    outgoing: mpsc::Sender<Block>,
    incoming: Mutex<mpsc::Receiver<Block>>,
    shut: AtomicBool,
}

impl Link {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.shut.load(Ordering::Acquire) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

/// One end of an in-process connected pair. Cheaply `Clone`: cloning shares
/// the same underlying channels.
#[derive(Clone)]
pub struct MemTransport(Arc<Link>);

impl MemTransport {
    /// Build two linked `MemTransport`s: whatever the first sends, the
    /// second receives, and vice versa.
    pub fn pair() -> (Self, Self) {
        let (to_second, from_first) = mpsc::channel(CHANNEL_CAPACITY);
        let (to_first, from_second) = mpsc::channel(CHANNEL_CAPACITY);

        let first = Link {
            outgoing: to_second,
            incoming: Mutex::new(from_second),
            shut: AtomicBool::new(false),
        };
        let second = Link {
            outgoing: to_first,
            incoming: Mutex::new(from_first),
            shut: AtomicBool::new(false),
        };

        (MemTransport(Arc::new(first)), MemTransport(Arc::new(second)))
    }
}

impl TransportBackend for MemTransport {
    async fn send_block(&self, block: Block) -> Result<(), TransportError> {
        self.0.ensure_open()?;
        self.0.outgoing.send(block).await.map_err(|_| TransportError::Closed)
    }

    async fn recv_block(&self) -> Result<Block, TransportError> {
        self.0.ensure_open()?;
        let mut incoming = self.0.incoming.lock().await;
        incoming.recv().await.ok_or(TransportError::Closed)
    }

    fn close(&self) {
        self.0.shut.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.0.shut.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockType;

    #[tokio::test]
    async fn pair_is_bidirectional() {
        let (a, b) = MemTransport::pair();
        a.send_block(Block::new(BlockType::Data, b"ping".to_vec()))
            .await
            .unwrap();
        let got = b.recv_block().await.unwrap();
        assert_eq!(got.body, b"ping");

        b.send_block(Block::new(BlockType::Data, b"pong".to_vec()))
            .await
            .unwrap();
        let got = a.recv_block().await.unwrap();
        assert_eq!(got.body, b"pong");
    }

    #[tokio::test]
    async fn closing_rejects_further_sends() {
        let (a, b) = MemTransport::pair();
        a.close();
        assert!(a.is_closed());
        let err = a
            .send_block(Block::new(BlockType::Heartbeat, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed));
        drop(a);
        let err = b.recv_block().await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }
}
