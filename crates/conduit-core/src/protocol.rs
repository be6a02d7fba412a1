//! The Start → Handshake → Work → Closed state machine that gates which
//! block types may pass upward at each point in a connection's lifetime.

use crate::block::{Block, BlockType};
use crate::error::TransportError;
use crate::transport::Transport;

/// Connection lifecycle state. `Closed` is terminal: no transition leads
/// out of it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Start,
    Handshake,
    Work,
    Closed,
}

/// A block the protocol gate admitted, paired with the state it was
/// admitted in.
#[derive(Clone, Debug)]
pub struct Admitted {
    pub block_type: BlockType,
    pub body: Vec<u8>,
}

/// Wraps a [`Transport`] with the block-type admission gate described in
/// the component design's state table. Illegal `(state, type)` pairs are
/// logged and dropped; they never reach the caller and never move the
/// state.
pub struct Protocol {
    transport: Transport,
    state: State,
}

impl Protocol {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            state: State::Start,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Read one block from the transport and run it through the admission
    /// gate. Returns `Ok(None)` for a block the gate rejected (already
    /// logged); returns `Err` only on transport failure or peer close, at
    /// which point the state has already been forced to `Closed`.
    pub async fn recv(&mut self) -> Result<Option<Admitted>, TransportError> {
        if self.state == State::Closed {
            return Err(TransportError::Closed);
        }

        let block = match self.transport.recv_block().await {
            Ok(block) => block,
            Err(err) => {
                self.state = State::Closed;
                return Err(err);
            }
        };

        Ok(self.admit(block))
    }

    fn admit(&mut self, block: Block) -> Option<Admitted> {
        let admitted = match (self.state, block.block_type) {
            (State::Start, BlockType::Handshake) => {
                self.state = State::Handshake;
                true
            }
            (State::Start, BlockType::Heartbeat) => true,
            (State::Handshake, BlockType::HandshakeAcknowledgement) => {
                self.state = State::Work;
                true
            }
            (State::Handshake, BlockType::Heartbeat) => true,
            (State::Handshake, BlockType::Kick) => true,
            (State::Work, BlockType::Heartbeat) => true,
            (State::Work, BlockType::Kick) => true,
            (State::Work, BlockType::Data) => true,
            _ => false,
        };

        if admitted {
            Some(Admitted {
                block_type: block.block_type,
                body: block.body,
            })
        } else {
            tracing::warn!(
                state = ?self.state,
                block_type = %block.block_type,
                "dropping block illegal in current protocol state"
            );
            None
        }
    }

    pub async fn send(&self, body: Vec<u8>) -> Result<(), TransportError> {
        self.transport
            .send_block(Block::new(BlockType::Data, body))
            .await
    }

    pub async fn heartbeat(&self) -> Result<(), TransportError> {
        self.transport
            .send_block(Block::new(BlockType::Heartbeat, Vec::new()))
            .await
    }

    /// Sends the initial handshake block. Only meaningful from `Start`;
    /// transitions `Start` → `Handshake` immediately (it does not wait for
    /// a reply to advance the state).
    pub async fn handshake(&mut self, body: Vec<u8>) -> Result<(), TransportError> {
        self.transport
            .send_block(Block::new(BlockType::Handshake, body))
            .await?;
        if self.state == State::Start {
            self.state = State::Handshake;
        }
        Ok(())
    }

    pub async fn acknowledge(&self, body: Vec<u8>) -> Result<(), TransportError> {
        self.transport
            .send_block(Block::new(BlockType::HandshakeAcknowledgement, body))
            .await
    }

    /// The reason is encoded as its decimal textual representation, e.g.
    /// the ASCII bytes for `"2"`, not the raw byte `0x02`.
    pub async fn kick(&self, reason_code: u8) -> Result<(), TransportError> {
        self.transport
            .send_block(Block::new(BlockType::Kick, reason_code.to_string().into_bytes()))
            .await
    }

    pub async fn disconnect(&mut self) {
        self.state = State::Closed;
        self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;

    fn pair() -> (Protocol, Protocol) {
        let (a, b) = Transport::mem_pair();
        (Protocol::new(a), Protocol::new(b))
    }

    #[tokio::test]
    async fn start_admits_handshake_and_advances_state() {
        let (mut a, mut b) = pair();
        a.handshake(b"hi".to_vec()).await.unwrap();
        assert_eq!(a.state(), State::Handshake);

        let admitted = b.recv().await.unwrap().unwrap();
        assert_eq!(admitted.block_type, BlockType::Handshake);
        assert_eq!(b.state(), State::Handshake);
    }

    #[tokio::test]
    async fn handshake_ack_advances_to_work() {
        let (mut a, mut b) = pair();
        a.handshake(vec![]).await.unwrap();
        b.recv().await.unwrap();
        b.acknowledge(vec![]).await.unwrap();
        let admitted = a.recv().await.unwrap().unwrap();
        assert_eq!(admitted.block_type, BlockType::HandshakeAcknowledgement);
        assert_eq!(a.state(), State::Work);
    }

    #[tokio::test]
    async fn data_is_rejected_before_work_state() {
        let (a, mut b) = pair();
        a.send(b"too early".to_vec()).await.unwrap();
        // still in Start: the gate drops it, recv below would otherwise
        // hang, so assert via direct admission instead.
        let block = Block::new(BlockType::Data, b"too early".to_vec());
        let admitted = b.admit(block);
        assert!(admitted.is_none());
        assert_eq!(b.state(), State::Start);
    }

    #[tokio::test]
    async fn work_admits_data_heartbeat_and_kick() {
        let (mut a, mut b) = pair();
        a.handshake(vec![]).await.unwrap();
        b.recv().await.unwrap();
        b.acknowledge(vec![]).await.unwrap();
        a.recv().await.unwrap();
        assert_eq!(a.state(), State::Work);

        b.send(b"payload".to_vec()).await.unwrap();
        let admitted = a.recv().await.unwrap().unwrap();
        assert_eq!(admitted.block_type, BlockType::Data);
    }

    #[tokio::test]
    async fn kick_reason_is_decimal_text_not_a_raw_byte() {
        let (a, mut b) = pair();
        a.kick(2).await.unwrap();
        let block = b.transport.recv_block().await.unwrap();
        assert_eq!(block.body, b"2");
    }

    #[tokio::test]
    async fn disconnect_closes_transport_and_state() {
        let (mut a, _b) = pair();
        a.disconnect().await;
        assert_eq!(a.state(), State::Closed);
        assert!(a.transport.is_closed());
    }

    #[tokio::test]
    async fn recv_on_closed_transport_yields_error_and_closed_state() {
        let (mut a, b) = pair();
        drop(b);
        let err = a.recv().await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
        assert_eq!(a.state(), State::Closed);
    }
}
