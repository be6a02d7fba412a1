//! Reassembles whole [`Block`]s out of arbitrarily chunked bytes.
//!
//! Used by both transport backends: the stream backend feeds it raw socket
//! reads, the websocket backend feeds it the bytes of each inbound binary
//! message. Neither backend may assume a chunk boundary lines up with a
//! frame boundary.

use crate::block::{Block, BlockError, BlockType};

const HEAD_LEN: usize = 4;

#[derive(Debug)]
enum ReadState {
    Head,
    Body { block_type: BlockType, len: usize },
    Closed,
}

/// Incremental block reassembler.
///
/// Feed it bytes as they arrive with [`Framer::push`]; it returns every
/// whole frame that chunk completed, in order. A single chunk may complete
/// zero, one, or many frames.
#[derive(Debug)]
pub struct Framer {
    state: ReadState,
    scratch: Vec<u8>,
}

impl Framer {
    pub fn new() -> Self {
        Self {
            state: ReadState::Head,
            scratch: Vec::with_capacity(HEAD_LEN),
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, ReadState::Closed)
    }

    /// Mark the framer closed; further `push` calls return no frames.
    pub fn close(&mut self) {
        self.state = ReadState::Closed;
        self.scratch.clear();
    }

    /// Feed a chunk of inbound bytes. Returns every block the chunk
    /// completed, in wire order. Framing corruption (an invalid type octet)
    /// discards the rest of the current chunk and resets to the head state
    /// so reassembly can recover on the next frame boundary; it does not
    /// close the framer.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Block> {
        let mut out = Vec::new();
        let mut cursor = 0usize;

        while cursor < chunk.len() {
            if self.is_closed() {
                break;
            }

            match &self.state {
                ReadState::Head => {
                    let need = HEAD_LEN - self.scratch.len();
                    let take = need.min(chunk.len() - cursor);
                    self.scratch.extend_from_slice(&chunk[cursor..cursor + take]);
                    cursor += take;

                    if self.scratch.len() == HEAD_LEN {
                        match BlockType::from_u8(self.scratch[0]) {
                            Some(block_type) => {
                                let len = ((self.scratch[1] as usize) << 16)
                                    | ((self.scratch[2] as usize) << 8)
                                    | (self.scratch[3] as usize);
                                self.scratch.clear();
                                if len == 0 {
                                    out.push(Block::new(block_type, Vec::new()));
                                    self.state = ReadState::Head;
                                } else {
                                    self.state = ReadState::Body { block_type, len };
                                }
                            }
                            None => {
                                tracing::warn!(
                                    type_octet = self.scratch[0],
                                    "dropping chunk after invalid block type"
                                );
                                self.scratch.clear();
                                self.state = ReadState::Head;
                                break;
                            }
                        }
                    }
                }
                ReadState::Body { block_type, len } => {
                    let block_type = *block_type;
                    let len = *len;
                    let need = len - self.scratch.len();
                    let take = need.min(chunk.len() - cursor);
                    self.scratch.extend_from_slice(&chunk[cursor..cursor + take]);
                    cursor += take;

                    if self.scratch.len() == len {
                        let body = std::mem::take(&mut self.scratch);
                        out.push(Block::new(block_type, body));
                        self.state = ReadState::Head;
                    }
                }
                ReadState::Closed => break,
            }
        }

        out
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode exactly one whole frame out of `buf`, erroring if it is short or
/// malformed. Unlike [`Framer`] this does not tolerate partial frames; it is
/// used by transports (like websocket) that can guarantee a message is a
/// single already-complete frame, and by tests exercising [`crate::block`]
/// directly.
pub fn decode_one(buf: &[u8]) -> Result<Block, BlockError> {
    let (block_type, body) = crate::block::decode(buf)?;
    Ok(Block::new(block_type, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::encode;

    #[test]
    fn single_frame_single_chunk() {
        let mut framer = Framer::new();
        let encoded = encode(BlockType::Heartbeat, &[]).unwrap();
        let blocks = framer.push(&encoded);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].block_type, BlockType::Heartbeat);
    }

    #[test]
    fn frame_split_across_many_one_byte_chunks() {
        let mut framer = Framer::new();
        let encoded = encode(BlockType::Data, b"hello").unwrap();

        let mut all = Vec::new();
        for byte in &encoded {
            all.extend(framer.push(std::slice::from_ref(byte)));
        }

        assert_eq!(all.len(), 1);
        assert_eq!(all[0].block_type, BlockType::Data);
        assert_eq!(all[0].body, b"hello");
    }

    #[test]
    fn multiple_frames_in_one_chunk() {
        let mut framer = Framer::new();
        let mut combined = encode(BlockType::Handshake, b"a").unwrap();
        combined.extend(encode(BlockType::Data, b"bc").unwrap());
        combined.extend(encode(BlockType::Heartbeat, &[]).unwrap());

        let blocks = framer.push(&combined);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].block_type, BlockType::Handshake);
        assert_eq!(blocks[1].body, b"bc");
        assert_eq!(blocks[2].block_type, BlockType::Heartbeat);
    }

    #[test]
    fn arbitrary_chunk_partitioning_reassembles_in_order() {
        let mut combined = Vec::new();
        for i in 0u8..5 {
            combined.extend(encode(BlockType::Data, &[i; 3]).unwrap());
        }

        // Try a handful of partitionings of the same byte stream.
        let chunk_sizes = [1usize, 2, 3, 7, 1000];
        for &size in &chunk_sizes {
            let mut framer = Framer::new();
            let mut out = Vec::new();
            for window in combined.chunks(size) {
                out.extend(framer.push(window));
            }
            assert_eq!(out.len(), 5, "chunk size {size}");
            for (i, block) in out.iter().enumerate() {
                assert_eq!(block.block_type, BlockType::Data);
                assert_eq!(block.body, vec![i as u8; 3]);
            }
        }
    }

    #[test]
    fn invalid_type_recovers_on_next_frame() {
        let mut framer = Framer::new();
        let mut combined = vec![9u8, 0, 0, 0]; // invalid type, rest of chunk dropped
        combined.extend(encode(BlockType::Kick, b"x").unwrap());

        // The corrupt header and the valid frame are fed as separate chunks
        // so recovery is unambiguous: the first chunk is fully discarded,
        // the second starts a fresh head parse.
        let first = framer.push(&combined[0..4]);
        assert!(first.is_empty());
        let second = framer.push(&combined[4..]);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].block_type, BlockType::Kick);
    }

    #[test]
    fn empty_chunk_is_a_no_op() {
        let mut framer = Framer::new();
        assert!(framer.push(&[]).is_empty());
    }

    #[test]
    fn close_stops_further_framing() {
        let mut framer = Framer::new();
        framer.close();
        assert!(framer.is_closed());
        let encoded = encode(BlockType::Heartbeat, &[]).unwrap();
        assert!(framer.push(&encoded).is_empty());
    }
}
