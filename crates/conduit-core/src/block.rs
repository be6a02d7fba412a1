//! Wire-level block framing: one type octet, a 24-bit big-endian body
//! length, and the body itself. No state, no I/O — just the codec.

use std::fmt;

/// Maximum body length a block may carry (2^24 - 1, the largest value a
/// 24-bit length prefix can hold).
pub const MAX_BODY_LEN: usize = (1 << 24) - 1;

/// The four-octet-header unit exchanged on the wire.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockType {
    Handshake = 0,
    HandshakeAcknowledgement = 1,
    Heartbeat = 2,
    Data = 3,
    Kick = 4,
}

impl BlockType {
    /// Convert from a wire type octet. Returns `None` for undefined values.
    pub fn from_u8(val: u8) -> Option<Self> {
        Some(match val {
            0 => BlockType::Handshake,
            1 => BlockType::HandshakeAcknowledgement,
            2 => BlockType::Heartbeat,
            3 => BlockType::Data,
            4 => BlockType::Kick,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether a numeric type octet is one of the defined variants.
    pub fn is_valid(val: u8) -> bool {
        Self::from_u8(val).is_some()
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockType::Handshake => "handshake",
            BlockType::HandshakeAcknowledgement => "handshake-ack",
            BlockType::Heartbeat => "heartbeat",
            BlockType::Data => "data",
            BlockType::Kick => "kick",
        };
        write!(f, "{s}")
    }
}

/// Error encoding or decoding a block.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockError {
    #[error("body of {len} bytes exceeds max block body length of {MAX_BODY_LEN}")]
    BodyTooLarge { len: usize },
    #[error("unknown block type octet: {0}")]
    UnknownType(u8),
    #[error("block header truncated: got {got} of 4 bytes")]
    TruncatedHeader { got: usize },
    #[error("block body truncated: got {got} of {expected} bytes")]
    TruncatedBody { got: usize, expected: usize },
}

/// A decoded block: its type and its (possibly empty) body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub block_type: BlockType,
    pub body: Vec<u8>,
}

impl Block {
    pub fn new(block_type: BlockType, body: Vec<u8>) -> Self {
        Self { block_type, body }
    }

    /// Encode this block to its on-wire octets: 1 type octet + 3 big-endian
    /// length octets + body.
    pub fn encode(&self) -> Result<Vec<u8>, BlockError> {
        encode(self.block_type, &self.body)
    }
}

/// Encode a `(type, body)` pair into its on-wire representation.
pub fn encode(block_type: BlockType, body: &[u8]) -> Result<Vec<u8>, BlockError> {
    if body.len() > MAX_BODY_LEN {
        return Err(BlockError::BodyTooLarge { len: body.len() });
    }

    let mut out = Vec::with_capacity(4 + body.len());
    out.push(block_type.as_u8());
    let len = body.len() as u32;
    out.push((len >> 16) as u8);
    out.push((len >> 8) as u8);
    out.push(len as u8);
    out.extend_from_slice(body);
    Ok(out)
}

/// Decode a full frame (header + body) into its `(type, body)` pair.
///
/// `buf` must contain exactly one frame; use [`Framer`] to decode a whole
/// frame out of a byte stream that may be chunked arbitrarily.
pub fn decode(buf: &[u8]) -> Result<(BlockType, Vec<u8>), BlockError> {
    if buf.len() < 4 {
        return Err(BlockError::TruncatedHeader { got: buf.len() });
    }

    let block_type =
        BlockType::from_u8(buf[0]).ok_or(BlockError::UnknownType(buf[0]))?;
    let len = ((buf[1] as usize) << 16) | ((buf[2] as usize) << 8) | (buf[3] as usize);

    if buf.len() - 4 < len {
        return Err(BlockError::TruncatedBody {
            got: buf.len() - 4,
            expected: len,
        });
    }

    Ok((block_type, buf[4..4 + len].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_types() -> [BlockType; 5] {
        [
            BlockType::Handshake,
            BlockType::HandshakeAcknowledgement,
            BlockType::Heartbeat,
            BlockType::Data,
            BlockType::Kick,
        ]
    }

    #[test]
    fn block_type_roundtrip() {
        for t in all_types() {
            assert_eq!(BlockType::from_u8(t.as_u8()), Some(t));
        }
        assert_eq!(BlockType::from_u8(99), None);
    }

    #[test]
    fn block_type_is_valid() {
        for t in all_types() {
            assert!(BlockType::is_valid(t.as_u8()));
        }
        assert!(!BlockType::is_valid(5));
        assert!(!BlockType::is_valid(255));
    }

    #[test]
    fn encode_decode_roundtrip_empty_body() {
        for t in all_types() {
            let encoded = encode(t, &[]).unwrap();
            assert_eq!(encoded.len(), 4);
            let (decoded_type, decoded_body) = decode(&encoded).unwrap();
            assert_eq!(decoded_type, t);
            assert!(decoded_body.is_empty());
        }
    }

    #[test]
    fn encode_decode_roundtrip_with_body() {
        let body = b"hello conduit".to_vec();
        let encoded = encode(BlockType::Data, &body).unwrap();
        assert_eq!(encoded.len(), 4 + body.len());
        let (decoded_type, decoded_body) = decode(&encoded).unwrap();
        assert_eq!(decoded_type, BlockType::Data);
        assert_eq!(decoded_body, body);
    }

    #[test]
    fn header_layout_is_big_endian() {
        let body = vec![0u8; 300];
        let encoded = encode(BlockType::Data, &body).unwrap();
        assert_eq!(encoded[0], BlockType::Data.as_u8());
        // 300 = 0x00012C
        assert_eq!(encoded[1], 0x00);
        assert_eq!(encoded[2], 0x01);
        assert_eq!(encoded[3], 0x2C);
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let buf = [9u8, 0, 0, 0];
        assert_eq!(decode(&buf), Err(BlockError::UnknownType(9)));
    }

    #[test]
    fn decode_rejects_truncated_header() {
        let buf = [0u8, 0, 1];
        assert_eq!(decode(&buf), Err(BlockError::TruncatedHeader { got: 3 }));
    }

    #[test]
    fn decode_rejects_truncated_body() {
        let buf = [BlockType::Data.as_u8(), 0, 0, 5, 1, 2];
        assert_eq!(
            decode(&buf),
            Err(BlockError::TruncatedBody { got: 2, expected: 5 })
        );
    }

    #[test]
    fn encode_rejects_oversized_body() {
        let body = vec![0u8; MAX_BODY_LEN + 1];
        assert_eq!(
            encode(BlockType::Data, &body),
            Err(BlockError::BodyTooLarge {
                len: MAX_BODY_LEN + 1
            })
        );
    }

    #[test]
    fn max_body_len_fits_in_24_bits() {
        let body = vec![0u8; MAX_BODY_LEN];
        let encoded = encode(BlockType::Data, &body).unwrap();
        let (_, decoded) = decode(&encoded).unwrap();
        assert_eq!(decoded.len(), MAX_BODY_LEN);
    }
}
