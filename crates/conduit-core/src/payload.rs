//! The `PayloadEnvelope` carried inside every Data block, and the
//! pluggable [`Serializer`] that turns it into bytes.
//!
//! Mirrors the teacher's `Encoding`/`Codec` split: a small discriminant
//! (here [`EnvelopeKind`]) plus a trait with one shipped implementation,
//! rather than hard-wiring a single wire format into the protocol engine.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::PayloadError;

/// What an envelope represents.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopeKind {
    Request = 0,
    Command = 1,
    Response = 2,
}

impl EnvelopeKind {
    pub fn from_u8(val: u8) -> Option<Self> {
        Some(match val {
            0 => EnvelopeKind::Request,
            1 => EnvelopeKind::Command,
            2 => EnvelopeKind::Response,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// The structured contents of a Data block, independent of wire format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayloadEnvelope {
    pub kind: EnvelopeKind,
    pub name: String,
    pub id: u64,
    pub data: Vec<u8>,
    pub error: String,
}

impl PayloadEnvelope {
    /// Whether `kind` is one of the defined variants. Always true for a
    /// value constructed through [`EnvelopeKind`], but the check exists so
    /// callers decoding off the wire via a non-validating serializer have
    /// something to assert.
    pub fn check(&self) -> bool {
        matches!(
            self.kind,
            EnvelopeKind::Request | EnvelopeKind::Command | EnvelopeKind::Response
        )
    }
}

/// Build an envelope directly, without serialization. Used to synthesize
/// timeout responses.
pub fn create(
    kind: EnvelopeKind,
    name: impl Into<String>,
    id: u64,
    data: Option<Vec<u8>>,
    error: Option<String>,
) -> PayloadEnvelope {
    PayloadEnvelope {
        kind,
        name: name.into(),
        id,
        data: data.unwrap_or_default(),
        error: error.unwrap_or_default(),
    }
}

/// Encode an envelope through an injected serializer.
pub fn encode(
    serializer: &dyn Serializer,
    kind: EnvelopeKind,
    name: impl Into<String>,
    id: u64,
    data: Option<Vec<u8>>,
    error: Option<String>,
) -> Result<Vec<u8>, PayloadError> {
    let envelope = create(kind, name, id, data, error);
    serializer.encode(&envelope)
}

/// Decode an envelope through an injected serializer.
pub fn decode(serializer: &dyn Serializer, bytes: &[u8]) -> Result<PayloadEnvelope, PayloadError> {
    serializer.decode(bytes)
}

/// Pluggable wire format for [`PayloadEnvelope`]. Implementations must be
/// synchronous and side-effect free — no I/O.
pub trait Serializer: Send + Sync {
    fn encode(&self, envelope: &PayloadEnvelope) -> Result<Vec<u8>, PayloadError>;
    fn decode(&self, bytes: &[u8]) -> Result<PayloadEnvelope, PayloadError>;
}

/// On-the-wire shape of the default JSON serializer: `data` is
/// base64-encoded since JSON has no native byte-string type.
#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    kind: u8,
    name: String,
    id: u64,
    data: String,
    error: String,
}

/// Ships alongside the [`Serializer`] trait as the default implementation:
/// a JSON object with `data` base64-encoded.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultJsonSerializer;

impl Serializer for DefaultJsonSerializer {
    fn encode(&self, envelope: &PayloadEnvelope) -> Result<Vec<u8>, PayloadError> {
        let wire = WireEnvelope {
            kind: envelope.kind.as_u8(),
            name: envelope.name.clone(),
            id: envelope.id,
            data: base64::engine::general_purpose::STANDARD.encode(&envelope.data),
            error: envelope.error.clone(),
        };
        serde_json::to_vec(&wire).map_err(|err| PayloadError::Encode(err.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<PayloadEnvelope, PayloadError> {
        let wire: WireEnvelope =
            serde_json::from_slice(bytes).map_err(|err| PayloadError::Decode(err.to_string()))?;
        let kind = EnvelopeKind::from_u8(wire.kind).ok_or(PayloadError::InvalidKind(wire.kind))?;
        let data = base64::engine::general_purpose::STANDARD
            .decode(wire.data)
            .map_err(|err| PayloadError::Decode(err.to_string()))?;
        Ok(PayloadEnvelope {
            kind,
            name: wire.name,
            id: wire.id,
            data,
            error: wire.error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_serializer_roundtrips_an_envelope() {
        let serializer = DefaultJsonSerializer;
        let bytes = encode(
            &serializer,
            EnvelopeKind::Request,
            "ping",
            7,
            Some(b"hello".to_vec()),
            None,
        )
        .unwrap();

        let decoded = decode(&serializer, &bytes).unwrap();
        assert_eq!(decoded.kind, EnvelopeKind::Request);
        assert_eq!(decoded.name, "ping");
        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.data, b"hello");
        assert_eq!(decoded.error, "");
    }

    #[test]
    fn default_serializer_base64_encodes_data_on_the_wire() {
        let serializer = DefaultJsonSerializer;
        let bytes = encode(
            &serializer,
            EnvelopeKind::Command,
            "cmd",
            0,
            Some(vec![0xff, 0x00, 0x10]),
            None,
        )
        .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains('\u{fffd}'));
        assert!(text.contains("\"data\":"));
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        let serializer = DefaultJsonSerializer;
        let bytes = serde_json::to_vec(&WireEnvelope {
            kind: 9,
            name: "x".into(),
            id: 0,
            data: String::new(),
            error: String::new(),
        })
        .unwrap();
        let err = decode(&serializer, &bytes).unwrap_err();
        assert!(matches!(err, PayloadError::InvalidKind(9)));
    }

    #[test]
    fn create_fills_default_data_and_error() {
        let envelope = create(EnvelopeKind::Response, "ping", 3, None, None);
        assert!(envelope.data.is_empty());
        assert!(envelope.error.is_empty());
        assert!(envelope.check());
    }
}
