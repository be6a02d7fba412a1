//! Pluggable handshake verification.
//!
//! Four stateless operations drive the two-round handshake exchange in
//! [`crate::commander::Commander`]. Implementations may encode whatever they
//! like in the handshake body; the core only ever treats it as opaque bytes.

use serde::{Deserialize, Serialize};

use crate::rand_id::random_alphanumeric;

/// Outcome of inspecting an inbound handshake or acknowledgement body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    Success,
    Failed,
}

/// Stateless handshake contract. Implementations take `&self` but must not
/// hold connection-specific mutable state — everything they need to verify
/// a reply travels in the body they previously produced.
pub trait Validator: Send + Sync {
    /// Produce the initial handshake offer. `body` is caller-supplied opaque
    /// detail to fold into the offer, if any.
    fn handshake(&self, body: Option<&[u8]>) -> Vec<u8>;

    /// Inspect a received initial handshake.
    fn verify_handshake(&self, body: &[u8]) -> VerifyOutcome;

    /// Produce the reply to a verified initial, typically echoing a nonce.
    fn acknowledgement(&self, body: &[u8]) -> Vec<u8>;

    /// Inspect a received acknowledgement.
    fn verify_acknowledgement(&self, body: &[u8]) -> VerifyOutcome;
}

#[derive(Serialize, Deserialize)]
struct HandshakeBody {
    version: u32,
    timestamp: u64,
    nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct AcknowledgementBody {
    received: bool,
    nonce: String,
}

const SUPPORTED_VERSION: u32 = 1;

/// Ships alongside the [`Validator`] trait: encodes
/// `{version, timestamp, nonce, payload?}` as JSON and accepts any
/// well-formed message with `version == 1`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultValidator;

impl Validator for DefaultValidator {
    fn handshake(&self, body: Option<&[u8]>) -> Vec<u8> {
        let payload = body.map(|b| String::from_utf8_lossy(b).into_owned());
        let msg = HandshakeBody {
            version: SUPPORTED_VERSION,
            timestamp: current_unix_millis(),
            nonce: random_alphanumeric(16),
            payload,
        };
        serde_json::to_vec(&msg).unwrap_or_default()
    }

    fn verify_handshake(&self, body: &[u8]) -> VerifyOutcome {
        match serde_json::from_slice::<HandshakeBody>(body) {
            Ok(msg) if msg.version == SUPPORTED_VERSION => VerifyOutcome::Success,
            _ => VerifyOutcome::Failed,
        }
    }

    fn acknowledgement(&self, body: &[u8]) -> Vec<u8> {
        let nonce = serde_json::from_slice::<HandshakeBody>(body)
            .map(|msg| msg.nonce)
            .unwrap_or_default();
        let ack = AcknowledgementBody {
            received: true,
            nonce,
        };
        serde_json::to_vec(&ack).unwrap_or_default()
    }

    fn verify_acknowledgement(&self, body: &[u8]) -> VerifyOutcome {
        match serde_json::from_slice::<AcknowledgementBody>(body) {
            Ok(ack) if ack.received => VerifyOutcome::Success,
            _ => VerifyOutcome::Failed,
        }
    }
}

fn current_unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
