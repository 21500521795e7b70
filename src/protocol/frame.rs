//! Primus frames.
//!
//! Every text unit received from the transport is one [`Frame`]. The kind is
//! decided purely by content:
//!
//! 1. a JSON string `"primus::ping::<nonce>"` is a keepalive [`Frame::Ping`],
//! 2. a JSON string `"primus::pong::<nonce>"` is a [`Frame::Pong`],
//! 3. anything else must parse as JSON and becomes a [`Frame::Payload`].

use serde_json::Value;

use super::ProtocolError;

const PING_PREFIX: &str = "primus::ping::";
const PONG_PREFIX: &str = "primus::pong::";

/// A classified inbound Primus frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Keepalive request from the server. Must be answered with a pong
    /// carrying the same nonce. The nonce is kept exactly as it appeared
    /// between the quotes, escapes included.
    ///
    /// Wire: `"primus::ping::1553458994363"`
    Ping(String),

    /// Keepalive answer, nonce kept the same way. The client never pings, so
    /// this is informational.
    ///
    /// Wire: `"primus::pong::1553458994363"`
    Pong(String),

    /// A decoded JSON payload, handed to [`PayloadCodec`](super::PayloadCodec).
    Payload(Value),
}

impl Frame {
    /// Classifies one raw text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if the frame is neither a
    /// keepalive frame nor valid JSON.
    pub fn classify(text: &str) -> Result<Self, ProtocolError> {
        let text = text.trim();
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ProtocolError::MalformedPayload(format!("invalid JSON: {e}")))?;

        if let Value::String(decoded) = &value {
            if let Some(nonce) = keepalive_nonce(text, decoded, PING_PREFIX) {
                return Ok(Self::Ping(nonce));
            }
            if let Some(nonce) = keepalive_nonce(text, decoded, PONG_PREFIX) {
                return Ok(Self::Pong(nonce));
            }
        }

        Ok(Self::Payload(value))
    }

    /// Formats the pong reply for a ping nonce.
    ///
    /// `nonce` is written between the quotes as is, so a nonce taken from
    /// [`Frame::Ping`] comes back byte for byte.
    #[must_use]
    pub fn pong(nonce: &str) -> String {
        format!("\"{PONG_PREFIX}{nonce}\"")
    }

    /// Formats a ping frame. Used by tests and server-side tooling.
    #[must_use]
    pub fn ping(nonce: &str) -> String {
        format!("\"{PING_PREFIX}{nonce}\"")
    }
}

/// Returns the nonce of a keepalive frame as raw wire text.
///
/// `raw` is the trimmed frame and `decoded` its JSON string value. The nonce
/// is sliced from `raw` so escapes survive. If the prefix itself was escaped
/// the decoded nonce is re-escaped instead.
fn keepalive_nonce(raw: &str, decoded: &str, prefix: &str) -> Option<String> {
    let decoded_nonce = decoded.strip_prefix(prefix).filter(|nonce| !nonce.is_empty())?;

    let raw_nonce = raw
        .strip_prefix('"')
        .and_then(|body| body.strip_suffix('"'))
        .and_then(|body| body.strip_prefix(prefix));
    Some(match raw_nonce {
        Some(nonce) => nonce.to_owned(),
        None => {
            let quoted = Value::String(decoded_nonce.to_owned()).to_string();
            quoted[1..quoted.len() - 1].to_owned()
        }
    })
}
