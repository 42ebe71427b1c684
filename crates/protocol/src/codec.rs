//! Envelope codec
//!
//! Frames are UTF-8 JSON objects, one envelope per frame. Both directions run
//! the same structural validation so a decoded `Envelope` can be trusted by
//! the dispatcher without further checks.

use serde_json::Value;
use thiserror::Error;

use crate::envelope::Envelope;

/// Failure to turn a frame into an envelope (or back)
#[derive(Debug, Error)]
pub enum CodecError {
    /// Frame is not valid JSON or does not match the envelope shape
    #[error("Malformed frame: {0}")]
    Malformed(String),
    /// Frame parsed but breaks an envelope invariant
    #[error("Invalid {kind} envelope: {reason}")]
    Invalid { kind: String, reason: String },
    /// Envelope could not be serialized
    #[error("Failed to encode envelope: {0}")]
    Encode(String),
}

/// Serialize an envelope into a frame.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    validate(envelope)?;
    serde_json::to_vec(envelope).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Parse a frame into an envelope.
///
/// Rejects anything that is not a single JSON object, header values that are
/// not strings, unknown envelope types, and envelopes that break the
/// address / reply-address rules.
pub fn decode(frame: &[u8]) -> Result<Envelope, CodecError> {
    let value: Value =
        serde_json::from_slice(frame).map_err(|e| CodecError::Malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(CodecError::Malformed(
            "frame is not a JSON object".to_string(),
        ));
    }
    let envelope: Envelope =
        serde_json::from_value(value).map_err(|e| CodecError::Malformed(e.to_string()))?;
    validate(&envelope)?;
    Ok(envelope)
}

/// Check the structural invariants of an envelope.
pub fn validate(envelope: &Envelope) -> Result<(), CodecError> {
    let invalid = |reason: &str| CodecError::Invalid {
        kind: envelope.kind.to_string(),
        reason: reason.to_string(),
    };

    if envelope.kind.requires_address() && envelope.address.is_empty() {
        return Err(invalid("missing address"));
    }

    match &envelope.reply_address {
        Some(_) if !envelope.kind.allows_reply_address() => {
            Err(invalid("reply address not allowed"))
        }
        Some(reply) if reply.is_empty() => Err(invalid("empty reply address")),
        _ => Ok(()),
    }
}
