//! Bridge error taxonomy.
//!
//! Every failure a caller can observe is one of these variants, delivered
//! either as the synchronous result of an operation (`NotOpen`) or through the
//! same callback / hook used for success.

use evbridge_protocol::{CodecError, ReplyFailure};
use thiserror::Error;

/// Errors surfaced by the bridge client.
///
/// `Clone` because one close cause is handed to the close hook and to every
/// pending reply callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Connection lost or never established
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed or out-of-sequence envelope
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The remote side failed a correlated request
    #[error("Reply error: {0}")]
    Reply(ReplyFailure),

    /// Operation attempted while the connection is not open
    #[error("Connection is not open")]
    NotOpen,

    /// The connection was closed locally while the request was pending
    #[error("Connection closed")]
    ConnectionClosed,

    /// Caller-side wait for a reply elapsed
    #[error("Request timed out after {0} ms")]
    Timeout(u64),
}

impl BridgeError {
    /// Whether this error ends the connection (as opposed to one request).
    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::Transport(_) | BridgeError::Protocol(_))
    }
}

impl From<CodecError> for BridgeError {
    fn from(err: CodecError) -> Self {
        BridgeError::Protocol(err.to_string())
    }
}

impl From<ReplyFailure> for BridgeError {
    fn from(failure: ReplyFailure) -> Self {
        BridgeError::Reply(failure)
    }
}
