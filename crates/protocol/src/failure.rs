//! Failure details carried by `err` envelopes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Failure reported by the remote bus.
///
/// Either the answer to a correlated request (the remote handler called
/// `fail`, nobody consumed the address, the reply timed out on the server) or
/// a connection-level rejection such as `access_denied`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyFailure {
    /// Application or bus failure code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<i32>,
    /// Failure classification (`RECIPIENT_FAILURE`, `NO_HANDLERS`, `TIMEOUT`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_type: Option<String>,
    /// Human-readable message
    pub message: String,
}

impl ReplyFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            failure_code: None,
            failure_type: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.failure_code = Some(code);
        self
    }

    pub fn with_type(mut self, failure_type: impl Into<String>) -> Self {
        self.failure_type = Some(failure_type.into());
        self
    }
}

impl fmt::Display for ReplyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.failure_type, self.failure_code) {
            (Some(kind), Some(code)) => write!(f, "{} ({} {})", self.message, kind, code),
            (Some(kind), None) => write!(f, "{} ({})", self.message, kind),
            (None, Some(code)) => write!(f, "{} ({})", self.message, code),
            (None, None) => f.write_str(&self.message),
        }
    }
}
