//! Envelope types exchanged over the bridge connection
//!
//! Every frame on the wire is exactly one JSON object of this shape:
//!
//! ```json
//! {"type":"send","address":"svc.add","headers":{"k":"v"},"body":{"a":1},"replyAddress":"..."}
//! ```
//!
//! ## Compatibility
//!
//! - Optional fields are omitted when empty and default when absent
//! - `rec` is accepted as an alias of `message` (newer bridge servers)
//! - `pong` is accepted so keep-alive answers from TCP bridges decode cleanly

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::failure::ReplyFailure;

// =============================================================================
// Envelope Type
// =============================================================================

/// Kind of an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeType {
    /// Point-to-point message, optionally expecting a reply
    Send,
    /// Broadcast to every consumer of the address
    Publish,
    /// Ask the bridge to route an address to this client
    Register,
    /// Stop routing an address to this client
    Unregister,
    /// Inbound delivery for a registered address or a reply address
    #[serde(alias = "rec")]
    Message,
    /// Inbound failure
    Err,
    /// Keep-alive
    Ping,
    /// Keep-alive answer
    Pong,
}

impl EnvelopeType {
    /// Wire name of this type
    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeType::Send => "send",
            EnvelopeType::Publish => "publish",
            EnvelopeType::Register => "register",
            EnvelopeType::Unregister => "unregister",
            EnvelopeType::Message => "message",
            EnvelopeType::Err => "err",
            EnvelopeType::Ping => "ping",
            EnvelopeType::Pong => "pong",
        }
    }

    /// Only `send` and `message` envelopes may carry a reply address.
    pub fn allows_reply_address(self) -> bool {
        matches!(self, EnvelopeType::Send | EnvelopeType::Message)
    }

    /// Whether an envelope of this type is meaningless without an address.
    ///
    /// `err` may be connection-level (no address), keep-alives never have one.
    pub fn requires_address(self) -> bool {
        matches!(
            self,
            EnvelopeType::Send
                | EnvelopeType::Publish
                | EnvelopeType::Register
                | EnvelopeType::Unregister
                | EnvelopeType::Message
        )
    }
}

impl fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Headers
// =============================================================================

/// Envelope headers: a string-to-string mapping.
///
/// Kept ordered so that encoded frames are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Fill in every key from `defaults` that is not already set.
    ///
    /// Values already present win over defaults.
    pub fn merge_defaults(&mut self, defaults: &Headers) {
        for (key, value) in &defaults.0 {
            self.0
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Accepts an absent or `null` headers field as empty headers.
    fn deserialize_nullable<'de, D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Headers>::deserialize(deserializer)?.unwrap_or_default())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Headers {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// One bridge frame.
///
/// `failure_code`, `failure_type` and `message` are only populated on `err`
/// envelopes; use [`Envelope::failure`] to read them as a [`ReplyFailure`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(
        default,
        skip_serializing_if = "Headers::is_empty",
        deserialize_with = "Headers::deserialize_nullable"
    )]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub body: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Envelope {
    fn bare(kind: EnvelopeType, address: impl Into<String>) -> Self {
        Self {
            kind,
            address: address.into(),
            headers: Headers::default(),
            body: Value::Null,
            reply_address: None,
            failure_code: None,
            failure_type: None,
            message: None,
        }
    }

    /// Point-to-point `send`; a reply address asks the remote to answer.
    pub fn send(
        address: impl Into<String>,
        body: Value,
        headers: Headers,
        reply_address: Option<String>,
    ) -> Self {
        Self {
            headers,
            body,
            reply_address,
            ..Self::bare(EnvelopeType::Send, address)
        }
    }

    pub fn publish(address: impl Into<String>, body: Value, headers: Headers) -> Self {
        Self {
            headers,
            body,
            ..Self::bare(EnvelopeType::Publish, address)
        }
    }

    pub fn register(address: impl Into<String>, headers: Headers) -> Self {
        Self {
            headers,
            ..Self::bare(EnvelopeType::Register, address)
        }
    }

    pub fn unregister(address: impl Into<String>, headers: Headers) -> Self {
        Self {
            headers,
            ..Self::bare(EnvelopeType::Unregister, address)
        }
    }

    pub fn ping() -> Self {
        Self::bare(EnvelopeType::Ping, "")
    }

    pub fn pong() -> Self {
        Self::bare(EnvelopeType::Pong, "")
    }

    /// Inbound delivery, as produced by the bridge server.
    pub fn message(
        address: impl Into<String>,
        body: Value,
        headers: Headers,
        reply_address: Option<String>,
    ) -> Self {
        Self {
            headers,
            body,
            reply_address,
            ..Self::bare(EnvelopeType::Message, address)
        }
    }

    /// Inbound failure, as produced by the bridge server.
    pub fn err(address: impl Into<String>, failure: ReplyFailure) -> Self {
        Self {
            failure_code: failure.failure_code,
            failure_type: failure.failure_type,
            message: Some(failure.message),
            ..Self::bare(EnvelopeType::Err, address)
        }
    }

    /// Failure details of an `err` envelope.
    ///
    /// Connection-level errors put their text in `body` rather than `message`.
    pub fn failure(&self) -> ReplyFailure {
        let message = match (&self.message, &self.body) {
            (Some(message), _) => message.clone(),
            (None, Value::String(text)) => text.clone(),
            (None, Value::Null) => "unknown failure".to_string(),
            (None, other) => other.to_string(),
        };
        ReplyFailure {
            failure_code: self.failure_code,
            failure_type: self.failure_type.clone(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_send_serializes_camel_case_and_omits_empty_fields() {
        let envelope = Envelope::send(
            "svc.add",
            json!({"a": 1, "b": 2}),
            Headers::new(),
            Some("reply-1".into()),
        );
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "send",
                "address": "svc.add",
                "body": {"a": 1, "b": 2},
                "replyAddress": "reply-1"
            })
        );
    }

    #[test]
    fn test_ping_is_type_only() {
        let value = serde_json::to_value(Envelope::ping()).unwrap();
        assert_eq!(value, json!({"type": "ping"}));
    }

    #[test]
    fn test_rec_alias_decodes_as_message() {
        let envelope: Envelope =
            serde_json::from_str(r#"{"type":"rec","address":"news","body":"hi"}"#).unwrap();
        assert_eq!(envelope.kind, EnvelopeType::Message);
        assert_eq!(envelope.body, json!("hi"));
    }

    #[test]
    fn test_null_headers_decode_as_empty() {
        let envelope: Envelope =
            serde_json::from_str(r#"{"type":"message","address":"a","headers":null}"#).unwrap();
        assert!(envelope.headers.is_empty());
    }

    #[test]
    fn test_merge_defaults_keeps_explicit_values() {
        let mut headers = Headers::from([("auth", "call")]);
        let defaults = Headers::from([("auth", "default"), ("tenant", "t1")]);
        headers.merge_defaults(&defaults);
        assert_eq!(headers.get("auth"), Some("call"));
        assert_eq!(headers.get("tenant"), Some("t1"));
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_failure_prefers_message_then_body() {
        let envelope = Envelope::err(
            "reply-1",
            ReplyFailure::new("divide by zero")
                .with_code(500)
                .with_type("RECIPIENT_FAILURE"),
        );
        let failure = envelope.failure();
        assert_eq!(failure.message, "divide by zero");
        assert_eq!(failure.failure_code, Some(500));

        let access: Envelope =
            serde_json::from_str(r#"{"type":"err","body":"access_denied"}"#).unwrap();
        assert_eq!(access.failure().message, "access_denied");
    }

    #[test]
    fn test_reply_address_rules() {
        assert!(EnvelopeType::Send.allows_reply_address());
        assert!(EnvelopeType::Message.allows_reply_address());
        assert!(!EnvelopeType::Publish.allows_reply_address());
        assert!(!EnvelopeType::Err.requires_address());
        assert!(EnvelopeType::Register.requires_address());
    }
}
