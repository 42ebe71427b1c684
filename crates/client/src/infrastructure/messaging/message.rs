//! Messages as seen by handlers and reply callbacks.

use evbridge_protocol::{Envelope, Headers};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// One delivered message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Address the message was delivered on (a reply address for replies)
    pub address: String,
    pub headers: Headers,
    pub body: Value,
    /// Set when the sender expects an answer; see `EventBusClient::reply`
    pub reply_address: Option<String>,
}

impl Message {
    pub fn new(address: impl Into<String>, body: Value) -> Self {
        Self {
            address: address.into(),
            headers: Headers::default(),
            body,
            reply_address: None,
        }
    }

    /// Deserialize the body into a concrete type.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.body)
    }

    pub fn expects_reply(&self) -> bool {
        self.reply_address.is_some()
    }
}

impl From<Envelope> for Message {
    fn from(envelope: Envelope) -> Self {
        Self {
            address: envelope.address,
            headers: envelope.headers,
            body: envelope.body,
            reply_address: envelope.reply_address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sum {
        result: i64,
    }

    #[test]
    fn test_from_envelope_keeps_reply_address() {
        let envelope = Envelope::message(
            "svc.add",
            json!({"a": 1}),
            Headers::from([("k", "v")]),
            Some("r-1".into()),
        );
        let message = Message::from(envelope);
        assert_eq!(message.address, "svc.add");
        assert_eq!(message.headers.get("k"), Some("v"));
        assert!(message.expects_reply());
    }

    #[test]
    fn test_body_as_typed() {
        let message = Message::new("r-1", json!({"result": 3}));
        assert_eq!(message.body_as::<Sum>().unwrap(), Sum { result: 3 });
        assert!(message.body_as::<Vec<i64>>().is_err());
    }
}
