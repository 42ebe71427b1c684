//! Correlation table for request/reply exchanges.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::BridgeError;

use super::invoke_guarded;
use super::message::Message;

/// Callback awaiting the single reply to a `send`.
pub type ReplyCallback = Box<dyn FnOnce(Result<Message, BridgeError>) + Send + 'static>;

struct PendingReply {
    callback: ReplyCallback,
    created_at: DateTime<Utc>,
}

/// Tracks pending reply callbacks keyed by reply address.
///
/// An entry leaves the table the moment its callback is invoked, so each
/// callback runs at most once.
#[derive(Default)]
pub struct PendingReplies {
    inner: HashMap<String, PendingReply>,
}

impl PendingReplies {
    /// Insert a pending reply callback.
    ///
    /// Hands the callback back if the reply address is already pending.
    pub fn insert(
        &mut self,
        reply_address: String,
        callback: ReplyCallback,
    ) -> Result<(), ReplyCallback> {
        if self.inner.contains_key(&reply_address) {
            return Err(callback);
        }
        self.inner.insert(
            reply_address,
            PendingReply {
                callback,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    pub fn contains(&self, reply_address: &str) -> bool {
        self.inner.contains_key(reply_address)
    }

    /// Forget a pending request without invoking its callback.
    ///
    /// A reply that arrives afterwards finds no entry and is dropped.
    pub fn remove(&mut self, reply_address: &str) -> bool {
        self.inner.remove(reply_address).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Resolve and remove a pending request.
    ///
    /// Returns true if a pending request was found.
    pub fn resolve(&mut self, reply_address: &str, result: Result<Message, BridgeError>) -> bool {
        let Some(pending) = self.inner.remove(reply_address) else {
            tracing::debug!(
                reply_address = %reply_address,
                "Reply for unknown reply address - already answered or forgotten"
            );
            return false;
        };

        let waited_ms = (Utc::now() - pending.created_at).num_milliseconds();
        tracing::trace!(reply_address = %reply_address, waited_ms, "Resolving pending reply");
        invoke_guarded("Reply callback", reply_address, || {
            (pending.callback)(result)
        });
        true
    }

    /// Fail every pending request with `error` and empty the table.
    pub fn fail_all(&mut self, error: &BridgeError) -> usize {
        let count = self.inner.len();
        for (reply_address, pending) in self.inner.drain() {
            let outcome = Err(error.clone());
            invoke_guarded("Reply callback", &reply_address, || {
                (pending.callback)(outcome)
            });
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    type Outcomes = Arc<Mutex<Vec<Result<Message, BridgeError>>>>;

    fn capture(outcomes: &Outcomes) -> ReplyCallback {
        let outcomes = Arc::clone(outcomes);
        Box::new(move |result| outcomes.lock().unwrap().push(result))
    }

    #[test]
    fn test_resolve_invokes_once_and_removes() {
        let outcomes: Outcomes = Arc::default();
        let mut pending = PendingReplies::default();
        assert!(pending.insert("r-1".into(), capture(&outcomes)).is_ok());

        assert!(pending.resolve("r-1", Ok(Message::new("r-1", json!({"result": 3})))));
        assert!(!pending.resolve("r-1", Ok(Message::new("r-1", json!({"result": 4})))));

        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(
            outcomes[0].as_ref().unwrap().body,
            json!({"result": 3})
        );
        assert!(pending.is_empty());
    }

    #[test]
    fn test_insert_rejects_duplicate_reply_address() {
        let outcomes: Outcomes = Arc::default();
        let mut pending = PendingReplies::default();
        assert!(pending.insert("r-1".into(), capture(&outcomes)).is_ok());
        let rejected = pending.insert("r-1".into(), capture(&outcomes));
        assert!(rejected.is_err());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_remove_forgets_without_invoking() {
        let outcomes: Outcomes = Arc::default();
        let mut pending = PendingReplies::default();
        assert!(pending.insert("r-1".into(), capture(&outcomes)).is_ok());

        assert!(pending.remove("r-1"));
        assert!(!pending.resolve("r-1", Ok(Message::new("r-1", json!(null)))));
        assert!(outcomes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_fail_all_flushes_every_entry() {
        let outcomes: Outcomes = Arc::default();
        let mut pending = PendingReplies::default();
        assert!(pending.insert("r-1".into(), capture(&outcomes)).is_ok());
        assert!(pending.insert("r-2".into(), capture(&outcomes)).is_ok());

        let failed = pending.fail_all(&BridgeError::Transport("reset".into()));

        assert_eq!(failed, 2);
        assert!(pending.is_empty());
        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|o| o == &Err(BridgeError::Transport("reset".into()))));
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let mut pending = PendingReplies::default();
        assert!(pending
            .insert("r-1".into(), Box::new(|_| panic!("callback bug")))
            .is_ok());
        assert!(pending.resolve("r-1", Ok(Message::new("r-1", json!(1)))));
        assert!(pending.is_empty());
    }
}
