//! Handler Registry - address-keyed subscriptions.
//!
//! Push-based: handlers register callbacks that are invoked when messages
//! arrive on their address. The registry holds the callbacks until they are
//! explicitly removed or the connection closes.

use std::collections::HashMap;
use std::fmt;

use crate::error::BridgeError;

use super::invoke_guarded;
use super::message::Message;

/// Callback invoked for every message (or failure) delivered on an address.
pub type HandlerCallback = Box<dyn FnMut(Result<Message, BridgeError>) + Send + 'static>;

/// Identifies one registration; returned by `register_handler`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

struct HandlerEntry {
    id: HandlerId,
    callback: HandlerCallback,
}

/// Outcome of [`HandlerRegistry::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// No entry with that id on that address
    NotFound,
    /// Entry removed; `remaining` entries are still registered on the address
    Removed { remaining: usize },
}

/// Maps address → handlers in registration order.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Vec<HandlerEntry>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler.
    ///
    /// Returns true if this is the first handler for `address`, i.e. the remote
    /// side has to be asked to start routing the address here.
    pub fn insert(&mut self, address: &str, id: HandlerId, callback: HandlerCallback) -> bool {
        let entries = self.handlers.entry(address.to_string()).or_default();
        entries.push(HandlerEntry { id, callback });
        entries.len() == 1
    }

    /// Remove the handler registered under `id`.
    pub fn remove(&mut self, address: &str, id: HandlerId) -> Removal {
        let Some(entries) = self.handlers.get_mut(address) else {
            return Removal::NotFound;
        };
        let Some(position) = entries.iter().position(|entry| entry.id == id) else {
            return Removal::NotFound;
        };

        entries.remove(position);
        let remaining = entries.len();
        if remaining == 0 {
            self.handlers.remove(address);
        }
        Removal::Removed { remaining }
    }

    /// Deliver one result to every handler on `address`, in registration order.
    ///
    /// A panicking handler is logged and skipped; later handlers still run.
    /// Returns the number of handlers invoked.
    pub fn dispatch(&mut self, address: &str, result: &Result<Message, BridgeError>) -> usize {
        let Some(entries) = self.handlers.get_mut(address) else {
            return 0;
        };

        for entry in entries.iter_mut() {
            let delivery = result.clone();
            let callback = &mut entry.callback;
            invoke_guarded("Handler", address, || callback(delivery));
        }
        entries.len()
    }

    /// Number of handlers on `address`.
    pub fn count(&self, address: &str) -> usize {
        self.handlers.get(address).map_or(0, Vec::len)
    }

    /// Number of addresses with at least one handler.
    pub fn address_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Drop every handler, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.handlers.values().map(Vec::len).sum();
        self.handlers.clear();
        count
    }
}
