//! Handler, correlation and connection-state bookkeeping.
//!
//! This module holds the state the bridge task owns:
//! - `HandlerRegistry`: address → ordered handlers (fan-out)
//! - `PendingReplies`: reply address → one-shot reply callback (correlation)
//! - `ConnectionMachine`: Connecting → Open → Closed with lifecycle hooks
//!
//! None of these types lock; the bridge task is the only mutator.

use std::panic::{catch_unwind, AssertUnwindSafe};

pub mod connection;
pub mod handler_registry;
pub mod message;
pub mod pending_replies;

pub use connection::{
    CloseHook, ConnectionMachine, ConnectionState, ConnectionStateCell, ConnectionStateObserver,
    ErrorHook, LifecycleHooks, OpenHook,
};
pub use handler_registry::{HandlerCallback, HandlerId, HandlerRegistry, Removal};
pub use message::Message;
pub use pending_replies::{PendingReplies, ReplyCallback};

/// Run a user callback so that a panic inside it cannot take down the bridge task.
///
/// Returns false if the callback panicked.
pub(crate) fn invoke_guarded(what: &'static str, address: &str, callback: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(()) => true,
        Err(_) => {
            tracing::error!(address = %address, "{} panicked; continuing", what);
            false
        }
    }
}
