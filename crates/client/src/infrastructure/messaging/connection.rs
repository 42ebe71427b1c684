//! Connection lifecycle management.
//!
//! Two views of the same state:
//! - `ConnectionStateCell` / `ConnectionStateObserver`: shared, readable from
//!   any thread, awaitable. Callers use it to reject operations after close
//!   without a round trip through the bridge task.
//! - `ConnectionMachine`: owned by the bridge task; performs the transitions
//!   and fires the lifecycle hooks exactly once.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::BridgeError;

use super::invoke_guarded;

/// Connection state of a bridge client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport is being opened
    Connecting,
    /// Transport ready; operations are accepted
    Open,
    /// Terminal; no transition leaves it
    Closed,
}

// =============================================================================
// Shared state
// =============================================================================

/// Shared, monotonic connection state.
///
/// Only `Connecting → Open` and `* → Closed` are accepted; everything else is
/// ignored, so `Closed` can never be left.
#[derive(Clone)]
pub struct ConnectionStateCell {
    tx: Arc<watch::Sender<ConnectionState>>,
}

impl ConnectionStateCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Connecting);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Returns true if this call performed the transition.
    pub fn mark_open(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Open;
                true
            } else {
                false
            }
        })
    }

    /// Returns true if this call performed the transition.
    pub fn mark_closed(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == ConnectionState::Closed {
                false
            } else {
                *state = ConnectionState::Closed;
                true
            }
        })
    }

    pub fn observer(&self) -> ConnectionStateObserver {
        ConnectionStateObserver {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ConnectionStateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Observable connection state for callers that do not own the client.
#[derive(Clone)]
pub struct ConnectionStateObserver {
    rx: watch::Receiver<ConnectionState>,
}

impl ConnectionStateObserver {
    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.rx.borrow()
    }

    /// Check if currently open.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Wait until the connection has left `Connecting`.
    ///
    /// Returns the state it settled in (`Open` or `Closed`).
    pub async fn settled(&self) -> ConnectionState {
        let mut rx = self.rx.clone();
        let settled = rx
            .wait_for(|state| *state != ConnectionState::Connecting)
            .await
            .map(|state| *state)
            .unwrap_or(ConnectionState::Closed);
        settled
    }

    /// Wait until the connection is closed.
    pub async fn closed(&self) {
        let mut rx = self.rx.clone();
        let _ = rx
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }
}

// =============================================================================
// Lifecycle hooks + state machine
// =============================================================================

pub type OpenHook = Box<dyn FnOnce() + Send + 'static>;
pub type CloseHook = Box<dyn FnOnce(Option<BridgeError>) + Send + 'static>;
pub type ErrorHook = Box<dyn FnMut(BridgeError) + Send + 'static>;

/// User callbacks for connection-level events.
#[derive(Default)]
pub struct LifecycleHooks {
    pub on_open: Option<OpenHook>,
    pub on_close: Option<CloseHook>,
    /// `err` envelopes no request or handler claims
    pub on_error: Option<ErrorHook>,
}

/// Connection state machine owned by the bridge task.
pub struct ConnectionMachine {
    phase: ConnectionState,
    shared: ConnectionStateCell,
    hooks: LifecycleHooks,
}

impl ConnectionMachine {
    pub fn new(shared: ConnectionStateCell, hooks: LifecycleHooks) -> Self {
        Self {
            phase: ConnectionState::Connecting,
            shared,
            hooks,
        }
    }

    pub fn phase(&self) -> ConnectionState {
        self.phase
    }

    pub fn is_open(&self) -> bool {
        self.phase == ConnectionState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.phase == ConnectionState::Closed
    }

    /// A caller marked the shared state `Closed` but this machine has not
    /// closed yet.
    pub fn close_requested(&self) -> bool {
        self.phase != ConnectionState::Closed && self.shared.get() == ConnectionState::Closed
    }

    /// Enter `Open` and fire the open hook.
    ///
    /// Refused when not `Connecting`, or when the caller already requested a
    /// close that the bridge task has not processed yet.
    pub fn open(&mut self) -> bool {
        if self.phase != ConnectionState::Connecting || !self.shared.mark_open() {
            return false;
        }
        self.phase = ConnectionState::Open;
        tracing::info!("Bridge connection open");

        if let Some(hook) = self.hooks.on_open.take() {
            invoke_guarded("Open hook", "", hook);
        }
        true
    }

    /// Enter `Closed` and fire the close hook with `cause`.
    ///
    /// Returns false if already closed; the hook never fires twice.
    pub fn close(&mut self, cause: Option<BridgeError>) -> bool {
        if self.phase == ConnectionState::Closed {
            return false;
        }
        self.phase = ConnectionState::Closed;
        self.shared.mark_closed();
        self.hooks.on_open = None;

        match &cause {
            Some(err) => tracing::error!(error = %err, "Bridge connection closed"),
            None => tracing::info!("Bridge connection closed"),
        }

        if let Some(hook) = self.hooks.on_close.take() {
            invoke_guarded("Close hook", "", || hook(cause));
        }
        self.hooks.on_error = None;
        true
    }

    /// Hand an unclaimed failure to the error hook.
    pub fn report_error(&mut self, error: BridgeError) {
        match self.hooks.on_error.as_mut() {
            Some(hook) => {
                invoke_guarded("Error hook", "", || hook(error));
            }
            None => tracing::warn!(error = %error, "Unhandled bridge error"),
        }
    }
}
