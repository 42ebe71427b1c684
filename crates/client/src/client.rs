//! Event bus client - the public face of the bridge.
//!
//! `EventBusClient` is a cheap, cloneable handle. Every operation validates
//! synchronously, enqueues one command for the bridge task and returns; replies
//! and deliveries arrive later through the supplied callbacks.
//!
//! ```ignore
//! let client = EventBusClient::builder(BridgeConfig::from_env()?)
//!     .on_open(|| tracing::info!("bridge up"))
//!     .on_close(|cause| tracing::warn!(?cause, "bridge down"))
//!     .connect(Arc::new(WebSocketTransport::new()));
//!
//! client.opened().await?;
//! client.register_handler("news", None, |msg| println!("{:?}", msg))?;
//! let sum = client.request("svc.add", json!({"a": 1, "b": 2}), None).await?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use evbridge_protocol::Headers;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::infrastructure::bridge::{Bridge, BridgeCommand};
use crate::infrastructure::messaging::{
    ConnectionMachine, ConnectionState, ConnectionStateCell, ConnectionStateObserver, HandlerId,
    LifecycleHooks, Message, ReplyCallback,
};
use crate::ports::outbound::TransportPort;

/// Handle to one bridge connection.
///
/// Clones share the connection. When the last handle is dropped the
/// connection is closed as if [`EventBusClient::close`] had been called.
#[derive(Clone)]
pub struct EventBusClient {
    commands: mpsc::UnboundedSender<BridgeCommand>,
    state: ConnectionStateCell,
    next_handler_id: Arc<AtomicU64>,
}

/// Collects lifecycle hooks before the connection starts.
pub struct EventBusClientBuilder {
    config: BridgeConfig,
    hooks: LifecycleHooks,
}

impl EventBusClientBuilder {
    /// Called once when the connection opens.
    pub fn on_open(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.hooks.on_open = Some(Box::new(hook));
        self
    }

    /// Called once when the connection closes; `None` for a local close.
    pub fn on_close(mut self, hook: impl FnOnce(Option<BridgeError>) + Send + 'static) -> Self {
        self.hooks.on_close = Some(Box::new(hook));
        self
    }

    /// Called for `err` envelopes that no request or handler claims.
    pub fn on_error(mut self, hook: impl FnMut(BridgeError) + Send + 'static) -> Self {
        self.hooks.on_error = Some(Box::new(hook));
        self
    }

    /// Spawn the bridge task and start opening `transport`.
    ///
    /// Must be called from within a tokio runtime. The returned client starts
    /// in `Connecting`; failures to open are reported through `on_close`.
    pub fn connect(self, transport: Arc<dyn TransportPort>) -> EventBusClient {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let state = ConnectionStateCell::new();
        let machine = ConnectionMachine::new(state.clone(), self.hooks);

        let bridge = Bridge::new(transport, self.config, machine);
        tokio::spawn(bridge.run(commands_rx));

        EventBusClient {
            commands,
            state,
            next_handler_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl EventBusClient {
    pub fn builder(config: BridgeConfig) -> EventBusClientBuilder {
        EventBusClientBuilder {
            config,
            hooks: LifecycleHooks::default(),
        }
    }

    /// Connect without lifecycle hooks.
    pub fn connect(config: BridgeConfig, transport: Arc<dyn TransportPort>) -> Self {
        Self::builder(config).connect(transport)
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn observer(&self) -> ConnectionStateObserver {
        self.state.observer()
    }

    /// Wait for the connection to open.
    ///
    /// Fails with `NotOpen` if it closed instead.
    pub async fn opened(&self) -> Result<(), BridgeError> {
        match self.observer().settled().await {
            ConnectionState::Open => Ok(()),
            _ => Err(BridgeError::NotOpen),
        }
    }

    /// Register `callback` for messages on `address`.
    ///
    /// The first handler for an address asks the remote side to route it
    /// here. Every call adds a separate handler, removable by the returned id.
    pub fn register_handler<F>(
        &self,
        address: &str,
        headers: Option<Headers>,
        callback: F,
    ) -> Result<HandlerId, BridgeError>
    where
        F: FnMut(Result<Message, BridgeError>) + Send + 'static,
    {
        self.ensure_open()?;
        check_address(address)?;

        let id = HandlerId::new(self.next_handler_id.fetch_add(1, Ordering::Relaxed));
        self.submit(BridgeCommand::Register {
            address: address.to_string(),
            headers: headers.unwrap_or_default(),
            id,
            callback: Box::new(callback),
        })?;
        Ok(id)
    }

    /// Remove one handler. Unknown ids are ignored.
    ///
    /// Removing the last handler of an address tells the remote side to stop
    /// routing it here.
    pub fn unregister_handler(
        &self,
        address: &str,
        headers: Option<Headers>,
        id: HandlerId,
    ) -> Result<(), BridgeError> {
        self.ensure_open()?;
        check_address(address)?;

        self.submit(BridgeCommand::Unregister {
            address: address.to_string(),
            headers: headers.unwrap_or_default(),
            id,
        })
    }

    /// Point-to-point send.
    ///
    /// With a callback, the remote side may reply; the callback then runs
    /// exactly once with the reply, the remote failure, or the error that
    /// closed the connection.
    pub fn send(
        &self,
        address: &str,
        body: Value,
        headers: Option<Headers>,
        callback: Option<ReplyCallback>,
    ) -> Result<(), BridgeError> {
        self.send_internal(address, body, headers, callback)
            .map(|_| ())
    }

    /// Broadcast to every consumer of `address`. Never produces a reply.
    pub fn publish(
        &self,
        address: &str,
        body: Value,
        headers: Option<Headers>,
    ) -> Result<(), BridgeError> {
        self.ensure_open()?;
        check_address(address)?;

        self.submit(BridgeCommand::Publish {
            address: address.to_string(),
            body,
            headers: headers.unwrap_or_default(),
        })
    }

    /// Answer a message that carries a reply address.
    pub fn reply(
        &self,
        message: &Message,
        body: Value,
        headers: Option<Headers>,
        callback: Option<ReplyCallback>,
    ) -> Result<(), BridgeError> {
        let Some(reply_address) = message.reply_address.as_deref() else {
            return Err(BridgeError::Protocol(format!(
                "message on {} does not expect a reply",
                message.address
            )));
        };
        self.send(reply_address, body, headers, callback)
    }

    /// Send and await the reply.
    pub async fn request(
        &self,
        address: &str,
        body: Value,
        headers: Option<Headers>,
    ) -> Result<Message, BridgeError> {
        let (_, response_rx) = self.request_internal(address, body, headers)?;
        response_rx
            .await
            .unwrap_or(Err(BridgeError::ConnectionClosed))
    }

    /// Send and await the reply for at most `timeout`.
    ///
    /// On expiry the pending entry is forgotten; a reply arriving later is
    /// dropped without error.
    pub async fn request_with_timeout(
        &self,
        address: &str,
        body: Value,
        headers: Option<Headers>,
        timeout: Duration,
    ) -> Result<Message, BridgeError> {
        let (reply_address, response_rx) = self.request_internal(address, body, headers)?;

        match tokio::time::timeout(timeout, response_rx).await {
            Ok(result) => result.unwrap_or(Err(BridgeError::ConnectionClosed)),
            Err(_) => {
                // Bridge may already be closed; nothing left to forget then
                let _ = self.commands.send(BridgeCommand::Forget {
                    reply_address: reply_address.clone(),
                });
                tracing::debug!(
                    reply_address = %reply_address,
                    timeout_ms = %timeout.as_millis(),
                    "Request timed out - forgot pending reply"
                );
                Err(BridgeError::Timeout(
                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                ))
            }
        }
    }

    /// Close the connection.
    ///
    /// Takes effect immediately for this and every cloned handle; pending
    /// requests fail with `ConnectionClosed`. Calling it again is a no-op.
    pub fn close(&self) {
        if self.state.mark_closed() {
            tracing::info!("Bridge close requested");
            let _ = self.commands.send(BridgeCommand::Close);
        }
    }

    fn request_internal(
        &self,
        address: &str,
        body: Value,
        headers: Option<Headers>,
    ) -> Result<(String, oneshot::Receiver<Result<Message, BridgeError>>), BridgeError> {
        let (response_tx, response_rx) = oneshot::channel();
        let callback: ReplyCallback = Box::new(move |result| {
            let _ = response_tx.send(result);
        });

        let reply_address = self
            .send_internal(address, body, headers, Some(callback))?
            .ok_or_else(|| BridgeError::Protocol("no reply address generated".into()))?;
        Ok((reply_address, response_rx))
    }

    /// Returns the generated reply address when a callback was given.
    fn send_internal(
        &self,
        address: &str,
        body: Value,
        headers: Option<Headers>,
        callback: Option<ReplyCallback>,
    ) -> Result<Option<String>, BridgeError> {
        self.ensure_open()?;
        check_address(address)?;

        let reply_address = callback
            .as_ref()
            .map(|_| uuid::Uuid::new_v4().to_string());
        self.submit(BridgeCommand::Send {
            address: address.to_string(),
            body,
            headers: headers.unwrap_or_default(),
            reply_address: reply_address.clone(),
            callback,
        })?;
        Ok(reply_address)
    }

    fn ensure_open(&self) -> Result<(), BridgeError> {
        match self.state() {
            ConnectionState::Open => Ok(()),
            _ => Err(BridgeError::NotOpen),
        }
    }

    fn submit(&self, command: BridgeCommand) -> Result<(), BridgeError> {
        self.commands
            .send(command)
            .map_err(|_| BridgeError::NotOpen)
    }
}

fn check_address(address: &str) -> Result<(), BridgeError> {
    if address.is_empty() {
        return Err(BridgeError::Protocol("address must not be empty".into()));
    }
    Ok(())
}
