//! Bridge task - the single serialization point of a client.
//!
//! Every mutation of the handler registry, the correlation table and the
//! connection state happens here, in one task fed by two queues:
//! - commands from `EventBusClient` handles (outbound calls, close)
//! - events from the transport (ready, frames, failures)
//!
//! Handler fan-out therefore never interleaves with a registry mutation, and
//! messages for one address are delivered in arrival order.

use std::sync::Arc;
use std::time::Duration;

use evbridge_protocol::{decode, encode, Envelope, EnvelopeType, Headers};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::infrastructure::messaging::{
    invoke_guarded, ConnectionMachine, HandlerCallback, HandlerId, HandlerRegistry, Message,
    PendingReplies, Removal, ReplyCallback,
};
use crate::ports::outbound::{TransportEvent, TransportPort};

/// Work submitted to the bridge task by client handles.
pub(crate) enum BridgeCommand {
    Register {
        address: String,
        headers: Headers,
        id: HandlerId,
        callback: HandlerCallback,
    },
    Unregister {
        address: String,
        headers: Headers,
        id: HandlerId,
    },
    Send {
        address: String,
        body: Value,
        headers: Headers,
        /// Present exactly when `callback` is
        reply_address: Option<String>,
        callback: Option<ReplyCallback>,
    },
    Publish {
        address: String,
        body: Value,
        headers: Headers,
    },
    /// Drop a pending reply without invoking it (caller-side timeout)
    Forget { reply_address: String },
    Close,
}

pub(crate) struct Bridge {
    transport: Arc<dyn TransportPort>,
    config: BridgeConfig,
    machine: ConnectionMachine,
    registry: HandlerRegistry,
    pending: PendingReplies,
    ping: Option<Interval>,
}

impl Bridge {
    pub(crate) fn new(
        transport: Arc<dyn TransportPort>,
        config: BridgeConfig,
        machine: ConnectionMachine,
    ) -> Self {
        Self {
            transport,
            config,
            machine,
            registry: HandlerRegistry::new(),
            pending: PendingReplies::default(),
            ping: None,
        }
    }

    /// Open the transport and process commands and events until every client
    /// handle is gone.
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<BridgeCommand>) {
        let (events_tx, mut events) = mpsc::unbounded_channel();

        tracing::info!(url = %self.config.url(), "Opening bridge transport");
        if let Err(e) = self.transport.open(self.config.url(), events_tx) {
            self.shutdown(Some(BridgeError::Transport(e.to_string())));
        }

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        tracing::debug!("All client handles dropped");
                        self.shutdown(None);
                        break;
                    }
                },

                event = events.recv(), if !self.machine.is_closed() => match event {
                    Some(event) => self.handle_event(event),
                    None => self.shutdown(Some(BridgeError::Transport(
                        "transport event stream ended".into(),
                    ))),
                },

                _ = next_ping(&mut self.ping), if self.machine.is_open() => {
                    if self.machine.close_requested() {
                        self.shutdown(None);
                    } else {
                        self.emit_or_fail(Envelope::ping());
                    }
                }
            }
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    fn handle_command(&mut self, command: BridgeCommand) {
        if matches!(command, BridgeCommand::Close) {
            self.shutdown(None);
            return;
        }
        if !self.machine.is_open() {
            self.reject(command);
            return;
        }

        match command {
            BridgeCommand::Register {
                address,
                headers,
                id,
                callback,
            } => {
                let first = self.registry.insert(&address, id, callback);
                tracing::debug!(address = %address, handler = %id, first, "Handler registered");
                if first {
                    let headers = self.with_defaults(headers);
                    self.emit_or_fail(Envelope::register(address, headers));
                }
            }

            BridgeCommand::Unregister {
                address,
                headers,
                id,
            } => match self.registry.remove(&address, id) {
                Removal::Removed { remaining } => {
                    tracing::debug!(address = %address, handler = %id, remaining, "Handler unregistered");
                    if remaining == 0 {
                        let headers = self.with_defaults(headers);
                        self.emit_or_fail(Envelope::unregister(address, headers));
                    }
                }
                Removal::NotFound => {
                    tracing::debug!(address = %address, handler = %id, "Unregister of unknown handler ignored");
                }
            },

            BridgeCommand::Send {
                address,
                body,
                headers,
                reply_address,
                callback,
            } => self.send(address, body, headers, reply_address, callback),

            BridgeCommand::Publish {
                address,
                body,
                headers,
            } => {
                let headers = self.with_defaults(headers);
                self.emit_or_fail(Envelope::publish(address, body, headers));
            }

            BridgeCommand::Forget { reply_address } => {
                if self.pending.remove(&reply_address) {
                    tracing::debug!(reply_address = %reply_address, "Pending reply forgotten");
                }
            }

            BridgeCommand::Close => {}
        }
    }

    fn send(
        &mut self,
        address: String,
        body: Value,
        headers: Headers,
        reply_address: Option<String>,
        callback: Option<ReplyCallback>,
    ) {
        let headers = self.with_defaults(headers);

        if let (Some(reply), Some(callback)) = (&reply_address, callback) {
            if let Err(callback) = self.pending.insert(reply.clone(), callback) {
                tracing::warn!(reply_address = %reply, "Reply address already pending");
                invoke_guarded("Reply callback", reply, || {
                    callback(Err(BridgeError::Protocol(format!(
                        "reply address {} already pending",
                        reply
                    ))))
                });
                return;
            }
            tracing::trace!(reply_address = %reply, pending = self.pending.len(), "Awaiting reply");
        }

        let envelope = Envelope::send(address, body, headers, reply_address.clone());
        match self.emit(envelope) {
            Ok(()) => {}
            Err(err @ BridgeError::Transport(_)) => self.shutdown(Some(err)),
            Err(err) => {
                tracing::error!(error = %err, "Failed to encode send");
                if let Some(reply) = reply_address {
                    self.pending.resolve(&reply, Err(err));
                }
            }
        }
    }

    /// Report a command that arrived after the connection left `Open`.
    fn reject(&mut self, command: BridgeCommand) {
        match command {
            BridgeCommand::Send {
                address,
                callback: Some(callback),
                ..
            } => {
                invoke_guarded("Reply callback", &address, || {
                    callback(Err(BridgeError::NotOpen))
                });
            }
            BridgeCommand::Register {
                address,
                mut callback,
                ..
            } => {
                invoke_guarded("Handler", &address, || callback(Err(BridgeError::NotOpen)));
            }
            _ => tracing::debug!("Dropping command issued while not open"),
        }
    }

    // =========================================================================
    // Transport events
    // =========================================================================

    fn handle_event(&mut self, event: TransportEvent) {
        // close() already returned to the caller; nothing may be dispatched
        if self.machine.close_requested() {
            tracing::debug!("Close requested; dropping transport event");
            self.shutdown(None);
            return;
        }

        match event {
            TransportEvent::Ready => {
                if self.machine.open() {
                    self.ping = self.config.ping_interval.map(ping_interval);
                }
            }
            TransportEvent::Frame(frame) => {
                if !self.machine.is_open() {
                    self.shutdown(Some(BridgeError::Protocol(
                        "frame received before the connection opened".into(),
                    )));
                    return;
                }
                match decode(&frame) {
                    Ok(envelope) => self.dispatch(envelope),
                    Err(e) => {
                        tracing::error!(error = %e, "Malformed frame; closing connection");
                        self.shutdown(Some(e.into()));
                    }
                }
            }
            TransportEvent::Error(reason) => self.shutdown(Some(BridgeError::Transport(reason))),
            TransportEvent::Closed => self.shutdown(Some(BridgeError::Transport(
                "connection closed by remote".into(),
            ))),
        }
    }

    /// Route one inbound envelope: correlation first, then handlers.
    fn dispatch(&mut self, envelope: Envelope) {
        match envelope.kind {
            EnvelopeType::Message => {
                let address = envelope.address.clone();
                if self.pending.contains(&address) {
                    self.pending.resolve(&address, Ok(Message::from(envelope)));
                } else if self.registry.count(&address) > 0 {
                    self.registry.dispatch(&address, &Ok(Message::from(envelope)));
                } else {
                    tracing::debug!(address = %address, "No handler for message; dropped");
                }
            }
            EnvelopeType::Err => {
                let address = envelope.address.clone();
                let error = BridgeError::Reply(envelope.failure());
                if self.pending.contains(&address) {
                    self.pending.resolve(&address, Err(error));
                } else if self.registry.count(&address) > 0 {
                    self.registry.dispatch(&address, &Err(error));
                } else {
                    self.machine.report_error(error);
                }
            }
            EnvelopeType::Pong => tracing::trace!("Pong received"),
            other => self.shutdown(Some(BridgeError::Protocol(format!(
                "unexpected inbound {} envelope",
                other
            )))),
        }
    }

    // =========================================================================
    // Output + teardown
    // =========================================================================

    fn with_defaults(&self, mut headers: Headers) -> Headers {
        headers.merge_defaults(&self.config.default_headers);
        headers
    }

    fn emit(&self, envelope: Envelope) -> Result<(), BridgeError> {
        let frame = encode(&envelope)?;
        self.transport
            .send_frame(frame)
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }

    /// Emit; a transport failure closes the connection.
    fn emit_or_fail(&mut self, envelope: Envelope) {
        let kind = envelope.kind;
        match self.emit(envelope) {
            Ok(()) => {}
            Err(err @ BridgeError::Transport(_)) => self.shutdown(Some(err)),
            Err(err) => tracing::error!(error = %err, kind = %kind, "Failed to encode envelope"),
        }
    }

    /// Enter `Closed`: close hook, fail pending replies, drop handlers.
    fn shutdown(&mut self, cause: Option<BridgeError>) {
        if self.machine.is_closed() {
            return;
        }
        self.transport.close();
        self.ping = None;

        let pending_error = cause.clone().unwrap_or(BridgeError::ConnectionClosed);
        self.machine.close(cause);
        let addresses = self.registry.address_count();
        let failed = self.pending.fail_all(&pending_error);
        let handlers = self.registry.clear();
        tracing::debug!(failed, addresses, handlers, "Bridge state cleared");
    }
}

fn ping_interval(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_ping(ping: &mut Option<Interval>) {
    match ping {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
