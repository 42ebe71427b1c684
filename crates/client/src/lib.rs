//! evbridge Client - event-bus bridge client.
//!
//! Lets a process take part in a remote event bus over one duplex connection:
//! register handlers for addresses, send point-to-point messages (optionally
//! awaiting one reply), and publish broadcasts.
//!
//! Layout:
//! - `client`: the `EventBusClient` facade and its builder
//! - `infrastructure::bridge`: the task that owns all mutable state
//! - `infrastructure::messaging`: handler registry, correlation table, state machine
//! - `infrastructure::websocket`: tokio-tungstenite transport adapter
//! - `ports::outbound`: the `TransportPort` seam (mockable)

pub mod client;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod ports;

#[cfg(test)]
mod e2e_tests;

pub use client::{EventBusClient, EventBusClientBuilder};
pub use config::{BridgeConfig, ConfigError};
pub use error::BridgeError;
pub use infrastructure::messaging::ReplyCallback;
pub use infrastructure::{ConnectionState, ConnectionStateObserver, HandlerId, Message};
pub use infrastructure::WebSocketTransport;
pub use ports::outbound::{TransportEvent, TransportEvents, TransportPort};

// Wire types callers commonly need
pub use evbridge_protocol::{Envelope, EnvelopeType, Headers, ReplyFailure};
