//! End-to-end client tests.
//!
//! Each test drives a real `EventBusClient` (bridge task included) and plays
//! the remote bridge server:
//! - `ChannelTransport` for scripted frame-level scenarios
//! - a local tokio-tungstenite server for the WebSocket adapter
//!
//! # Running
//!
//! ```bash
//! cargo test -p evbridge-client --lib e2e_tests
//!
//! # With bridge logs
//! RUST_LOG=evbridge_client=debug cargo test -p evbridge-client --lib e2e_tests -- --nocapture
//! ```

mod e2e_helpers;
mod websocket_tests;

pub use e2e_helpers::*;
