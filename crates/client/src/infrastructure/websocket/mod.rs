//! WebSocket transport for bridge servers
//!
//! Bridge servers speak one JSON envelope per text frame over a WebSocket.

mod transport;

pub use transport::WebSocketTransport;
