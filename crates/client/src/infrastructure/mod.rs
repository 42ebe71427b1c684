pub(crate) mod bridge;
pub mod messaging;
pub mod websocket;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use messaging::{ConnectionState, ConnectionStateObserver, HandlerId, Message};
pub use websocket::WebSocketTransport;
