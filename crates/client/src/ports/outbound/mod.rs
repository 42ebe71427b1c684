//! Outbound ports - what the bridge needs from the outside world

pub mod transport_port;

pub use transport_port::{TransportEvent, TransportEvents, TransportPort};

#[cfg(any(test, feature = "testing"))]
pub use transport_port::MockTransportPort;
