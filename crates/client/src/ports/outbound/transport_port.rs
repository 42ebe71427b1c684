//! Transport Port - Outbound port for the raw duplex channel
//!
//! The bridge never touches sockets directly. A transport opens one duplex
//! channel, reports what happens on it as [`TransportEvent`]s, and accepts
//! encoded frames to write. Framing, handshake and TLS live behind this trait.

use tokio::sync::mpsc;

/// Everything a transport can report after `open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Channel established; frames may now be sent
    Ready,
    /// One inbound frame
    Frame(Vec<u8>),
    /// Channel failed; no further events follow
    Error(String),
    /// Remote closed the channel; no further events follow
    Closed,
}

/// Sink the transport reports events into
pub type TransportEvents = mpsc::UnboundedSender<TransportEvent>;

/// Port for the duplex channel underneath the bridge
///
/// Methods must not block: `open` starts connecting in the background and
/// reports `Ready` (or `Error`) through `events`, `send_frame` queues a frame.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait TransportPort: Send + Sync {
    /// Start opening the channel to `url`
    fn open(&self, url: &str, events: TransportEvents) -> anyhow::Result<()>;

    /// Queue one encoded frame for writing
    fn send_frame(&self, frame: Vec<u8>) -> anyhow::Result<()>;

    /// Shut the channel down; idempotent
    fn close(&self);
}
