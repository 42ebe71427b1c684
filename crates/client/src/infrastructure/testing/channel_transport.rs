//! In-memory transport for tests.
//!
//! Records every frame the bridge writes and lets a test play the remote side
//! by pushing `TransportEvent`s.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{bail, Result};
use evbridge_protocol::{decode, encode, Envelope, EnvelopeType};

use crate::ports::outbound::{TransportEvent, TransportEvents, TransportPort};

#[derive(Default)]
struct Inner {
    url: Option<String>,
    events: Option<TransportEvents>,
    sent: Vec<Vec<u8>>,
    closed: bool,
    auto_ready: bool,
}

/// Transport double backed by channels.
#[derive(Clone)]
pub struct ChannelTransport {
    inner: Arc<Mutex<Inner>>,
}

impl ChannelTransport {
    /// A transport that reports `Ready` as soon as it is opened.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                auto_ready: true,
                ..Inner::default()
            })),
        }
    }

    /// A transport that stays connecting until [`ChannelTransport::ready`].
    pub fn manual() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push an event as if it came from the remote side.
    ///
    /// Returns false if the transport was never opened or the bridge is gone.
    pub fn push(&self, event: TransportEvent) -> bool {
        match &self.lock().events {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }

    pub fn ready(&self) -> bool {
        self.push(TransportEvent::Ready)
    }

    /// Deliver an envelope to the client.
    pub fn deliver(&self, envelope: &Envelope) -> bool {
        match encode(envelope) {
            Ok(frame) => self.push(TransportEvent::Frame(frame)),
            Err(_) => false,
        }
    }

    pub fn deliver_raw(&self, frame: impl Into<Vec<u8>>) -> bool {
        self.push(TransportEvent::Frame(frame.into()))
    }

    pub fn fail(&self, reason: &str) -> bool {
        self.push(TransportEvent::Error(reason.to_string()))
    }

    pub fn remote_close(&self) -> bool {
        self.push(TransportEvent::Closed)
    }

    pub fn url(&self) -> Option<String> {
        self.lock().url.clone()
    }

    pub fn is_open(&self) -> bool {
        let inner = self.lock();
        inner.events.is_some() && !inner.closed
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Every envelope the bridge has written so far.
    pub fn sent(&self) -> Vec<Envelope> {
        self.lock()
            .sent
            .iter()
            .filter_map(|frame| decode(frame).ok())
            .collect()
    }

    /// Written envelopes of one type.
    pub fn sent_of(&self, kind: EnvelopeType) -> Vec<Envelope> {
        self.sent()
            .into_iter()
            .filter(|envelope| envelope.kind == kind)
            .collect()
    }

    /// Wait (up to one second) until at least `count` frames were written.
    pub async fn wait_for_sent(&self, count: usize) -> Vec<Envelope> {
        for _ in 0..200 {
            if self.lock().sent.len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.sent()
    }

    /// Wait (up to one second) until the bridge has opened the transport.
    pub async fn wait_until_opened(&self) -> bool {
        for _ in 0..200 {
            if self.lock().events.is_some() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportPort for ChannelTransport {
    fn open(&self, url: &str, events: TransportEvents) -> Result<()> {
        let mut inner = self.lock();
        if inner.events.is_some() {
            bail!("transport already opened");
        }
        if inner.auto_ready {
            let _ = events.send(TransportEvent::Ready);
        }
        inner.url = Some(url.to_string());
        inner.events = Some(events);
        Ok(())
    }

    fn send_frame(&self, frame: Vec<u8>) -> Result<()> {
        let mut inner = self.lock();
        if inner.closed {
            bail!("transport closed");
        }
        inner.sent.push(frame);
        Ok(())
    }

    fn close(&self) {
        self.lock().closed = true;
    }
}
