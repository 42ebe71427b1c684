//! Desktop WebSocket transport using tokio-tungstenite

use std::sync::{Mutex, PoisonError};

use anyhow::{anyhow, bail, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::ports::outbound::{TransportEvent, TransportEvents, TransportPort};

/// WebSocket transport for talking to a bridge server.
///
/// One instance drives one connection. `open` spawns a task that owns the
/// socket; `send_frame` hands frames to that task through a channel.
#[derive(Default)]
pub struct WebSocketTransport {
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    opened: Mutex<bool>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransportPort for WebSocketTransport {
    fn open(&self, url: &str, events: TransportEvents) -> Result<()> {
        {
            let mut opened = self.opened.lock().unwrap_or_else(PoisonError::into_inner);
            if *opened {
                bail!("WebSocket transport already opened");
            }
            *opened = true;
        }

        let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);

        let url = url.to_string();
        tokio::spawn(async move {
            run_socket(url, rx, events).await;
        });
        Ok(())
    }

    fn send_frame(&self, frame: Vec<u8>) -> Result<()> {
        // Clone the sender so the lock is not held while sending
        let tx = self
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match tx {
            Some(tx) => tx
                .send(frame)
                .map_err(|_| anyhow!("WebSocket writer has stopped")),
            None => bail!("WebSocket transport is not open"),
        }
    }

    fn close(&self) {
        // Dropping the sender makes the socket task send a close frame and exit
        let previous = self
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            tracing::debug!("WebSocket transport close requested");
        }
    }
}

async fn run_socket(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    events: TransportEvents,
) {
    let ws_stream = match connect_async(url.as_str()).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            tracing::error!("Failed to connect to bridge at {}: {}", url, e);
            let _ = events.send(TransportEvent::Error(e.to_string()));
            return;
        }
    };

    tracing::info!("Connected to bridge at {}", url);
    if events.send(TransportEvent::Ready).is_err() {
        return;
    }

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    let text = match String::from_utf8(frame) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!("Dropping non UTF-8 frame: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = write.send(WsMessage::Text(text)).await {
                        tracing::error!("Failed to send frame: {}", e);
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
                None => {
                    tracing::debug!("Closing WebSocket");
                    let _ = write.send(WsMessage::Close(None)).await;
                    break;
                }
            },

            message = read.next() => match message {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = events.send(TransportEvent::Frame(text.into_bytes()));
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    let _ = events.send(TransportEvent::Frame(data));
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    tracing::info!("Bridge server closed connection");
                    let _ = events.send(TransportEvent::Closed);
                    break;
                }
                // Ping/pong frames are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!("WebSocket error: {}", e);
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    break;
                }
            },
        }
    }
}
