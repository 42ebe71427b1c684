//! Client + WebSocket transport against a local bridge server.

use std::sync::Arc;

use evbridge_protocol::{decode, encode, Envelope, EnvelopeType, Headers};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};

use super::{init_tracing, next, recording_handler, WAIT};
use crate::{BridgeConfig, BridgeError, EventBusClient, WebSocketTransport};

type ServerSocket = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    (listener, format!("ws://{}/eventbus/websocket", addr))
}

async fn accept(listener: &TcpListener) -> ServerSocket {
    let (stream, _) = listener.accept().await.expect("accept");
    accept_async(stream).await.expect("handshake")
}

/// Next envelope from the client, skipping keep-alives.
async fn read_envelope(socket: &mut ServerSocket) -> Envelope {
    loop {
        let message = tokio::time::timeout(WAIT, socket.next())
            .await
            .expect("timed out reading from client")
            .expect("client hung up")
            .expect("read error");
        if let WsMessage::Text(text) = message {
            let envelope = decode(text.as_bytes()).expect("client sent a valid envelope");
            if envelope.kind != EnvelopeType::Ping {
                return envelope;
            }
        }
    }
}

async fn write_envelope(socket: &mut ServerSocket, envelope: &Envelope) {
    let frame = encode(envelope).expect("encode");
    let text = String::from_utf8(frame).expect("utf-8 frame");
    socket.send(WsMessage::Text(text)).await.expect("write");
}

fn connect(url: &str) -> EventBusClient {
    init_tracing();
    let config = BridgeConfig::new(url).expect("config");
    EventBusClient::connect(config, Arc::new(WebSocketTransport::new()))
}

#[tokio::test]
async fn test_websocket_register_deliver_and_request() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let mut socket = accept(&listener).await;

        let register = read_envelope(&mut socket).await;
        assert_eq!(register.kind, EnvelopeType::Register);
        assert_eq!(register.address, "news");
        write_envelope(
            &mut socket,
            &Envelope::message("news", json!({"headline": "hi"}), Headers::new(), None),
        )
        .await;

        let request = read_envelope(&mut socket).await;
        assert_eq!(request.kind, EnvelopeType::Send);
        assert_eq!(request.address, "svc.add");
        let reply_address = request.reply_address.expect("reply address");
        write_envelope(
            &mut socket,
            &Envelope::message(reply_address, json!({"result": 3}), Headers::new(), None),
        )
        .await;

        // Wait for the client to go away
        while let Some(Ok(message)) = socket.next().await {
            if message.is_close() {
                break;
            }
        }
    });

    let client = connect(&url);
    tokio::time::timeout(WAIT, client.opened())
        .await
        .expect("timed out connecting")
        .expect("open");

    let (handler, mut deliveries) = recording_handler();
    client
        .register_handler("news", None, handler)
        .expect("register");
    let delivered = next(&mut deliveries).await.expect("delivery");
    assert_eq!(delivered.body, json!({"headline": "hi"}));

    let reply = tokio::time::timeout(
        WAIT,
        client.request("svc.add", json!({"a": 1, "b": 2}), None),
    )
    .await
    .expect("timed out waiting for reply")
    .expect("reply");
    assert_eq!(reply.body, json!({"result": 3}));

    client.close();
    tokio::time::timeout(WAIT, server)
        .await
        .expect("server finished")
        .expect("server assertions");
}

#[tokio::test]
async fn test_websocket_server_hangup_fails_pending_request() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let mut socket = accept(&listener).await;
        let request = read_envelope(&mut socket).await;
        assert_eq!(request.kind, EnvelopeType::Send);
        socket.close(None).await.expect("close");
    });

    let client = connect(&url);
    client.opened().await.expect("open");

    let result = tokio::time::timeout(WAIT, client.request("svc.never", json!(null), None))
        .await
        .expect("request settled");
    assert!(matches!(result, Err(BridgeError::Transport(_))));
    assert!(!client.is_open());

    server.await.expect("server assertions");
}

#[tokio::test]
async fn test_websocket_connect_refused_closes_with_transport_error() {
    // Bind then drop so nothing is listening on the port
    let (listener, url) = bind().await;
    drop(listener);

    let (close_tx, mut closes) = tokio::sync::mpsc::unbounded_channel();
    init_tracing();
    let client = EventBusClient::builder(BridgeConfig::new(url).expect("config"))
        .on_close(move |cause| {
            let _ = close_tx.send(cause);
        })
        .connect(Arc::new(WebSocketTransport::new()));

    assert!(matches!(next(&mut closes).await, Some(BridgeError::Transport(_))));
    assert_eq!(client.opened().await, Err(BridgeError::NotOpen));
}
