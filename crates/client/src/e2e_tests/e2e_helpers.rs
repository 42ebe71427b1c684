//! Harness for end-to-end client tests.

use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use evbridge_protocol::{Envelope, EnvelopeType};
use serde_json::json;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::infrastructure::messaging::ReplyCallback;
use crate::infrastructure::testing::ChannelTransport;
use crate::{BridgeConfig, BridgeError, EventBusClient, Message};

/// Upper bound for anything the bridge task is expected to do.
pub const WAIT: Duration = Duration::from_secs(2);

/// How long "nothing happens" is observed for.
pub const QUIET: Duration = Duration::from_millis(50);

/// Install a test-writer subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Config for scripted tests: pings off so frame counts stay deterministic.
pub fn quiet_config() -> BridgeConfig {
    BridgeConfig::new("ws://bridge.test/eventbus")
        .expect("valid test url")
        .with_ping_interval(None)
}

// =============================================================================
// Callback recorders
// =============================================================================

pub type Results = mpsc::UnboundedReceiver<Result<Message, BridgeError>>;

/// A handler callback that forwards every delivery into a channel.
pub fn recording_handler() -> (
    impl FnMut(Result<Message, BridgeError>) + Send + 'static,
    Results,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback = move |result: Result<Message, BridgeError>| {
        let _ = tx.send(result);
    };
    (callback, rx)
}

/// A reply callback that forwards its single result into a channel.
pub fn recording_reply() -> (ReplyCallback, Results) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: ReplyCallback = Box::new(move |result| {
        let _ = tx.send(result);
    });
    (callback, rx)
}

/// Next value from `rx`, failing the test after [`WAIT`].
pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for callback")
        .expect("callback channel closed")
}

/// Assert nothing arrives on `rx` for [`QUIET`].
pub async fn assert_silent<T: Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    if let Ok(Some(value)) = tokio::time::timeout(QUIET, rx.recv()).await {
        panic!("unexpected callback invocation: {:?}", value);
    }
}

// =============================================================================
// Test bridge
// =============================================================================

/// A connected client plus the scripted remote side and recorded hooks.
pub struct TestBridge {
    pub client: EventBusClient,
    pub transport: ChannelTransport,
    pub opens: Arc<AtomicUsize>,
    pub closes: mpsc::UnboundedReceiver<Option<BridgeError>>,
    pub errors: mpsc::UnboundedReceiver<BridgeError>,
}

impl TestBridge {
    /// Connect with [`quiet_config`] and wait until open.
    pub async fn open() -> Self {
        Self::open_with(quiet_config()).await
    }

    pub async fn open_with(config: BridgeConfig) -> Self {
        let bridge = Self::start(config, ChannelTransport::new());
        tokio::time::timeout(WAIT, bridge.client.opened())
            .await
            .expect("timed out opening bridge")
            .expect("bridge failed to open");
        bridge
    }

    /// Connect without waiting; `transport` decides when it becomes ready.
    pub fn start(config: BridgeConfig, transport: ChannelTransport) -> Self {
        init_tracing();

        let opens = Arc::new(AtomicUsize::new(0));
        let (close_tx, closes) = mpsc::unbounded_channel();
        let (error_tx, errors) = mpsc::unbounded_channel();

        let client = EventBusClient::builder(config)
            .on_open({
                let opens = Arc::clone(&opens);
                move || {
                    opens.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_close(move |cause| {
                let _ = close_tx.send(cause);
            })
            .on_error(move |error| {
                let _ = error_tx.send(error);
            })
            .connect(Arc::new(transport.clone()));

        Self {
            client,
            transport,
            opens,
            closes,
            errors,
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Wait for the close hook and return its cause.
    pub async fn closed(&mut self) -> Option<BridgeError> {
        next(&mut self.closes).await
    }

    /// Wait until every command issued so far has been processed.
    ///
    /// Commands and transport events travel on separate queues; tests that
    /// deliver frames right after registering use this to order the two.
    /// Writes one extra `publish` on the `flush` address.
    pub async fn flush(&self) {
        let marker = json!(uuid::Uuid::new_v4().to_string());
        self.client
            .publish("flush", marker.clone(), None)
            .expect("flush publish");

        for _ in 0..200 {
            if self
                .transport
                .sent_of(EnvelopeType::Publish)
                .iter()
                .any(|envelope| envelope.body == marker)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("bridge did not process flush marker");
    }

    /// Wait until `count` frames were written and return them.
    pub async fn sent(&self, count: usize) -> Vec<Envelope> {
        let sent = self.transport.wait_for_sent(count).await;
        assert!(
            sent.len() >= count,
            "expected at least {} frames, bridge wrote {:?}",
            count,
            sent
        );
        sent
    }
}
