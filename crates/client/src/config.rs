//! Client configuration.

use std::time::Duration;

use evbridge_protocol::Headers;
use thiserror::Error;
use url::Url;

/// Default bridge endpoint used by [`BridgeConfig::from_env`]
pub const DEFAULT_URL: &str = "ws://localhost:8080/eventbus/websocket";

/// Default keep-alive period, matching the bridge server's expectations
pub const DEFAULT_PING_INTERVAL_MS: u64 = 5_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid bridge URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Connection settings for one bridge client.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    url: String,
    /// Keep-alive period while open; `None` disables pings
    pub ping_interval: Option<Duration>,
    /// Merged under the headers of every outbound envelope
    pub default_headers: Headers,
}

impl BridgeConfig {
    /// Create a config for a `ws://` or `wss://` endpoint.
    pub fn new(url: impl Into<String>) -> Result<Self, ConfigError> {
        let url = url.into();
        let parsed = Url::parse(&url).map_err(|e| ConfigError::InvalidUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidUrl {
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
                url,
            });
        }

        Ok(Self {
            url,
            ping_interval: Some(Duration::from_millis(DEFAULT_PING_INTERVAL_MS)),
            default_headers: Headers::default(),
        })
    }

    /// Load configuration from the environment.
    ///
    /// - `EVBRIDGE_URL` (default [`DEFAULT_URL`])
    /// - `EVBRIDGE_PING_INTERVAL_MS` (default 5000, `0` disables pings)
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var("EVBRIDGE_URL").unwrap_or_else(|_| DEFAULT_URL.into());
        let mut config = Self::new(url)?;

        if let Ok(raw) = std::env::var("EVBRIDGE_PING_INTERVAL_MS") {
            config.ping_interval = parse_ping_interval(&raw)?;
        }

        Ok(config)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn with_ping_interval(mut self, interval: Option<Duration>) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_default_headers(mut self, headers: Headers) -> Self {
        self.default_headers = headers;
        self
    }
}

fn parse_ping_interval(raw: &str) -> Result<Option<Duration>, ConfigError> {
    let ms: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name: "EVBRIDGE_PING_INTERVAL_MS",
        value: raw.to_string(),
    })?;
    Ok((ms > 0).then(|| Duration::from_millis(ms)))
}
