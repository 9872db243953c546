use std::time::Duration;

use super::types::{TelemetryError, TelemetryResult, WebSocketBufferConfig};

/// Default feed endpoint exposed by the site simulator.
pub const DEFAULT_URL: &str = "ws://localhost:8765";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Client configuration. Immutable once the client is spawned.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub url: String,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub buffers: WebSocketBufferConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            buffers: WebSocketBufferConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_buffers(mut self, buffers: WebSocketBufferConfig) -> Self {
        self.buffers = buffers;
        self
    }

    pub fn validate(&self) -> TelemetryResult<()> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(TelemetryError::InvalidConfig("url is empty".to_string()));
        }
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(TelemetryError::InvalidConfig(format!(
                "url must use ws:// or wss://, got {url}"
            )));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(TelemetryError::InvalidConfig(
                "max_reconnect_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
