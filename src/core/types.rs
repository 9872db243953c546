use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::config::ClientConfig;
use crate::telemetry::DecodeError;

/// Convenience result alias for telemetry client operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Coarse classification of failures, as seen by `error` channel listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The transport failed to open, failed mid-stream, or could not be written.
    Transport,
    /// An inbound frame could not be decoded; the connection is unaffected.
    Decode,
    /// The reconnect budget ran out and the client moved to `Failed`.
    Exhausted,
    /// A subscribed listener returned an error or panicked.
    Listener,
    /// Caller misuse: bad configuration, sending while offline, stopped client.
    Usage,
}

/// Canonical error surface shared across the client.
#[derive(Debug, Clone, Error)]
pub enum TelemetryError {
    #[error("Connection failed (attempt {attempt}): {error}")]
    ConnectionFailed { attempt: u32, error: String },

    #[error("Transport error ({context}): {error}")]
    TransportError {
        context: &'static str,
        error: String,
    },

    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// `attempts` counts attempts since the last open; `budget` is the limit that stopped them.
    #[error("Reconnect budget of {budget} attempts exhausted ({attempts} since the last open)")]
    ReconnectExhausted { attempts: u32, budget: u32 },

    #[error("Listener on {channel} channel failed: {message}")]
    ListenerFailed { channel: &'static str, message: String },

    #[error("Not connected")]
    NotConnected,

    #[error("Serialize failed: {0}")]
    Serialize(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Telemetry client is stopped")]
    ClientStopped,
}

impl TelemetryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TelemetryError::ConnectionFailed { .. } | TelemetryError::TransportError { .. } => {
                ErrorKind::Transport
            }
            TelemetryError::Decode(_) => ErrorKind::Decode,
            TelemetryError::ReconnectExhausted { .. } => ErrorKind::Exhausted,
            TelemetryError::ListenerFailed { .. } => ErrorKind::Listener,
            TelemetryError::NotConnected
            | TelemetryError::Serialize(_)
            | TelemetryError::InvalidConfig(_)
            | TelemetryError::ClientStopped => ErrorKind::Usage,
        }
    }
}

/// Connection lifecycle of a single client instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }

    /// True while a transport is open or being opened.
    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a live connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The caller asked for it via `disconnect()` or teardown.
    Requested,
    /// The server sent a close frame or the stream ended.
    RemoteClosed { detail: String },
    /// Reading from or writing to the transport failed.
    TransportFailure { error: String },
}

impl DisconnectReason {
    pub fn is_requested(&self) -> bool {
        matches!(self, DisconnectReason::Requested)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Requested => f.write_str("requested"),
            DisconnectReason::RemoteClosed { detail } => write!(f, "remote closed: {detail}"),
            DisconnectReason::TransportFailure { error } => write!(f, "transport failure: {error}"),
        }
    }
}

/// Transport-independent buffer sizing parameters used for websocket configuration.
#[derive(Clone, Copy, Debug)]
pub struct WebSocketBufferConfig {
    pub write_buffer_bytes: usize,
    pub max_write_buffer_bytes: usize,
    pub max_message_bytes: usize,
    pub max_frame_bytes: usize,
}

impl Default for WebSocketBufferConfig {
    fn default() -> Self {
        Self {
            // Full-site frames from the simulator stay well under 1 MiB; leave headroom.
            write_buffer_bytes: 128 << 10,
            max_write_buffer_bytes: 256 << 10,
            max_message_bytes: 16 * 1024 * 1024,
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Abstract reconnect strategy trait.
///
/// `failed_attempts` counts connection attempts made since the last successful open (or the
/// last explicit `connect()`); the strategy decides whether one more is allowed. The client's
/// `max_reconnect_attempts` caps retries regardless of what the strategy answers.
pub trait ReconnectStrategy: Send + Sync + 'static {
    /// Adopt the client's configured delay and attempt limit. Called once when the client starts.
    fn configure(&mut self, _config: &ClientConfig) {}
    fn next_delay(&mut self) -> Duration;
    fn reset(&mut self);
    fn should_retry(&self, failed_attempts: u32) -> bool;
}

/// Point-in-time view of client health.
#[derive(Clone, Debug)]
pub struct TelemetryStats {
    pub state: ConnectionState,
    pub uptime: Duration,
    pub connects: u64,
    pub connect_failures: u64,
    pub reconnects: u64,
    pub frames: u64,
    pub snapshots: u64,
    pub decode_errors: u64,
    pub listener_failures: u64,
    pub last_frame_age: Option<Duration>,
    pub recent_errors: Vec<String>,
}
