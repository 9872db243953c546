//! Real-time mining telemetry feed client.
//!
//! One [`TelemetryClient`] owns one websocket feed: it connects, decodes every inbound JSON
//! frame into a normalized [`TelemetrySnapshot`], reconnects on a fixed-delay policy, and
//! fans events out to subscribed listeners.

pub mod core;
pub mod hub;
pub mod peer;
pub mod telemetry;
pub mod testing;
pub mod tls;
pub mod transport;
pub mod ws;

pub use crate::core::{
    ClientConfig, ConnectionState, DEFAULT_URL, DisconnectReason, ErrorKind,
    ExponentialBackoffReconnect, FixedDelayReconnect, ReconnectStrategy, TelemetryError,
    TelemetryResult, TelemetryStats, WebSocketBufferConfig,
};
pub use hub::{
    Channel, ListenerError, ListenerResult, Subscription, SubscriptionHub, TelemetryEvent,
};
pub use telemetry::{
    Alert, DecodeError, EquipmentCategory, EquipmentRecord, Severity, TelemetrySnapshot,
    decode_snapshot,
};
pub use transport::{TungsteniteTransport, WsTransport};
pub use ws::TelemetryClient;
