//! Kameo-backed telemetry feed client.

pub mod actor;
pub mod handle;

pub use actor::{
    Connect, Disconnect, GetConnectionState, GetConnectionStats, GetLatestSnapshot, SendText,
    Shutdown, Subscribe, TelemetryActor, TelemetryActorArgs, Unsubscribe,
};
pub use handle::TelemetryClient;
