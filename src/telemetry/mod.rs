//! Telemetry snapshot model and the frame decoder that produces it.

pub mod decode;
pub mod model;

pub use decode::{DecodeError, decode_snapshot, decode_snapshot_bytes, normalize};
pub use model::{Alert, EquipmentCategory, EquipmentRecord, Severity, TelemetrySnapshot};
