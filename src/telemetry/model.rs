//! Normalized telemetry data model.
//!
//! Everything here is immutable once built by the decoder. Consumers receive snapshots behind
//! an `Arc` and never need to null-check the five top-level categories.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use sonic_rs::{JsonValueTrait, Value};

/// Equipment categories carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EquipmentCategory {
    Trucks,
    Crushers,
    Stockpiles,
}

impl EquipmentCategory {
    pub const ALL: [EquipmentCategory; 3] = [
        EquipmentCategory::Trucks,
        EquipmentCategory::Crushers,
        EquipmentCategory::Stockpiles,
    ];

    /// Wire key of the category in a frame.
    pub fn key(self) -> &'static str {
        match self {
            EquipmentCategory::Trucks => "trucks",
            EquipmentCategory::Crushers => "crushers",
            EquipmentCategory::Stockpiles => "stockpiles",
        }
    }
}

/// One piece of equipment as reported by the feed.
///
/// Only identity and status are interpreted; every other field is kept as sent.
#[derive(Debug, Clone, PartialEq)]
pub struct EquipmentRecord {
    pub id: String,
    pub status: Option<String>,
    pub fields: BTreeMap<String, Value>,
}

impl EquipmentRecord {
    /// Numeric telemetry field (`fuel_level`, `health_score`, `temperature`, ...).
    pub fn number(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(value_as_f64)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Alert severity. Unknown wire values are rejected by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Urgent,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "urgent" => Ok(Severity::Urgent),
            other => Err(format!("unknown severity `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub id: String,
    pub severity: Severity,
    pub equipment: String,
    pub message: String,
    pub timestamp: String,
    /// Wire `type`, e.g. `fuel_low` or `stockpile_full`.
    pub kind: Option<String>,
}

impl Alert {
    /// Identifier used when the feed does not send one: stable across frames for the same
    /// equipment/kind/message triple.
    pub fn fingerprint(equipment: &str, kind: Option<&str>, message: &str) -> String {
        let mut h = Fnv1a64::new();
        h.update(equipment.as_bytes());
        h.update(b"\0");
        h.update(kind.unwrap_or("").as_bytes());
        h.update(b"\0");
        h.update(message.as_bytes());
        format!("{:016x}", h.finish())
    }
}

/// A fully-defaulted view of one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetrySnapshot {
    pub trucks: BTreeMap<String, EquipmentRecord>,
    pub crushers: BTreeMap<String, EquipmentRecord>,
    pub stockpiles: BTreeMap<String, EquipmentRecord>,
    pub kpis: BTreeMap<String, f64>,
    pub alerts: Vec<Alert>,
    pub mine_id: Option<String>,
    pub timestamp: Option<String>,
}

impl TelemetrySnapshot {
    pub fn equipment(&self, category: EquipmentCategory) -> &BTreeMap<String, EquipmentRecord> {
        match category {
            EquipmentCategory::Trucks => &self.trucks,
            EquipmentCategory::Crushers => &self.crushers,
            EquipmentCategory::Stockpiles => &self.stockpiles,
        }
    }

    pub(crate) fn equipment_mut(
        &mut self,
        category: EquipmentCategory,
    ) -> &mut BTreeMap<String, EquipmentRecord> {
        match category {
            EquipmentCategory::Trucks => &mut self.trucks,
            EquipmentCategory::Crushers => &mut self.crushers,
            EquipmentCategory::Stockpiles => &mut self.stockpiles,
        }
    }

    pub fn kpi(&self, name: &str) -> Option<f64> {
        self.kpis.get(name).copied()
    }

    pub fn equipment_count(&self) -> usize {
        self.trucks.len() + self.crushers.len() + self.stockpiles.len()
    }

    pub fn alerts_with_severity(&self, severity: Severity) -> impl Iterator<Item = &Alert> {
        self.alerts.iter().filter(move |a| a.severity == severity)
    }
}

impl FromStr for TelemetrySnapshot {
    type Err = super::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        super::decode_snapshot(s)
    }
}

/// Read a JSON number as `f64`, whatever its integer/float representation.
pub(crate) fn value_as_f64(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_i64().map(|n| n as f64))
        .or_else(|| value.as_u64().map(|n| n as f64))
}

struct Fnv1a64 {
    hash: u64,
}

impl Fnv1a64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    fn new() -> Self {
        Self { hash: Self::OFFSET }
    }

    fn update(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.hash ^= b as u64;
            self.hash = self.hash.wrapping_mul(Self::PRIME);
        }
    }

    fn finish(&self) -> u64 {
        self.hash
    }
}
