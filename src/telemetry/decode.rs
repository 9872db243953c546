//! Frame decoder / normalizer.
//!
//! One inbound payload in, one fully-defaulted [`TelemetrySnapshot`] (or a [`DecodeError`])
//! out. Absent categories become empty; unrecognized keys are ignored; present-but-misshapen
//! categories are rejected rather than silently dropped.

use std::collections::BTreeMap;

use sonic_rs::{JsonContainerTrait, JsonValueTrait, Value};
use thiserror::Error;
use tracing::trace;

use super::model::{
    Alert, EquipmentCategory, EquipmentRecord, Severity, TelemetrySnapshot, value_as_f64,
};

const KPI_PATH_SEPARATOR: char = '.';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Syntax(String),

    #[error("frame root must be a JSON object")]
    NotAnObject,

    #[error("`{category}` must be an object")]
    CategoryNotObject { category: &'static str },

    #[error("`{category}.{id}` must be an object")]
    RecordNotObject { category: &'static str, id: String },

    #[error("`alerts` must be an array")]
    AlertsNotArray,

    #[error("alerts[{index}]: {reason}")]
    InvalidAlert { index: usize, reason: String },
}

/// Decode a text frame.
pub fn decode_snapshot(text: &str) -> Result<TelemetrySnapshot, DecodeError> {
    decode_snapshot_bytes(text.as_bytes())
}

/// Decode a raw frame payload. Non-UTF-8 input is a syntax error.
pub fn decode_snapshot_bytes(payload: &[u8]) -> Result<TelemetrySnapshot, DecodeError> {
    let root: Value =
        sonic_rs::from_slice(payload).map_err(|err| DecodeError::Syntax(err.to_string()))?;
    normalize(&root)
}

/// Normalize an already-parsed frame.
pub fn normalize(root: &Value) -> Result<TelemetrySnapshot, DecodeError> {
    if !root.is_object() {
        return Err(DecodeError::NotAnObject);
    }

    let mut snapshot = TelemetrySnapshot::default();

    for category in EquipmentCategory::ALL {
        if let Some(section) = present(root, category.key()) {
            *snapshot.equipment_mut(category) = decode_equipment(category, section)?;
        }
    }

    if let Some(section) = present(root, "kpis") {
        let kpis = section
            .as_object()
            .ok_or(DecodeError::CategoryNotObject { category: "kpis" })?;
        for (name, value) in kpis.iter() {
            flatten_kpi(name, value, &mut snapshot.kpis);
        }
    }

    if let Some(section) = present(root, "alerts") {
        let alerts = section.as_array().ok_or(DecodeError::AlertsNotArray)?;
        snapshot.alerts.reserve(alerts.len());
        for (index, raw) in alerts.iter().enumerate() {
            snapshot.alerts.push(decode_alert(index, raw)?);
        }
    }

    snapshot.mine_id = present(root, "mine_id")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    snapshot.timestamp = present(root, "timestamp")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    Ok(snapshot)
}

/// A key that is missing or explicitly `null` is treated as absent.
fn present<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    root.get(key).filter(|v| !v.is_null())
}

fn decode_equipment(
    category: EquipmentCategory,
    section: &Value,
) -> Result<BTreeMap<String, EquipmentRecord>, DecodeError> {
    let entries = section.as_object().ok_or(DecodeError::CategoryNotObject {
        category: category.key(),
    })?;

    let mut out = BTreeMap::new();
    for (key, raw) in entries.iter() {
        let fields = raw.as_object().ok_or_else(|| DecodeError::RecordNotObject {
            category: category.key(),
            id: key.to_string(),
        })?;

        let mut record = EquipmentRecord {
            id: key.to_string(),
            status: None,
            fields: BTreeMap::new(),
        };
        for (name, value) in fields.iter() {
            match name {
                "id" => {
                    if let Some(id) = value.as_str() {
                        record.id = id.to_string();
                    }
                }
                "status" => record.status = value.as_str().map(str::to_string),
                _ => {
                    record.fields.insert(name.to_string(), value.clone());
                }
            }
        }
        out.insert(key.to_string(), record);
    }
    Ok(out)
}

fn flatten_kpi(path: &str, value: &Value, out: &mut BTreeMap<String, f64>) {
    if let Some(number) = value_as_f64(value) {
        out.insert(path.to_string(), number);
        return;
    }

    if let Some(group) = value.as_object() {
        for (name, nested) in group.iter() {
            let mut nested_path = String::with_capacity(path.len() + 1 + name.len());
            nested_path.push_str(path);
            nested_path.push(KPI_PATH_SEPARATOR);
            nested_path.push_str(name);
            flatten_kpi(&nested_path, nested, out);
        }
        return;
    }

    trace!(kpi = %path, "dropping non-numeric kpi");
}

fn decode_alert(index: usize, raw: &Value) -> Result<Alert, DecodeError> {
    let invalid = |reason: String| DecodeError::InvalidAlert { index, reason };

    if !raw.is_object() {
        return Err(invalid("alert must be an object".to_string()));
    }

    let required = |key: &str| -> Result<String, DecodeError> {
        raw.get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| invalid(format!("`{key}` must be a string")))
    };

    let severity = required("severity")?
        .parse::<Severity>()
        .map_err(invalid)?;
    let equipment = required("equipment")?;
    let message = required("message")?;
    let timestamp = required("timestamp")?;
    let kind = raw
        .get("type")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let id = match raw.get("id").and_then(|v| v.as_str()) {
        Some(id) => id.to_string(),
        None => Alert::fingerprint(&equipment, kind.as_deref(), &message),
    };

    Ok(Alert {
        id,
        severity,
        equipment,
        message,
        timestamp,
        kind,
    })
}
