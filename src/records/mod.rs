//! Manufacturing telemetry records.
//!
//! Devices under provisioning echo one JSON object per record over the
//! serial link, tagged `"type":"mfg"` and embedded in arbitrary log noise.
//! Records are schema-free: an ordered field-name to scalar mapping whose
//! natural key is the `hw_id` field.

pub mod store;

pub use store::RecordStore;

use serde_json::{Map, Value};

/// Field naming the device identifier; the record's natural key.
pub const KEY_FIELD: &str = "hw_id";

/// Value of the `type` field that marks a manufacturing record.
pub const RECORD_TYPE: &str = "mfg";

/// One decoded telemetry record. Field order is preserved as received.
#[derive(Debug, Clone, PartialEq)]
pub struct ManufacturingRecord {
    fields: Map<String, Value>,
}

impl ManufacturingRecord {
    pub fn from_object(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// The device identifier, rendered as a table cell.
    pub fn hw_id(&self) -> Option<String> {
        self.get(KEY_FIELD).filter(|v| !v.is_empty())
    }

    /// A field value rendered as a table cell: strings verbatim, null empty,
    /// everything else in JSON notation.
    pub fn get(&self, name: &str) -> Option<String> {
        self.fields.get(name).map(cell_value)
    }

    /// Field names in received order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

fn cell_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Scan a monitor line for an embedded manufacturing record.
///
/// The line may carry arbitrary noise around the object. Each `{` position
/// is tried as the start of a JSON value; the first object whose `type`
/// field equals `mfg` wins. Anything else yields `None`.
pub fn extract_record(line: &str) -> Option<ManufacturingRecord> {
    for (idx, _) in line.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&line[idx..]).into_iter::<Value>();
        let Some(Ok(Value::Object(object))) = stream.next() else {
            continue;
        };
        if object.get("type").and_then(Value::as_str) == Some(RECORD_TYPE) {
            return Some(ManufacturingRecord::from_object(object));
        }
    }
    None
}
