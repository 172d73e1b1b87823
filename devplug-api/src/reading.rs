use crate::device::{Id, Value};
use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single value produced by a device at a specific moment.
///
/// When a client subscribes to `ReadStream`, it receives a stream of
/// these as devices are polled or push updates through `Listen`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub device_id: Id,
    pub ts: DateTime<Utc>,
    pub r#type: String,
    pub value: Value,
    pub unit: Option<String>,
    pub context: HashMap<String, String>,
}

/// The result of a `BulkRead` call: one reading per device that
/// produced a value this tick. Devices that didn't produce a value
/// (e.g. a sensor that dropped out) simply have no entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadContext {
    pub device_id: Id,
    pub r#type: String,
    pub value: Value,
    pub unit: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_roundtrip() {
        let reading = Reading {
            device_id: "sensor-1".to_string(),
            ts: Utc::now(),
            r#type: "temperature".into(),
            value: Value::Flt(21.5),
            unit: Some("C".into()),
            context: HashMap::from([("room".to_string(), "kitchen".to_string())]),
        };

        let encoded = serde_json::to_string(&reading).unwrap();
        let decoded: Reading = serde_json::from_str(&encoded).unwrap();
        let reencoded = serde_json::to_string(&decoded).unwrap();

        assert_eq!(reading, decoded);
        assert_eq!(encoded, reencoded);
    }
}
