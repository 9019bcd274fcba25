//! JSON wire codec for the data and control topics.
//!
//! Data topics carry
//! `{"sensorId", "sensorType", "value", "timestamp", "unit"}` objects with a
//! `Z`-suffixed ISO-8601 timestamp.  The control topic carries
//! `{"command", "sensorId", "value"}` objects where every field is optional.

use chrono::{DateTime, SecondsFormat, Utc};
use envsim_types::{Command, ControlMessage, DataMessage, SensorIdentity, SimError};
use serde::Deserialize;
use serde_json::{Map, Value, json};

/// Encode one reading for publication on the sensor's data topic.
///
/// Total over its inputs: building a `serde_json::Value` and rendering it
/// cannot fail.
pub fn encode_data(identity: &SensorIdentity, value: f64, timestamp: DateTime<Utc>) -> Vec<u8> {
    json!({
        "sensorId": identity.id,
        "sensorType": identity.kind.as_str(),
        "value": value,
        "timestamp": timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        "unit": identity.unit(),
    })
    .to_string()
    .into_bytes()
}

/// Decode a data-topic payload.  Used by consumers and by the tests.
pub fn decode_data(payload: &[u8]) -> Result<DataMessage, SimError> {
    serde_json::from_slice(payload).map_err(|e| SimError::Decode(e.to_string()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireControl {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    sensor_id: Option<u64>,
    #[serde(default)]
    value: Option<f64>,
}

/// Decode a control-topic payload.
///
/// Anything that is not a JSON object, or whose fields have the wrong
/// types, yields [`SimError::Decode`].
pub fn decode_control(payload: &[u8]) -> Result<ControlMessage, SimError> {
    let raw: Value = serde_json::from_slice(payload).map_err(|e| SimError::Decode(e.to_string()))?;
    if !raw.is_object() {
        return Err(SimError::Decode(format!(
            "expected a JSON object, got {}",
            json_type_name(&raw)
        )));
    }
    let wire: WireControl =
        serde_json::from_value(raw).map_err(|e| SimError::Decode(e.to_string()))?;
    Ok(ControlMessage {
        command: wire.command.as_deref().map(Command::parse),
        sensor_id: wire.sensor_id,
        value: wire.value,
    })
}

/// Encode a control message.  Absent fields are omitted from the object.
pub fn encode_control(msg: &ControlMessage) -> Vec<u8> {
    let mut obj = Map::new();
    if let Some(command) = &msg.command {
        obj.insert("command".to_string(), json!(command.as_str()));
    }
    if let Some(id) = msg.sensor_id {
        obj.insert("sensorId".to_string(), json!(id));
    }
    if let Some(value) = msg.value {
        obj.insert("value".to_string(), json!(value));
    }
    Value::Object(obj).to_string().into_bytes()
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
