//! `envsim-ctl` – publish one control command and exit.
//!
//! ```text
//! envsim-ctl start_all
//! envsim-ctl stop_all
//! envsim-ctl start <sensor_id>
//! envsim-ctl stop <sensor_id>
//! envsim-ctl set <sensor_id> <value>
//! envsim-ctl <sensor_id> <value>        # same as `set`
//! ```

use envsim_middleware::{BrokerTransport, MqttTransport, encode_control};
use envsim_types::{CONTROL_TOPIC, Command, ControlMessage, SimError};

pub const USAGE: &str = "\
Usage:
  Start all:   envsim-ctl start_all
  Stop all:    envsim-ctl stop_all
  Start one:   envsim-ctl start <sensor_id>
  Stop one:    envsim-ctl stop <sensor_id>
  Set value:   envsim-ctl set <sensor_id> <value>";

/// Turn command-line arguments (without the program name) into the message
/// to publish.  `Err` carries the text to print before exiting with status 1.
pub fn parse_args<S: AsRef<str>>(args: &[S]) -> Result<ControlMessage, String> {
    let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
    let Some(&cmd) = args.first() else {
        return Err(USAGE.to_string());
    };

    match cmd {
        "start_all" => Ok(ControlMessage::broadcast(Command::StartAll)),
        "stop_all" => Ok(ControlMessage::broadcast(Command::StopAll)),
        "start" | "stop" => {
            let id = args
                .get(1)
                .ok_or_else(|| format!("Error: {cmd} requires a sensor ID"))
                .and_then(|raw| parse_id(raw))?;
            Ok(ControlMessage::targeted(Command::parse(cmd), id))
        }
        "set" => match (args.get(1), args.get(2)) {
            (Some(id), Some(value)) => Ok(ControlMessage::set_value(parse_id(id)?, parse_value(value)?)),
            _ => Err("Error: set requires sensor ID and value".to_string()),
        },
        legacy if !legacy.is_empty() && legacy.bytes().all(|b| b.is_ascii_digit()) => {
            let value = args.get(1).ok_or_else(|| USAGE.to_string())?;
            Ok(ControlMessage::set_value(parse_id(legacy)?, parse_value(value)?))
        }
        _ => Err(USAGE.to_string()),
    }
}

fn parse_id(raw: &str) -> Result<u64, String> {
    raw.parse()
        .map_err(|_| format!("Error: sensor ID must be a non-negative integer, got '{raw}'"))
}

fn parse_value(raw: &str) -> Result<f64, String> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(format!("Error: value must be a finite number, got '{raw}'")),
    }
}

/// Connect, publish `msg` on the control topic, disconnect.
///
/// Returns the JSON text that was sent.
pub async fn send(transport: &MqttTransport, msg: &ControlMessage) -> Result<String, SimError> {
    transport.connect().await?;
    let payload = encode_control(msg);
    let text = String::from_utf8_lossy(&payload).into_owned();
    let sent = transport.publish(CONTROL_TOPIC, payload).await;
    transport.disconnect().await;
    sent.map(|()| text)
}
