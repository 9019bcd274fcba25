//! Configuration – reads `~/.envsim/config.toml` (or `$ENVSIM_CONFIG`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use envsim_middleware::{DeliveryQos, MqttSettings};
use envsim_runtime::FleetConfig;
use envsim_types::SleepBounds;
use serde::{Deserialize, Serialize};

/// Settings shared by the `envsim` and `envsim-ctl` binaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_broker_host")]
    pub broker_host: String,

    #[serde(default = "default_broker_port")]
    pub broker_port: u16,

    /// Sensors built for each of the four kinds.
    #[serde(default = "default_sensors_per_kind")]
    pub sensors_per_kind: usize,

    /// Shortest pause between two readings of one sensor, in seconds.
    #[serde(default = "default_sleep_lower")]
    pub sleep_lower_secs: f64,

    #[serde(default = "default_sleep_upper")]
    pub sleep_upper_secs: f64,

    /// MQTT QoS level (0, 1 or 2) for publishes and the control subscription.
    #[serde(default)]
    pub qos: u8,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Leading part of every MQTT client id this process registers.
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
}

fn default_broker_host() -> String {
    "localhost".to_string()
}
fn default_broker_port() -> u16 {
    1883
}
fn default_sensors_per_kind() -> usize {
    1
}
fn default_sleep_lower() -> f64 {
    1.0
}
fn default_sleep_upper() -> f64 {
    10.0
}
fn default_keep_alive() -> u64 {
    5
}
fn default_connect_timeout() -> u64 {
    5
}
fn default_client_id_prefix() -> String {
    "envsim".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_host: default_broker_host(),
            broker_port: default_broker_port(),
            sensors_per_kind: default_sensors_per_kind(),
            sleep_lower_secs: default_sleep_lower(),
            sleep_upper_secs: default_sleep_upper(),
            qos: 0,
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
            client_id_prefix: default_client_id_prefix(),
        }
    }
}

impl Config {
    /// Reject settings the fleet cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        self.sleep_bounds()?;
        self.delivery_qos()?;
        if self.keep_alive_secs < 5 {
            return Err(format!(
                "keep_alive_secs must be at least 5, got {}",
                self.keep_alive_secs
            ));
        }
        if self.sensors_per_kind == 0 {
            return Err("sensors_per_kind must be at least 1".to_string());
        }
        if self.broker_host.trim().is_empty() {
            return Err("broker_host must not be empty".to_string());
        }
        Ok(())
    }

    pub fn sleep_bounds(&self) -> Result<SleepBounds, String> {
        SleepBounds::from_secs_f64(self.sleep_lower_secs, self.sleep_upper_secs)
            .map_err(|e| e.to_string())
    }

    pub fn delivery_qos(&self) -> Result<DeliveryQos, String> {
        DeliveryQos::from_level(self.qos).map_err(|e| e.to_string())
    }

    /// Fleet shape described by this config.  Call after [`validate`][Self::validate].
    pub fn fleet_config(&self) -> FleetConfig {
        FleetConfig {
            sensors_per_kind: self.sensors_per_kind,
            sleep_bounds: self.sleep_bounds().unwrap_or_default(),
        }
    }

    /// MQTT settings for one client, with a fresh client id for `role`.
    pub fn mqtt_settings(&self, role: &str) -> MqttSettings {
        MqttSettings::new(
            self.broker_host.clone(),
            self.broker_port,
            MqttSettings::unique_client_id(&self.client_id_prefix, role),
        )
        .with_keep_alive(Duration::from_secs(self.keep_alive_secs))
        .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
        .with_qos(self.delivery_qos().unwrap_or_default())
    }
}

/// Path of the config file: `$ENVSIM_CONFIG` when set, otherwise
/// `~/.envsim/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(explicit) = std::env::var("ENVSIM_CONFIG") {
        return PathBuf::from(explicit);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".envsim").join("config.toml")
}

/// Parse the file at `path`.  Returns `None` if it does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// The configuration the binaries run with: the file (or defaults), then
/// environment overrides, then validation.
pub fn effective() -> Result<Config, String> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Apply environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `MQTT_BROKER` | `broker_host` |
/// | `MQTT_PORT` | `broker_port` |
/// | `ENVSIM_SENSORS_PER_KIND` | `sensors_per_kind` |
/// | `ENVSIM_QOS` | `qos` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides_from<F>(cfg: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("MQTT_BROKER").filter(|h| !h.trim().is_empty()) {
        cfg.broker_host = host;
    }
    if let Some(port) = lookup("MQTT_PORT").and_then(|v| v.trim().parse::<u16>().ok()) {
        cfg.broker_port = port;
    }
    if let Some(n) = lookup("ENVSIM_SENSORS_PER_KIND").and_then(|v| v.trim().parse::<usize>().ok()) {
        cfg.sensors_per_kind = n;
    }
    if let Some(qos) = lookup("ENVSIM_QOS").and_then(|v| v.trim().parse::<u8>().ok()) {
        cfg.qos = qos;
    }
}
