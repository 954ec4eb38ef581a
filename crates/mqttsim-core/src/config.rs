//! Simulator configuration.
//!
//! Sources in priority order:
//! 1. TOML file (`config.toml` or an explicit path)
//! 2. Environment variables
//! 3. Built-in defaults

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default values.
pub mod defaults {
    pub const MQTT_URL: &str = "mqtt://localhost:1883";
    pub const NAMESPACE: &str = "sim";
    pub const QOS: u8 = 1;
    pub const RECONNECT_SECS: u64 = 2;
    pub const KEEP_ALIVE_SECS: u64 = 30;
    pub const STORAGE_PATH: &str = "data/devices.redb";
    pub const TEMPLATES_PATH: &str = "config/device-templates.json";
    pub const CONFIG_FILE: &str = "config.toml";
}

/// Environment variable names.
pub mod env_vars {
    pub const MQTT_URL: &str = "MQTT_URL";
    pub const MQTT_USERNAME: &str = "MQTT_USERNAME";
    pub const MQTT_PASSWORD: &str = "MQTT_PASSWORD";
    pub const MQTT_NAMESPACE: &str = "MQTT_NAMESPACE";
    pub const MQTT_QOS: &str = "MQTT_QOS";
    pub const MQTT_RECONNECT_SECS: &str = "MQTT_RECONNECT_SECS";
    pub const MQTT_KEEP_ALIVE_SECS: &str = "MQTT_KEEP_ALIVE_SECS";
    pub const DISCOVERY_ENABLED: &str = "DISCOVERY_ENABLED";
    pub const DB_DATABASE: &str = "DB_DATABASE";
    pub const DEVICE_TEMPLATES_PATH: &str = "DEVICE_TEMPLATES_PATH";
    pub const LOG_JSON: &str = "MQTTSIM_LOG_JSON";
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Topic prefix for every device and service topic.
    pub namespace: String,
    pub qos: u8,
    pub reconnect_secs: u64,
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            url: defaults::MQTT_URL.to_string(),
            username: None,
            password: None,
            namespace: defaults::NAMESPACE.to_string(),
            qos: defaults::QOS,
            reconnect_secs: defaults::RECONNECT_SECS,
            keep_alive_secs: defaults::KEEP_ALIVE_SECS,
        }
    }
}

/// Complete simulator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    pub mqtt: MqttConfig,
    /// Publish retained discovery payloads.
    pub discovery_enabled: bool,
    pub storage_path: PathBuf,
    pub templates_path: PathBuf,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            discovery_enabled: true,
            storage_path: PathBuf::from(defaults::STORAGE_PATH),
            templates_path: PathBuf::from(defaults::TEMPLATES_PATH),
        }
    }
}

/// TOML file layout. Every field is optional so a file only overrides what it names.
#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    mqtt: Option<TomlMqtt>,
    discovery: Option<TomlDiscovery>,
    storage: Option<TomlPath>,
    templates: Option<TomlPath>,
}

#[derive(Debug, Default, Deserialize)]
struct TomlMqtt {
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    namespace: Option<String>,
    qos: Option<u8>,
    reconnect_secs: Option<u64>,
    keep_alive_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TomlDiscovery {
    enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct TomlPath {
    path: Option<PathBuf>,
}

impl SimConfig {
    /// Load configuration from the process environment and an optional TOML file.
    ///
    /// An explicit `path` must exist; without one, `config.toml` in the working
    /// directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;

        let content = match path {
            Some(p) => Some(std::fs::read_to_string(p).map_err(|e| {
                Error::Config(format!("cannot read {}: {}", p.display(), e))
            })?),
            None => std::fs::read_to_string(defaults::CONFIG_FILE).ok(),
        };
        if let Some(content) = content {
            tracing::info!(category = "config", "Loading config from TOML");
            config.apply_toml(&content)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Overlay values from environment variables, read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(env_vars::MQTT_URL) {
            self.mqtt.url = v;
        }
        if let Some(v) = lookup(env_vars::MQTT_USERNAME).filter(|v| !v.is_empty()) {
            self.mqtt.username = Some(v);
        }
        if let Some(v) = lookup(env_vars::MQTT_PASSWORD).filter(|v| !v.is_empty()) {
            self.mqtt.password = Some(v);
        }
        if let Some(v) = lookup(env_vars::MQTT_NAMESPACE) {
            self.mqtt.namespace = v;
        }
        if let Some(v) = lookup(env_vars::MQTT_QOS) {
            self.mqtt.qos = parse_env(env_vars::MQTT_QOS, &v)?;
        }
        if let Some(v) = lookup(env_vars::MQTT_RECONNECT_SECS) {
            self.mqtt.reconnect_secs = parse_env(env_vars::MQTT_RECONNECT_SECS, &v)?;
        }
        if let Some(v) = lookup(env_vars::MQTT_KEEP_ALIVE_SECS) {
            self.mqtt.keep_alive_secs = parse_env(env_vars::MQTT_KEEP_ALIVE_SECS, &v)?;
        }
        if let Some(v) = lookup(env_vars::DISCOVERY_ENABLED) {
            // Only the literal "false" disables discovery.
            self.discovery_enabled = v != "false";
        }
        if let Some(v) = lookup(env_vars::DB_DATABASE) {
            self.storage_path = PathBuf::from(v);
        }
        if let Some(v) = lookup(env_vars::DEVICE_TEMPLATES_PATH) {
            self.templates_path = PathBuf::from(v);
        }
        Ok(())
    }

    /// Overlay values from a TOML document.
    pub fn apply_toml(&mut self, content: &str) -> Result<()> {
        let file: TomlConfig = toml::from_str(content)?;

        if let Some(mqtt) = file.mqtt {
            if let Some(v) = mqtt.url {
                self.mqtt.url = v;
            }
            if mqtt.username.is_some() {
                self.mqtt.username = mqtt.username;
            }
            if mqtt.password.is_some() {
                self.mqtt.password = mqtt.password;
            }
            if let Some(v) = mqtt.namespace {
                self.mqtt.namespace = v;
            }
            if let Some(v) = mqtt.qos {
                self.mqtt.qos = v;
            }
            if let Some(v) = mqtt.reconnect_secs {
                self.mqtt.reconnect_secs = v;
            }
            if let Some(v) = mqtt.keep_alive_secs {
                self.mqtt.keep_alive_secs = v;
            }
        }
        if let Some(enabled) = file.discovery.and_then(|d| d.enabled) {
            self.discovery_enabled = enabled;
        }
        if let Some(path) = file.storage.and_then(|s| s.path) {
            self.storage_path = path;
        }
        if let Some(path) = file.templates.and_then(|t| t.path) {
            self.templates_path = path;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.mqtt.qos > 2 {
            return Err(Error::Config(format!(
                "mqtt.qos must be 0, 1 or 2 (got {})",
                self.mqtt.qos
            )));
        }
        let ns = &self.mqtt.namespace;
        if ns.is_empty() || ns.contains(['+', '#', '/']) {
            return Err(Error::Config(format!(
                "mqtt.namespace must be a single topic segment (got '{}')",
                ns
            )));
        }
        if self.mqtt.reconnect_secs == 0 {
            return Err(Error::Config("mqtt.reconnect_secs must be > 0".into()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid value for {}: '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SimConfig::default();
        assert_eq!(config.mqtt.namespace, "sim");
        assert_eq!(config.mqtt.qos, 1);
        assert!(config.discovery_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SimConfig::default();
        config
            .apply_env(env(&[
                (env_vars::MQTT_NAMESPACE, "lab"),
                (env_vars::MQTT_QOS, "2"),
                (env_vars::DISCOVERY_ENABLED, "false"),
                (env_vars::MQTT_USERNAME, ""),
            ]))
            .unwrap();
        assert_eq!(config.mqtt.namespace, "lab");
        assert_eq!(config.mqtt.qos, 2);
        assert!(!config.discovery_enabled);
        assert_eq!(config.mqtt.username, None);
    }

    #[test]
    fn test_discovery_only_disabled_by_literal_false() {
        let mut config = SimConfig::default();
        config
            .apply_env(env(&[(env_vars::DISCOVERY_ENABLED, "0")]))
            .unwrap();
        assert!(config.discovery_enabled);
    }

    #[test]
    fn test_invalid_env_number() {
        let mut config = SimConfig::default();
        let err = config
            .apply_env(env(&[(env_vars::MQTT_QOS, "high")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_toml_wins_over_env() {
        let mut config = SimConfig::default();
        config
            .apply_env(env(&[(env_vars::MQTT_NAMESPACE, "from-env")]))
            .unwrap();
        config
            .apply_toml(
                r#"
                [mqtt]
                namespace = "from-toml"
                url = "mqtt://broker:1884"

                [discovery]
                enabled = false

                [storage]
                path = "/tmp/sim.redb"
                "#,
            )
            .unwrap();
        assert_eq!(config.mqtt.namespace, "from-toml");
        assert_eq!(config.mqtt.url, "mqtt://broker:1884");
        assert!(!config.discovery_enabled);
        assert_eq!(config.storage_path, PathBuf::from("/tmp/sim.redb"));
        // untouched keys keep their defaults
        assert_eq!(config.mqtt.qos, 1);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SimConfig::default();
        config.mqtt.qos = 3;
        assert!(config.validate().is_err());

        let mut config = SimConfig::default();
        config.mqtt.namespace = "a/b".into();
        assert!(config.validate().is_err());
    }
}
