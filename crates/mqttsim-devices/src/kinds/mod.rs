//! Device kinds.
//!
//! A kind owns everything type-specific about a simulated device: its
//! default capabilities, initial state, command validation, the pure state
//! reducer and the optional telemetry tick. The router, scheduler and
//! lifecycle code only ever talk to a kind through [`DeviceKind`].

mod cover;
mod fan;
mod light;
mod registry;
mod sensor_temp;
mod switch;

pub use cover::CoverKind;
pub use fan::FanKind;
pub use light::LightKind;
pub use registry::{get_kind, has_kind, kind_ids, list_kinds, KindInfo};
pub use sensor_temp::TempSensorKind;
pub use switch::SwitchKind;

use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use mqttsim_core::{validation_err, Error, Result};

/// Capability mapping as stored on a device.
pub type Capabilities = Map<String, Value>;

/// Behaviour contract for one device type.
pub trait DeviceKind: Send + Sync {
    /// Type identifier used in topics and records, e.g. `light`.
    fn id(&self) -> &'static str;

    /// Human readable name.
    fn title(&self) -> &'static str;

    /// Default capability values.
    fn capabilities(&self) -> Capabilities;

    /// Telemetry interval in seconds for new devices. `0` disables telemetry.
    fn default_telemetry_interval(&self) -> u32 {
        0
    }

    /// Check a merged capability set. Unknown keys and wrongly typed values are rejected.
    fn validate_capabilities(&self, caps: &Capabilities) -> Result<()>;

    /// Initial state for a device with the given capabilities.
    fn default_state(&self, caps: &Capabilities) -> Result<Value>;

    /// Check that an externally supplied state (e.g. from an import) can be
    /// read back by [`DeviceKind::reduce`] and [`DeviceKind::tick`].
    fn validate_state(&self, state: &Value) -> Result<()>;

    /// Reject commands that are malformed or not supported by `caps`.
    fn validate(&self, cmd: &Map<String, Value>, caps: &Capabilities) -> Result<()>;

    /// Compute the next state. Must be called after [`DeviceKind::validate`].
    ///
    /// Pure: `prev` is never modified and unknown command fields are ignored.
    fn reduce(&self, prev: &Value, cmd: &Map<String, Value>, caps: &Capabilities)
        -> Result<Value>;

    /// Advance passive simulation by one telemetry interval.
    fn tick(&self, prev: &Value, _caps: &Capabilities, _rng: &mut dyn RngCore) -> Result<Value> {
        Ok(prev.clone())
    }
}

/// Binary power state shared by several kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Power {
    #[serde(rename = "ON")]
    On,
    #[serde(rename = "OFF")]
    Off,
}

impl Power {
    pub fn is_on(self) -> bool {
        self == Power::On
    }
}

/// Overlay `caps` on the kind defaults and decode into the kind's typed capabilities.
pub(crate) fn parse_caps<T: DeserializeOwned>(kind: &dyn DeviceKind, caps: &Capabilities) -> Result<T> {
    let mut merged = kind.capabilities();
    for (k, v) in caps {
        merged.insert(k.clone(), v.clone());
    }
    serde_json::from_value(Value::Object(merged))
        .map_err(|e| validation_err!("invalid capabilities for {}: {}", kind.id(), e))
}

pub(crate) fn parse_state<T: DeserializeOwned>(kind: &str, state: &Value) -> Result<T> {
    serde_json::from_value(state.clone())
        .map_err(|e| Error::Serialization(format!("unreadable {} state: {}", kind, e)))
}

/// Like [`parse_state`], but reports a bad shape as a validation failure.
pub(crate) fn check_state<T: DeserializeOwned>(kind: &str, state: &Value) -> Result<()> {
    serde_json::from_value::<T>(state.clone())
        .map(|_| ())
        .map_err(|e| validation_err!("invalid {} state: {}", kind, e))
}

pub(crate) fn to_state<T: Serialize>(state: &T) -> Result<Value> {
    Ok(serde_json::to_value(state)?)
}

/// Read an optional numeric command field. `null` counts as absent.
pub(crate) fn number_field(cmd: &Map<String, Value>, key: &str, err: &str) -> Result<Option<f64>> {
    match cmd.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| validation_err!(err)),
    }
}

/// Read an optional `ON`/`OFF` command field.
pub(crate) fn power_field(cmd: &Map<String, Value>) -> Result<Option<Power>> {
    match cmd.get("state") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s == "ON" => Ok(Some(Power::On)),
        Some(Value::String(s)) if s == "OFF" => Ok(Some(Power::Off)),
        Some(_) => Err(validation_err!("state must be ON|OFF")),
    }
}

pub(crate) fn clamp_u8(v: f64, lo: u8, hi: u8) -> u8 {
    v.round().clamp(lo as f64, hi as f64) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cmd(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_power_field() {
        assert_eq!(power_field(&cmd(json!({"state": "ON"}))).unwrap(), Some(Power::On));
        assert_eq!(power_field(&cmd(json!({}))).unwrap(), None);
        assert!(power_field(&cmd(json!({"state": "on"}))).is_err());
        assert!(power_field(&cmd(json!({"state": 1}))).is_err());
    }

    #[test]
    fn test_number_field_rejects_strings() {
        let c = cmd(json!({"speed": "fast"}));
        assert!(number_field(&c, "speed", "speed must be a number").is_err());
        assert_eq!(number_field(&c, "missing", "x").unwrap(), None);
    }

    #[test]
    fn test_every_kind_accepts_its_defaults() {
        for id in kind_ids() {
            let kind = get_kind(id).unwrap();
            let caps = kind.capabilities();
            kind.validate_capabilities(&caps).unwrap();
            let state = kind.default_state(&caps).unwrap();
            kind.validate_state(&state).unwrap();
        }
    }

    #[test]
    fn test_unreadable_state_rejected() {
        let light = get_kind("light").unwrap();
        let err = light
            .validate_state(&json!({"state": "ON", "brightness": 127.5, "mode": "white"}))
            .unwrap_err();
        assert!(matches!(err, Error::ValidationFailed(_)));

        assert!(get_kind("cover").unwrap().validate_state(&json!({"position": "half"})).is_err());
        assert!(get_kind("switch").unwrap().validate_state(&json!({"state": "ON"})).is_ok());
    }

    #[test]
    fn test_reduce_is_pure_for_every_kind() {
        let commands = [
            ("light", json!({"state": "ON", "brightness": 120})),
            ("switch", json!({"state": "ON"})),
            ("fan", json!({"speed": 2})),
            ("cover", json!({"action": "OPEN"})),
            ("sensor.temp", json!({"value": 30.5})),
        ];
        for (id, c) in commands {
            let kind = get_kind(id).unwrap();
            let caps = kind.capabilities();
            let prev = kind.default_state(&caps).unwrap();
            let snapshot = prev.clone();
            let c = cmd(c);

            kind.validate(&c, &caps).unwrap();
            let a = kind.reduce(&prev, &c, &caps).unwrap();
            let b = kind.reduce(&prev, &c, &caps).unwrap();

            assert_eq!(prev, snapshot, "{} mutated its input", id);
            assert_eq!(a, b, "{} is not deterministic", id);
        }
    }

    #[test]
    fn test_unknown_capability_rejected() {
        for id in kind_ids() {
            let kind = get_kind(id).unwrap();
            let mut caps = kind.capabilities();
            caps.insert("bogus".into(), json!(true));
            let err = kind.validate_capabilities(&caps).unwrap_err();
            assert!(matches!(err, Error::ValidationFailed(_)), "{}", id);
        }
    }
}
