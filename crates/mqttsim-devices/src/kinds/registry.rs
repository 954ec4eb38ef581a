//! Static registry mapping type identifiers to kinds.

use serde::Serialize;

use mqttsim_core::{Error, Result};

use super::{Capabilities, CoverKind, DeviceKind, FanKind, LightKind, SwitchKind, TempSensorKind};

static KINDS: [&dyn DeviceKind; 5] = [&LightKind, &SwitchKind, &TempSensorKind, &CoverKind, &FanKind];

/// Public description of a registered kind.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindInfo {
    pub id: &'static str,
    pub title: &'static str,
    pub capabilities: Capabilities,
    pub default_telemetry_interval_sec: u32,
}

/// Look up a kind by type identifier.
pub fn get_kind(id: &str) -> Result<&'static dyn DeviceKind> {
    KINDS
        .iter()
        .copied()
        .find(|k| k.id() == id)
        .ok_or_else(|| Error::UnsupportedType(id.to_string()))
}

pub fn has_kind(id: &str) -> bool {
    KINDS.iter().any(|k| k.id() == id)
}

pub fn kind_ids() -> Vec<&'static str> {
    KINDS.iter().map(|k| k.id()).collect()
}

pub fn list_kinds() -> Vec<KindInfo> {
    KINDS
        .iter()
        .map(|k| KindInfo {
            id: k.id(),
            title: k.title(),
            capabilities: k.capabilities(),
            default_telemetry_interval_sec: k.default_telemetry_interval(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_kinds() {
        assert_eq!(
            kind_ids(),
            vec!["light", "switch", "sensor.temp", "cover", "fan"]
        );
        assert!(has_kind("cover"));
        assert_eq!(get_kind("sensor.temp").unwrap().default_telemetry_interval(), 10);
    }

    #[test]
    fn test_unknown_kind_is_an_error() {
        let err = get_kind("thermostat").err().unwrap();
        assert!(matches!(err, Error::UnsupportedType(ref t) if t == "thermostat"));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_list_kinds() {
        let kinds = list_kinds();
        assert_eq!(kinds.len(), 5);
        let light = kinds.iter().find(|k| k.id == "light").unwrap();
        assert_eq!(light.title, "Light");
        assert_eq!(light.capabilities["brightness"], true);
    }
}
