//! Fan: on/off with discrete speed steps.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use mqttsim_core::{validation_err, Result};

use super::{
    check_state, clamp_u8, number_field, parse_caps, parse_state, power_field, to_state,
    Capabilities, DeviceKind, Power,
};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct FanCaps {
    max_speed: u8,
    /// Speed used when switched on from standstill.
    default_speed: u8,
}

#[derive(Debug, Serialize, Deserialize)]
struct FanState {
    state: Power,
    speed: u8,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

pub struct FanKind;

impl DeviceKind for FanKind {
    fn id(&self) -> &'static str {
        "fan"
    }

    fn title(&self) -> &'static str {
        "Fan"
    }

    fn capabilities(&self) -> Capabilities {
        let mut caps = Map::new();
        caps.insert("maxSpeed".into(), json!(3));
        caps.insert("defaultSpeed".into(), json!(1));
        caps
    }

    fn validate_capabilities(&self, caps: &Capabilities) -> Result<()> {
        parse_caps::<FanCaps>(self, caps).map(|_| ())
    }

    fn validate_state(&self, state: &Value) -> Result<()> {
        check_state::<FanState>(self.id(), state)
    }

    fn default_state(&self, caps: &Capabilities) -> Result<Value> {
        parse_caps::<FanCaps>(self, caps)?;
        to_state(&FanState {
            state: Power::Off,
            speed: 0,
            extra: Map::new(),
        })
    }

    fn validate(&self, cmd: &Map<String, Value>, caps: &Capabilities) -> Result<()> {
        let c: FanCaps = parse_caps(self, caps)?;
        power_field(cmd)?;
        let range = format!("speed 0..{}", c.max_speed);
        if let Some(speed) = number_field(cmd, "speed", &range)? {
            if speed < 0.0 || speed > c.max_speed as f64 {
                return Err(validation_err!(range));
            }
        }
        Ok(())
    }

    fn reduce(
        &self,
        prev: &Value,
        cmd: &Map<String, Value>,
        caps: &Capabilities,
    ) -> Result<Value> {
        let c: FanCaps = parse_caps(self, caps)?;
        let mut next: FanState = parse_state(self.id(), prev)?;

        if let Some(power) = power_field(cmd)? {
            next.state = power;
            if !power.is_on() {
                next.speed = 0;
            } else if next.speed == 0 {
                next.speed = c.default_speed;
            }
        }

        if let Some(speed) = cmd.get("speed").and_then(Value::as_f64) {
            next.speed = clamp_u8(speed, 0, c.max_speed);
            next.state = if next.speed > 0 { Power::On } else { Power::Off };
        }

        to_state(&next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_speed_above_max_rejected() {
        let caps = FanKind.capabilities();
        assert!(FanKind.validate(&cmd(json!({"speed": 4})), &caps).is_err());
        assert!(FanKind.validate(&cmd(json!({"speed": -1})), &caps).is_err());
        assert!(FanKind.validate(&cmd(json!({"speed": 3})), &caps).is_ok());

        let mut wide = caps.clone();
        wide.insert("maxSpeed".into(), json!(6));
        assert!(FanKind.validate(&cmd(json!({"speed": 5})), &wide).is_ok());
    }

    #[test]
    fn test_on_from_standstill_uses_default_speed() {
        let caps = FanKind.capabilities();
        let off = FanKind.default_state(&caps).unwrap();
        let on = FanKind.reduce(&off, &cmd(json!({"state": "ON"})), &caps).unwrap();
        assert_eq!(on, json!({"state": "ON", "speed": 1}));
    }

    #[test]
    fn test_off_forces_zero_speed() {
        let caps = FanKind.capabilities();
        let prev = json!({"state": "ON", "speed": 3});
        let off = FanKind.reduce(&prev, &cmd(json!({"state": "OFF"})), &caps).unwrap();
        assert_eq!(off, json!({"state": "OFF", "speed": 0}));
    }

    #[test]
    fn test_speed_drives_power() {
        let caps = FanKind.capabilities();
        let off = FanKind.default_state(&caps).unwrap();
        let fast = FanKind.reduce(&off, &cmd(json!({"speed": 2})), &caps).unwrap();
        assert_eq!(fast, json!({"state": "ON", "speed": 2}));

        let stopped = FanKind.reduce(&fast, &cmd(json!({"speed": 0})), &caps).unwrap();
        assert_eq!(stopped, json!({"state": "OFF", "speed": 0}));

        // speed wins over an explicit state in the same command
        let mixed = FanKind
            .reduce(&off, &cmd(json!({"state": "OFF", "speed": 3})), &caps)
            .unwrap();
        assert_eq!(mixed, json!({"state": "ON", "speed": 3}));
    }
}
