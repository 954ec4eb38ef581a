//! Temperature sensor: read-only value drifting toward a target with noise.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use mqttsim_core::{validation_err, Result};

use super::{check_state, parse_caps, parse_state, to_state, Capabilities, DeviceKind};

const MAX_DECIMALS: i32 = 4;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TempCaps {
    min: f64,
    max: f64,
    /// Step per tick toward `target`.
    drift: f64,
    /// Symmetric random noise amplitude per tick.
    noise: f64,
    target: f64,
    unit: String,
    decimals: i32,
    #[serde(default)]
    start: Option<f64>,
}

impl TempCaps {
    fn clamp(&self, v: f64) -> f64 {
        v.max(self.min).min(self.max)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TempState {
    value: f64,
    unit: String,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

pub struct TempSensorKind;

impl DeviceKind for TempSensorKind {
    fn id(&self) -> &'static str {
        "sensor.temp"
    }

    fn title(&self) -> &'static str {
        "Temperature Sensor"
    }

    fn capabilities(&self) -> Capabilities {
        let mut caps = Map::new();
        caps.insert("min".into(), json!(0));
        caps.insert("max".into(), json!(40));
        caps.insert("drift".into(), json!(0.05));
        caps.insert("noise".into(), json!(0.1));
        caps.insert("target".into(), json!(22));
        caps.insert("unit".into(), json!("°C"));
        caps.insert("decimals".into(), json!(1));
        caps
    }

    fn default_telemetry_interval(&self) -> u32 {
        10
    }

    fn validate_capabilities(&self, caps: &Capabilities) -> Result<()> {
        let c: TempCaps = parse_caps(self, caps)?;
        if c.min > c.max {
            return Err(validation_err!("sensor.temp min must not exceed max"));
        }
        Ok(())
    }

    fn validate_state(&self, state: &Value) -> Result<()> {
        check_state::<TempState>(self.id(), state)
    }

    fn default_state(&self, caps: &Capabilities) -> Result<Value> {
        let c: TempCaps = parse_caps(self, caps)?;
        let start = c.start.unwrap_or(c.target);
        to_state(&TempState {
            value: c.clamp(start),
            unit: if c.unit == "C" { "C".into() } else { "°C".into() },
            extra: Map::new(),
        })
    }

    fn validate(&self, cmd: &Map<String, Value>, _caps: &Capabilities) -> Result<()> {
        match cmd.get("value") {
            Some(v) if !v.is_number() => Err(validation_err!("value must be a number")),
            _ => Ok(()),
        }
    }

    /// Only a forced `value` is honoured; the sensor is otherwise read-only.
    fn reduce(
        &self,
        prev: &Value,
        cmd: &Map<String, Value>,
        _caps: &Capabilities,
    ) -> Result<Value> {
        match cmd.get("value").and_then(Value::as_f64) {
            Some(v) => {
                let mut next: TempState = parse_state(self.id(), prev)?;
                next.value = v;
                to_state(&next)
            }
            None => Ok(prev.clone()),
        }
    }

    fn tick(&self, prev: &Value, caps: &Capabilities, rng: &mut dyn RngCore) -> Result<Value> {
        let c: TempCaps = parse_caps(self, caps)?;
        let mut next: TempState = parse_state(self.id(), prev)?;

        let delta = c.target - next.value;
        let towards = if delta > 0.0 {
            1.0
        } else if delta < 0.0 {
            -1.0
        } else {
            0.0
        };
        let drift = c.drift.abs() * towards;
        let noise = (rng.gen::<f64>() * 2.0 - 1.0) * c.noise.abs();

        let value = c.clamp(next.value + drift + noise);
        let factor = 10f64.powi(c.decimals.clamp(0, MAX_DECIMALS));
        next.value = (value * factor).round() / factor;

        to_state(&next)
    }
}
