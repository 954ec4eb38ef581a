//! Light: on/off with optional brightness, color temperature and RGB.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use mqttsim_core::{validation_err, Result};

use super::{
    check_state, clamp_u8, number_field, parse_caps, parse_state, power_field, to_state,
    Capabilities, DeviceKind, Power,
};

const BRIGHTNESS_MAX: u8 = 255;
const COLOR_TEMP_MIN: u16 = 153;
const COLOR_TEMP_MAX: u16 = 500;
const COLOR_TEMP_DEFAULT: u16 = 350;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LightCaps {
    brightness: bool,
    color_temp: bool,
    rgb: bool,
}

impl LightCaps {
    fn allows(&self, mode: LightMode) -> bool {
        match mode {
            LightMode::White => true,
            LightMode::Ct => self.color_temp,
            LightMode::Rgb => self.rgb,
        }
    }

    fn allowed_modes(&self) -> Vec<&'static str> {
        let mut modes = vec!["white"];
        if self.color_temp {
            modes.push("ct");
        }
        if self.rgb {
            modes.push("rgb");
        }
        modes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LightMode {
    White,
    Ct,
    Rgb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Rgb {
    r: u8,
    g: u8,
    b: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LightState {
    state: Power,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    brightness: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    color_temp: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    color: Option<Rgb>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mode: Option<LightMode>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

pub struct LightKind;

impl DeviceKind for LightKind {
    fn id(&self) -> &'static str {
        "light"
    }

    fn title(&self) -> &'static str {
        "Light"
    }

    fn capabilities(&self) -> Capabilities {
        let mut caps = Map::new();
        caps.insert("brightness".into(), json!(true));
        caps.insert("color_temp".into(), json!(false));
        caps.insert("rgb".into(), json!(false));
        caps
    }

    fn validate_capabilities(&self, caps: &Capabilities) -> Result<()> {
        parse_caps::<LightCaps>(self, caps).map(|_| ())
    }

    fn validate_state(&self, state: &Value) -> Result<()> {
        check_state::<LightState>(self.id(), state)
    }

    fn default_state(&self, caps: &Capabilities) -> Result<Value> {
        let c: LightCaps = parse_caps(self, caps)?;
        let mut st = LightState {
            state: Power::Off,
            brightness: c.brightness.then_some(0),
            color_temp: None,
            color: None,
            mode: None,
            extra: Map::new(),
        };
        if c.color_temp {
            st.color_temp = Some(COLOR_TEMP_DEFAULT);
            st.mode = Some(LightMode::Ct);
        }
        if c.rgb {
            st.color = Some(Rgb { r: 255, g: 255, b: 255 });
            // ct keeps priority when both are supported
            st.mode = Some(st.mode.unwrap_or(LightMode::Rgb));
        }
        if !c.color_temp && !c.rgb {
            st.mode = Some(LightMode::White);
        }
        to_state(&st)
    }

    fn validate(&self, cmd: &Map<String, Value>, caps: &Capabilities) -> Result<()> {
        let c: LightCaps = parse_caps(self, caps)?;
        power_field(cmd)?;

        if cmd.contains_key("brightness") {
            if !c.brightness {
                return Err(validation_err!("brightness not supported"));
            }
            let v = number_field(cmd, "brightness", "brightness 0..255")?;
            if v.is_some_and(|v| !(0.0..=BRIGHTNESS_MAX as f64).contains(&v)) {
                return Err(validation_err!("brightness 0..255"));
            }
        }

        if cmd.contains_key("colorTemp") {
            if !c.color_temp {
                return Err(validation_err!("color_temp not supported"));
            }
            let v = number_field(cmd, "colorTemp", "colorTemp 153..500")?;
            if v.is_some_and(|v| !(COLOR_TEMP_MIN as f64..=COLOR_TEMP_MAX as f64).contains(&v)) {
                return Err(validation_err!("colorTemp 153..500"));
            }
        }

        if let Some(color) = cmd.get("color") {
            if !c.rgb {
                return Err(validation_err!("rgb not supported"));
            }
            for channel in ["r", "g", "b"] {
                let v = color.get(channel).and_then(Value::as_f64);
                if !v.is_some_and(|v| (0.0..=255.0).contains(&v)) {
                    return Err(validation_err!("color r/g/b 0..255"));
                }
            }
        }

        if let Some(mode) = cmd.get("mode") {
            let allowed = serde_json::from_value::<LightMode>(mode.clone())
                .map(|m| c.allows(m))
                .unwrap_or(false);
            if !allowed {
                return Err(validation_err!(
                    "mode must be one of {}",
                    c.allowed_modes().join(",")
                ));
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
        let c: LightCaps = parse_caps(self, caps)?;
        let mut next: LightState = parse_state(self.id(), prev)?;

        if let Some(power) = power_field(cmd)? {
            next.state = power;
        }

        if c.brightness {
            if let Some(v) = cmd.get("brightness").and_then(Value::as_f64) {
                next.brightness = Some(clamp_u8(v, 0, BRIGHTNESS_MAX));
            }
        }

        if c.color_temp {
            if let Some(v) = cmd.get("colorTemp").and_then(Value::as_f64) {
                let ct = v.round().clamp(COLOR_TEMP_MIN as f64, COLOR_TEMP_MAX as f64) as u16;
                next.color_temp = Some(ct);
                next.mode = Some(LightMode::Ct);
            }
        }

        if c.rgb {
            if let Some(color) = cmd.get("color").filter(|v| v.is_object()) {
                let channel = |k: &str| {
                    clamp_u8(color.get(k).and_then(Value::as_f64).unwrap_or(255.0), 0, 255)
                };
                next.color = Some(Rgb {
                    r: channel("r"),
                    g: channel("g"),
                    b: channel("b"),
                });
                next.mode = Some(LightMode::Rgb);
            }
        }

        // An explicit mode wins over the one implied by the last property written.
        if let Some(mode) = cmd
            .get("mode")
            .and_then(|m| serde_json::from_value::<LightMode>(m.clone()).ok())
        {
            if c.allows(mode) {
                next.mode = Some(mode);
            }
        }

        if next.mode.is_none() {
            next.mode = Some(if c.rgb {
                LightMode::Rgb
            } else if c.color_temp {
                LightMode::Ct
            } else {
                LightMode::White
            });
        }

        to_state(&next)
    }
}
