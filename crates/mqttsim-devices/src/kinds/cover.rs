//! Cover / blind: position 0 (closed) to 100 (open) driven by OPEN/CLOSE/STOP.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use mqttsim_core::{validation_err, Result};

use super::{
    check_state, clamp_u8, number_field, parse_caps, parse_state, to_state, Capabilities,
    DeviceKind,
};

const POSITION_MAX: u8 = 100;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct CoverCaps {
    speed_per_tick: u8,
    invert: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum CoverAction {
    Open,
    Close,
    Stop,
}

#[derive(Debug, Serialize, Deserialize)]
struct CoverState {
    position: u8,
    action: CoverAction,
    #[serde(default)]
    moving: bool,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

pub struct CoverKind;

impl CoverKind {
    fn action_field(cmd: &Map<String, Value>) -> Result<Option<CoverAction>> {
        match cmd.get("action") {
            None | Some(Value::Null) => Ok(None),
            Some(v) => serde_json::from_value(v.clone())
                .map(Some)
                .map_err(|_| validation_err!("action must be OPEN|CLOSE|STOP")),
        }
    }
}

impl DeviceKind for CoverKind {
    fn id(&self) -> &'static str {
        "cover"
    }

    fn title(&self) -> &'static str {
        "Cover / Blind"
    }

    fn capabilities(&self) -> Capabilities {
        let mut caps = Map::new();
        caps.insert("speedPerTick".into(), json!(5));
        caps.insert("invert".into(), json!(false));
        caps
    }

    fn default_telemetry_interval(&self) -> u32 {
        2
    }

    fn validate_capabilities(&self, caps: &Capabilities) -> Result<()> {
        parse_caps::<CoverCaps>(self, caps).map(|_| ())
    }

    fn validate_state(&self, state: &Value) -> Result<()> {
        check_state::<CoverState>(self.id(), state)
    }

    fn default_state(&self, caps: &Capabilities) -> Result<Value> {
        let c: CoverCaps = parse_caps(self, caps)?;
        to_state(&CoverState {
            position: if c.invert { POSITION_MAX } else { 0 },
            action: CoverAction::Stop,
            moving: false,
            extra: Map::new(),
        })
    }

    fn validate(&self, cmd: &Map<String, Value>, _caps: &Capabilities) -> Result<()> {
        if let Some(pos) = number_field(cmd, "position", "position 0..100")? {
            if !(0.0..=POSITION_MAX as f64).contains(&pos) {
                return Err(validation_err!("position 0..100"));
            }
        }
        Self::action_field(cmd)?;
        Ok(())
    }

    fn reduce(
        &self,
        prev: &Value,
        cmd: &Map<String, Value>,
        caps: &Capabilities,
    ) -> Result<Value> {
        let c: CoverCaps = parse_caps(self, caps)?;
        let mut next: CoverState = parse_state(self.id(), prev)?;

        if let Some(pos) = cmd.get("position").and_then(Value::as_f64) {
            next.position = clamp_u8(pos, 0, POSITION_MAX);
            next.action = CoverAction::Stop;
            next.moving = false;
        }
        if let Some(action) = Self::action_field(cmd)? {
            next.action = action;
            next.moving = matches!(action, CoverAction::Open | CoverAction::Close);
        }

        // Inverted display is applied and immediately undone, so the stored
        // position always stays physical.
        if c.invert {
            next.position = POSITION_MAX - next.position;
        }
        if c.invert {
            next.position = POSITION_MAX - next.position;
        }

        to_state(&next)
    }

    fn tick(&self, prev: &Value, caps: &Capabilities, _rng: &mut dyn RngCore) -> Result<Value> {
        let c: CoverCaps = parse_caps(self, caps)?;
        let mut next: CoverState = parse_state(self.id(), prev)?;
        if !next.moving {
            return Ok(prev.clone());
        }

        let step = c.speed_per_tick as i16;
        let pos = match next.action {
            CoverAction::Open => next.position as i16 + step,
            CoverAction::Close => next.position as i16 - step,
            CoverAction::Stop => next.position as i16,
        }
        .clamp(0, POSITION_MAX as i16) as u8;

        let at_end = (next.action == CoverAction::Open && pos >= POSITION_MAX)
            || (next.action == CoverAction::Close && pos == 0);

        next.position = pos;
        if at_end {
            next.action = CoverAction::Stop;
            next.moving = false;
        }
        to_state(&next)
    }
}
