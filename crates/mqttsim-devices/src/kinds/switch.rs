//! Switch: on/off only.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use mqttsim_core::Result;

use super::{
    check_state, parse_caps, parse_state, power_field, to_state, Capabilities, DeviceKind, Power,
};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SwitchCaps {}

#[derive(Debug, Serialize, Deserialize)]
struct SwitchState {
    state: Power,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

pub struct SwitchKind;

impl DeviceKind for SwitchKind {
    fn id(&self) -> &'static str {
        "switch"
    }

    fn title(&self) -> &'static str {
        "Switch"
    }

    fn capabilities(&self) -> Capabilities {
        Map::new()
    }

    fn validate_capabilities(&self, caps: &Capabilities) -> Result<()> {
        parse_caps::<SwitchCaps>(self, caps).map(|_| ())
    }

    fn validate_state(&self, state: &Value) -> Result<()> {
        check_state::<SwitchState>(self.id(), state)
    }

    fn default_state(&self, _caps: &Capabilities) -> Result<Value> {
        to_state(&SwitchState {
            state: Power::Off,
            extra: Map::new(),
        })
    }

    fn validate(&self, cmd: &Map<String, Value>, _caps: &Capabilities) -> Result<()> {
        power_field(cmd).map(|_| ())
    }

    fn reduce(
        &self,
        prev: &Value,
        cmd: &Map<String, Value>,
        _caps: &Capabilities,
    ) -> Result<Value> {
        let mut next: SwitchState = parse_state(self.id(), prev)?;
        if let Some(power) = power_field(cmd)? {
            next.state = power;
        }
        to_state(&next)
    }
}
