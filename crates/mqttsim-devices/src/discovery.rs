//! Discovery payload published retained on `{ns}/discovery/{type}/{id}`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use mqttsim_storage::Device;

use crate::topics::Topics;

pub const SIMULATOR_NAME: &str = "mqtt-sim";
pub const SIMULATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryPayload<'a> {
    pub id: &'a str,
    #[serde(rename = "type")]
    pub device_type: &'a str,
    pub name: &'a str,
    pub slug: Option<&'a str>,
    pub template_id: Option<&'a str>,
    pub capabilities: &'a Map<String, Value>,
    pub topics: DiscoveryTopics,
    pub created_at: DateTime<Utc>,
    pub meta: DiscoveryMeta,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryTopics {
    pub cmd: String,
    pub state: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryMeta {
    pub simulator: &'static str,
    pub version: &'static str,
}

impl<'a> DiscoveryPayload<'a> {
    pub fn new(topics: &Topics, device: &'a Device) -> Self {
        let (t, id) = (device.device_type.as_str(), device.id.as_str());
        Self {
            id,
            device_type: t,
            name: &device.name,
            slug: device.slug.as_deref(),
            template_id: device.template_id.as_deref(),
            capabilities: &device.capabilities,
            topics: DiscoveryTopics {
                cmd: topics.cmd(t, id),
                state: topics.state(t, id),
                status: topics.status(t, id),
            },
            created_at: device.created_at,
            meta: DiscoveryMeta {
                simulator: SIMULATOR_NAME,
                version: SIMULATOR_VERSION,
            },
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_shape() {
        let device = Device::new("fan", "Attic Fan", None, Map::new());
        let v = DiscoveryPayload::new(&Topics::new("sim"), &device).to_value();

        assert_eq!(v["id"], device.id.as_str());
        assert_eq!(v["type"], "fan");
        assert_eq!(v["name"], "Attic Fan");
        assert!(v["slug"].is_null());
        assert!(v["templateId"].is_null());
        assert_eq!(v["capabilities"], json!({}));
        assert_eq!(
            v["topics"],
            json!({
                "cmd": format!("sim/fan/{}/set", device.id),
                "state": format!("sim/fan/{}/state", device.id),
                "status": format!("sim/fan/{}/status", device.id),
            })
        );
        assert_eq!(v["meta"]["simulator"], "mqtt-sim");
        assert!(v["createdAt"].is_string());
    }
}
