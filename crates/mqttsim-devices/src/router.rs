//! Command router.
//!
//! Receives everything on the wildcard command subscription, maps the topic
//! to a device and applies the command through the device's kind. Each
//! device gets its own FIFO lane so its commands are applied in arrival
//! order, while different devices are handled concurrently.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use mqttsim_core::{not_found_err, validation_err, Error, Result};

use crate::context::SimContext;
use crate::kinds::get_kind;
use crate::transport::InboundHandler;

/// Command fields that loosely typed senders often transmit as strings.
const NUMERIC_FIELDS: &[&str] = &[
    "brightness",
    "colorTemp",
    "colorTemperature",
    "position",
    "speed",
    "temperature",
    "humidity",
    "pressure",
    "value",
];

/// Turn numeric strings in known fields into numbers. Other values are left alone.
pub fn coerce_numeric_fields(cmd: &mut Map<String, Value>) {
    for field in NUMERIC_FIELDS {
        let parsed = match cmd.get(*field) {
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .and_then(serde_json::Number::from_f64),
            _ => None,
        };
        if let Some(n) = parsed {
            cmd.insert((*field).to_string(), Value::Number(n));
        }
    }
}

/// Decode a raw command payload into a JSON object.
pub fn parse_payload(payload: &[u8]) -> Result<Map<String, Value>> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(validation_err!("command payload must be a JSON object")),
        Err(e) => Err(validation_err!("command payload is not valid JSON: {}", e)),
    }
}

/// Validate, reduce, persist and publish one command under the device lock.
///
/// `topic_type` is the type segment of the command topic, if the command
/// came in over the transport; it must match the stored device type.
pub(crate) async fn apply_command(
    ctx: &SimContext,
    device_id: &str,
    topic_type: Option<&str>,
    mut cmd: Map<String, Value>,
) -> Result<Value> {
    let (_guard, device) = ctx.lock_device(device_id).await?;
    if let Some(t) = topic_type {
        if t != device.device_type {
            return Err(validation_err!(
                "topic type '{}' does not match device type '{}'",
                t,
                device.device_type
            ));
        }
    }
    let prev = ctx
        .store
        .get_state(device_id)?
        .ok_or_else(|| not_found_err!(device_id))?;

    let kind = get_kind(&device.device_type)?;
    coerce_numeric_fields(&mut cmd);
    kind.validate(&cmd, &device.capabilities)?;
    let next = kind.reduce(&prev, &cmd, &device.capabilities)?;

    if !ctx.store.set_state(device_id, &next)? {
        return Err(not_found_err!(device_id));
    }
    ctx.publish_state(&device, &next);
    ctx.notify_state(&device, &next);
    Ok(next)
}

struct RoutedCommand {
    device_type: String,
    payload: Vec<u8>,
}

type Lanes = DashMap<String, mpsc::UnboundedSender<RoutedCommand>>;

/// [`InboundHandler`] for the wildcard command subscription.
pub struct CommandRouter {
    ctx: Arc<SimContext>,
    lanes: Arc<Lanes>,
}

impl CommandRouter {
    pub(crate) fn new(ctx: Arc<SimContext>) -> Self {
        Self {
            ctx,
            lanes: Arc::new(DashMap::new()),
        }
    }

    /// Number of devices with an active command lane.
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Stop routing to a device. Already queued commands still drain and are
    /// dropped once they find the device gone.
    pub fn close_lane(&self, device_id: &str) {
        self.lanes.remove(device_id);
    }

    fn enqueue(&self, device_type: &str, device_id: &str, payload: &[u8]) {
        let tx = match self.lanes.get(device_id) {
            Some(tx) => tx.clone(),
            None => {
                let Ok(handle) = tokio::runtime::Handle::try_current() else {
                    error!("Command for {} received outside a tokio runtime", device_id);
                    return;
                };
                self.lanes
                    .entry(device_id.to_string())
                    .or_insert_with(|| {
                        let (tx, rx) = mpsc::unbounded_channel();
                        handle.spawn(run_lane(
                            self.ctx.clone(),
                            self.lanes.clone(),
                            device_id.to_string(),
                            rx,
                        ));
                        tx
                    })
                    .clone()
            }
        };

        let cmd = RoutedCommand {
            device_type: device_type.to_string(),
            payload: payload.to_vec(),
        };
        if tx.send(cmd).is_err() {
            debug!(device_id = %device_id, "Command lane closed, dropping command");
        }
    }
}

impl InboundHandler for CommandRouter {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        let Some((device_type, device_id)) = self.ctx.topics.parse_command(topic) else {
            debug!("Ignoring non-command topic {}", topic);
            return;
        };

        match self.ctx.store.find_one(device_id) {
            Ok(Some(_)) => self.enqueue(device_type, device_id, payload),
            Ok(None) => debug!(device_id = %device_id, "Command for unknown device dropped"),
            Err(e) => warn!(device_id = %device_id, "Device lookup failed: {}", e),
        }
    }
}

async fn run_lane(
    ctx: Arc<SimContext>,
    lanes: Arc<Lanes>,
    device_id: String,
    mut rx: mpsc::UnboundedReceiver<RoutedCommand>,
) {
    while let Some(cmd) = rx.recv().await {
        let result = match parse_payload(&cmd.payload) {
            Ok(map) => apply_command(&ctx, &device_id, Some(&cmd.device_type), map).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(_) => {}
            Err(Error::NotFound(_)) => {
                debug!(device_id = %device_id, "Device gone, closing command lane");
                lanes.remove(&device_id);
            }
            Err(e) => warn!(device_id = %device_id, "Command rejected: {}", e),
        }
    }
    debug!(device_id = %device_id, "Command lane stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_numeric_strings() {
        let mut cmd = json!({
            "brightness": "128",
            "colorTemp": " 250 ",
            "position": "half",
            "state": "ON",
            "speed": 2
        })
        .as_object()
        .cloned()
        .unwrap();
        coerce_numeric_fields(&mut cmd);

        assert_eq!(cmd["brightness"], 128.0);
        assert_eq!(cmd["colorTemp"], 250.0);
        assert_eq!(cmd["position"], "half");
        assert_eq!(cmd["state"], "ON");
        assert_eq!(cmd["speed"], 2);
    }

    #[test]
    fn test_parse_payload() {
        assert!(parse_payload(br#"{"state":"ON"}"#).is_ok());
        assert!(matches!(
            parse_payload(b"[1,2]"),
            Err(Error::ValidationFailed(_))
        ));
        assert!(matches!(
            parse_payload(b"ON"),
            Err(Error::ValidationFailed(_))
        ));
    }
}
