//! Live-update events emitted by the simulation engine.
//!
//! These are the notifications external consumers (UI push channels and the
//! like) subscribe to. Delivery is best-effort.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event emitted whenever a device or its simulated state changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SimEvent {
    /// A device was created; carries the device record with its initial state.
    DeviceCreated { device: Value, timestamp: i64 },

    /// Name, capabilities, template or telemetry interval changed.
    DeviceUpdated { device: Value, timestamp: i64 },

    /// A device and its state were removed.
    DeviceDeleted {
        device_id: String,
        device_type: String,
        timestamp: i64,
    },

    /// The simulated state was replaced by a command, a tick or an import.
    DeviceStateChanged {
        device_id: String,
        device_type: String,
        state: Value,
        timestamp: i64,
    },
}

impl SimEvent {
    pub fn created(device: Value) -> Self {
        Self::DeviceCreated {
            device,
            timestamp: now(),
        }
    }

    pub fn updated(device: Value) -> Self {
        Self::DeviceUpdated {
            device,
            timestamp: now(),
        }
    }

    pub fn deleted(device_id: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self::DeviceDeleted {
            device_id: device_id.into(),
            device_type: device_type.into(),
            timestamp: now(),
        }
    }

    pub fn state_changed(
        device_id: impl Into<String>,
        device_type: impl Into<String>,
        state: Value,
    ) -> Self {
        Self::DeviceStateChanged {
            device_id: device_id.into(),
            device_type: device_type.into(),
            state,
            timestamp: now(),
        }
    }

    /// Get the event type name as a string.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::DeviceCreated { .. } => "device:created",
            Self::DeviceUpdated { .. } => "device:updated",
            Self::DeviceDeleted { .. } => "device:deleted",
            Self::DeviceStateChanged { .. } => "device:state:changed",
        }
    }

    /// Identifier of the device this event refers to, if known.
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::DeviceCreated { device, .. } | Self::DeviceUpdated { device, .. } => {
                device.get("id").and_then(Value::as_str)
            }
            Self::DeviceDeleted { device_id, .. } | Self::DeviceStateChanged { device_id, .. } => {
                Some(device_id)
            }
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Self::DeviceCreated { timestamp, .. }
            | Self::DeviceUpdated { timestamp, .. }
            | Self::DeviceDeleted { timestamp, .. }
            | Self::DeviceStateChanged { timestamp, .. } => *timestamp,
        }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Metadata attached to every published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event ID
    pub event_id: String,
    /// Event source (component that published)
    pub source: String,
    /// Publish timestamp
    pub timestamp: i64,
}

impl EventMetadata {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            timestamp: now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_device_id_lookup() {
        let created = SimEvent::created(json!({"id": "d1", "type": "light"}));
        assert_eq!(created.device_id(), Some("d1"));
        assert_eq!(created.type_name(), "device:created");

        let deleted = SimEvent::deleted("d2", "fan");
        assert_eq!(deleted.device_id(), Some("d2"));
    }

    #[test]
    fn test_serialized_tag() {
        let ev = SimEvent::state_changed("d1", "switch", json!({"state": "ON"}));
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "device_state_changed");
        assert_eq!(v["state"]["state"], "ON");
    }
}
