//! Shared collaborators of the router, scheduler and lifecycle manager.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::OwnedMutexGuard;

use mqttsim_core::{not_found_err, Result, SharedEventBus, SimEvent};
use mqttsim_storage::{Device, SharedDeviceStore};

use crate::discovery::DiscoveryPayload;
use crate::locks::DeviceLocks;
use crate::topics::Topics;
use crate::transport::{Payload, PublishOptions, SharedTransport};

/// A device record together with its current simulated state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceWithState {
    #[serde(flatten)]
    pub device: Device,
    pub state: Value,
}

impl DeviceWithState {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

pub(crate) struct SimContext {
    pub store: SharedDeviceStore,
    pub transport: SharedTransport,
    pub events: SharedEventBus,
    pub locks: DeviceLocks,
    pub topics: Topics,
    pub discovery_enabled: bool,
}

impl SimContext {
    /// Lock `device_id` and load its record. An unknown id leaves no lock entry behind.
    pub async fn lock_device(&self, device_id: &str) -> Result<(OwnedMutexGuard<()>, Device)> {
        let guard = self.locks.lock(device_id).await;
        match self.store.find_one(device_id)? {
            Some(device) => Ok((guard, device)),
            None => {
                drop(guard);
                self.locks.forget(device_id);
                Err(not_found_err!(device_id))
            }
        }
    }

    pub fn publish_state(&self, device: &Device, state: &Value) {
        self.transport.publish(
            &self.topics.state(&device.device_type, &device.id),
            Payload::Json(state.clone()),
            PublishOptions::retained(),
        );
    }

    pub fn publish_status(&self, device: &Device, status: &str) {
        self.transport.publish(
            &self.topics.status(&device.device_type, &device.id),
            Payload::from(status),
            PublishOptions::retained(),
        );
    }

    pub fn publish_birth(&self, device: &Device) {
        self.transport.publish(
            &self.topics.service_birth(),
            Payload::Json(serde_json::json!({
                "deviceId": device.id,
                "type": device.device_type,
            })),
            PublishOptions::transient(),
        );
    }

    /// Publish the retained discovery payload unless discovery is disabled.
    pub fn publish_discovery(&self, device: &Device) {
        if !self.discovery_enabled {
            return;
        }
        let payload = DiscoveryPayload::new(&self.topics, device).to_value();
        self.transport.publish(
            &self.topics.discovery(&device.device_type, &device.id),
            Payload::Json(payload),
            PublishOptions::retained(),
        );
    }

    /// Clear every retained topic of a device at the broker.
    pub fn retract(&self, device: &Device) {
        let (t, id) = (device.device_type.as_str(), device.id.as_str());
        for topic in [
            self.topics.state(t, id),
            self.topics.status(t, id),
            self.topics.discovery(t, id),
        ] {
            self.transport
                .publish(&topic, Payload::Empty, PublishOptions::retained());
        }
    }

    pub fn notify(&self, event: SimEvent) {
        self.events.publish(event);
    }

    pub fn notify_state(&self, device: &Device, state: &Value) {
        self.notify(SimEvent::state_changed(
            device.id.clone(),
            device.device_type.clone(),
            state.clone(),
        ));
    }
}
