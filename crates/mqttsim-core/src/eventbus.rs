//! Event bus used to fan live updates out to external consumers.
//!
//! Publishing never blocks: events go into a broadcast channel and slow
//! subscribers lose the oldest entries instead of stalling the engine.

use crate::event::{EventMetadata, SimEvent};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Broadcast event bus for [`SimEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<(SimEvent, EventMetadata)>,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with the specified capacity.
    ///
    /// The capacity determines how many events are buffered for slow subscribers.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Get the number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event from the given source.
    ///
    /// Returns `true` if there was at least one subscriber. Events published
    /// without subscribers are discarded.
    pub fn publish_from(&self, event: SimEvent, source: &str) -> bool {
        self.tx.send((event, EventMetadata::new(source))).is_ok()
    }

    /// Publish an event with the default `engine` source.
    pub fn publish(&self, event: SimEvent) -> bool {
        self.publish_from(event, "engine")
    }

    /// Subscribe to all events.
    pub fn subscribe(&self) -> EventBusReceiver {
        EventBusReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Subscribe to events concerning a single device.
    pub fn subscribe_device(&self, device_id: impl Into<String>) -> DeviceReceiver {
        DeviceReceiver {
            rx: self.tx.subscribe(),
            device_id: device_id.into(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared event bus handle.
pub type SharedEventBus = Arc<EventBus>;

/// Receiver for all events from the event bus.
pub struct EventBusReceiver {
    rx: broadcast::Receiver<(SimEvent, EventMetadata)>,
}

impl EventBusReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` once the bus is closed. Lagged receivers skip the
    /// overwritten events and continue with the oldest retained one.
    pub async fn recv(&mut self) -> Option<(SimEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("event subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<(SimEvent, EventMetadata)> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<SimEvent> {
        let mut events = Vec::new();
        while let Some((event, _)) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Receiver that only yields events for one device.
pub struct DeviceReceiver {
    rx: broadcast::Receiver<(SimEvent, EventMetadata)>,
    device_id: String,
}

impl DeviceReceiver {
    pub async fn recv(&mut self) -> Option<SimEvent> {
        loop {
            match self.rx.recv().await {
                Ok((event, _)) => {
                    if event.device_id() == Some(self.device_id.as_str()) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
