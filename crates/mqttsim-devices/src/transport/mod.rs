//! Transport adapter.
//!
//! The engine talks to the broker only through [`Transport`]. Publishing and
//! subscribing are fire-and-forget: delivery, acknowledgement and
//! reconnection are the adapter's concern.

mod memory;
mod mqtt;

pub use memory::{MemoryTransport, PublishedMessage};
pub use mqtt::MqttTransport;

use std::sync::Arc;

use serde_json::Value;

/// Message body handed to [`Transport::publish`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Json(Value),
    /// Zero-length body. Published retained, it clears the broker's retained message.
    Empty,
}

impl Payload {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Payload::Text(s) => s.as_bytes().to_vec(),
            // Serializing a Value cannot fail.
            Payload::Json(v) => serde_json::to_vec(v).unwrap_or_default(),
            Payload::Empty => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        Payload::Json(v)
    }
}

/// Per-publish flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishOptions {
    pub retain: bool,
    /// Overrides the adapter's configured QoS.
    pub qos: Option<u8>,
}

impl PublishOptions {
    pub fn retained() -> Self {
        Self {
            retain: true,
            qos: None,
        }
    }

    pub fn transient() -> Self {
        Self::default()
    }
}

/// Receiver for inbound messages on a wildcard subscription.
pub trait InboundHandler: Send + Sync {
    fn on_message(&self, topic: &str, payload: &[u8]);
}

/// Broker connection as seen by the engine.
pub trait Transport: Send + Sync {
    fn publish(&self, topic: &str, payload: Payload, opts: PublishOptions);

    /// Subscribe `handler` to `pattern`. Calling it again for an already
    /// subscribed pattern only replaces the handler.
    fn subscribe_wildcard(&self, pattern: &str, handler: Arc<dyn InboundHandler>);

    fn is_connected(&self) -> bool;
}

/// Shared transport handle.
pub type SharedTransport = Arc<dyn Transport>;

/// MQTT topic filter matching with `+` and `#`.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');
    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("sim/+/+/set", "sim/light/abc/set"));
        assert!(!topic_matches("sim/+/+/set", "sim/light/abc/state"));
        assert!(!topic_matches("sim/+/+/set", "sim/light/set"));
        assert!(!topic_matches("sim/+/+/set", "sim/a/b/c/set"));
        assert!(topic_matches("sim/#", "sim/discovery/light/abc"));
    }

    #[test]
    fn test_payload_bytes() {
        assert_eq!(Payload::from("online").to_bytes(), b"online");
        assert_eq!(Payload::Json(json!({"a": 1})).to_bytes(), br#"{"a":1}"#);
        assert!(Payload::Empty.to_bytes().is_empty());
    }
}
