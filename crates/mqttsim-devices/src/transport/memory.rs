//! In-process transport that records publishes instead of sending them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{topic_matches, InboundHandler, Payload, PublishOptions, Transport};

/// One recorded publish.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Payload,
    pub retain: bool,
    pub qos: Option<u8>,
}

/// [`Transport`] backed by memory, for tests and offline tooling.
pub struct MemoryTransport {
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<(String, Arc<dyn InboundHandler>)>>,
    connected: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        }
    }

    /// Everything published so far, in order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.published.lock().clear();
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Deliver an inbound message to every matching subscription.
    pub fn inject(&self, topic: &str, payload: &[u8]) {
        let handlers: Vec<_> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|(pattern, _)| topic_matches(pattern, topic))
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            handler.on_message(topic, payload);
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    fn publish(&self, topic: &str, payload: Payload, opts: PublishOptions) {
        self.published.lock().push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            retain: opts.retain,
            qos: opts.qos,
        });
    }

    fn subscribe_wildcard(&self, pattern: &str, handler: Arc<dyn InboundHandler>) {
        let mut subs = self.subscriptions.lock();
        match subs.iter_mut().find(|(p, _)| p == pattern) {
            Some(entry) => entry.1 = handler,
            None => subs.push((pattern.to_string(), handler)),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(Mutex<Vec<String>>);

    impl InboundHandler for Recorder {
        fn on_message(&self, topic: &str, _payload: &[u8]) {
            self.0.lock().push(topic.to_string());
        }
    }

    #[test]
    fn test_inject_routes_matching_topics() {
        let transport = MemoryTransport::new();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        transport.subscribe_wildcard("sim/+/+/set", recorder.clone());
        transport.subscribe_wildcard("sim/+/+/set", recorder.clone());
        assert_eq!(transport.subscription_count(), 1);

        transport.inject("sim/light/a/set", b"{}");
        transport.inject("sim/light/a/state", b"{}");
        assert_eq!(*recorder.0.lock(), vec!["sim/light/a/set".to_string()]);
    }

    #[test]
    fn test_records_publishes() {
        let transport = MemoryTransport::new();
        transport.publish("sim/service/status", "online".into(), PublishOptions::retained());
        let msgs = transport.published_to("sim/service/status");
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].retain);
        assert_eq!(msgs[0].payload, Payload::Text("online".into()));
    }
}
