//! MQTT transport built on rumqttc.
//!
//! One connection per process. The broker holds a retained `offline` last
//! will on `{ns}/service/status`; every (re)connect publishes `online` there
//! and re-asserts the wildcard subscription when the broker lost it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use mqttsim_core::{Error, MqttConfig, Result};

use super::{topic_matches, InboundHandler, Payload, PublishOptions, Transport};
use crate::topics::Topics;

const DEFAULT_PORT: u16 = 1883;
const REQUEST_CHANNEL_CAPACITY: usize = 256;
const MIN_KEEP_ALIVE_SECS: u64 = 5;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

/// Split `mqtt://host:port` (or `tcp://`, or a bare `host[:port]`) into host and port.
pub(crate) fn parse_broker_url(url: &str) -> Result<(String, u16)> {
    let rest = match url.split_once("://") {
        Some(("mqtt" | "tcp", rest)) => rest,
        Some((scheme, _)) => {
            return Err(Error::Config(format!(
                "unsupported broker scheme '{}' in {}",
                scheme, url
            )))
        }
        None => url,
    };
    let rest = rest.trim_end_matches('/');
    // drop credentials embedded in the authority
    let authority = rest.rsplit_once('@').map(|(_, a)| a).unwrap_or(rest);

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| Error::Config(format!("invalid broker port in {}", url)))?;
            (host, port)
        }
        None => (authority, DEFAULT_PORT),
    };
    if host.is_empty() {
        return Err(Error::Config(format!("missing broker host in {}", url)));
    }
    Ok((host.to_string(), port))
}

struct Inner {
    client: AsyncClient,
    qos: QoS,
    service_status: String,
    connected: AtomicBool,
    running: AtomicBool,
    subscribed: AtomicBool,
    subscription: Mutex<Option<(String, Arc<dyn InboundHandler>)>>,
}

impl Inner {
    fn on_connected(&self, session_present: bool) {
        self.connected.store(true, Ordering::SeqCst);
        info!("MQTT connected");

        if let Err(e) =
            self.client
                .try_publish(self.service_status.as_str(), self.qos, true, "online")
        {
            warn!("Failed to publish service status: {}", e);
        }

        if self.subscribed.load(Ordering::SeqCst) && !session_present {
            let pattern = self.subscription.lock().as_ref().map(|(p, _)| p.clone());
            if let Some(pattern) = pattern {
                match self.client.try_subscribe(pattern.as_str(), self.qos) {
                    Ok(()) => debug!("Re-subscribed {}", pattern),
                    Err(e) => warn!("Failed to re-subscribe {}: {}", pattern, e),
                }
            }
        }
    }

    fn dispatch(&self, topic: &str, payload: &[u8]) {
        let handler = self
            .subscription
            .lock()
            .as_ref()
            .filter(|(pattern, _)| topic_matches(pattern, topic))
            .map(|(_, h)| h.clone());
        if let Some(handler) = handler {
            handler.on_message(topic, payload);
        }
    }
}

/// [`Transport`] over a live MQTT broker connection.
pub struct MqttTransport {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    /// Create the client and spawn its event loop. Must be called inside a tokio runtime.
    ///
    /// Returns immediately; the connection is established in the background
    /// and retried every `reconnect_secs` until [`MqttTransport::disconnect`].
    pub fn connect(config: &MqttConfig, topics: &Topics) -> Result<Self> {
        let (host, port) = parse_broker_url(&config.url)?;
        let qos = qos_from_level(config.qos);

        let client_id = format!("mqtt-sim-{}", uuid::Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, host.clone(), port);
        options.set_keep_alive(Duration::from_secs(
            config.keep_alive_secs.max(MIN_KEEP_ALIVE_SECS),
        ));
        options.set_clean_session(true);
        if let Some(user) = &config.username {
            options.set_credentials(user.clone(), config.password.clone().unwrap_or_default());
        }
        options.set_last_will(LastWill::new(
            topics.service_status(),
            "offline",
            qos,
            true,
        ));

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let inner = Arc::new(Inner {
            client,
            qos,
            service_status: topics.service_status(),
            connected: AtomicBool::new(false),
            running: AtomicBool::new(true),
            subscribed: AtomicBool::new(false),
            subscription: Mutex::new(None),
        });

        let reconnect = Duration::from_secs(config.reconnect_secs);
        let task = tokio::spawn(Self::run(inner.clone(), eventloop, reconnect));

        info!("MQTT transport started for {}:{}", host, port);
        Ok(Self {
            inner,
            task: Mutex::new(Some(task)),
        })
    }

    async fn run(inner: Arc<Inner>, mut eventloop: EventLoop, reconnect: Duration) {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    inner.on_connected(ack.session_present);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    inner.dispatch(&publish.topic, &publish.payload);
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    inner.connected.store(false, Ordering::SeqCst);
                    warn!("MQTT broker closed the connection");
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    inner.connected.store(false, Ordering::SeqCst);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    let was_connected = inner.connected.swap(false, Ordering::SeqCst);
                    if !inner.running.load(Ordering::SeqCst) {
                        break;
                    }
                    if was_connected {
                        warn!("MQTT connection lost: {}", e);
                    } else {
                        debug!("MQTT connect failed: {}", e);
                    }
                    tokio::time::sleep(reconnect).await;
                }
            }
        }
        info!("MQTT event loop stopped");
    }

    /// Queue a retained `offline` and a disconnect, then give the event loop
    /// up to [`SHUTDOWN_TIMEOUT`] to flush them.
    ///
    /// Never waits on the request queue, so it returns even when the broker
    /// is unreachable and the queue is full.
    pub async fn disconnect(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Err(e) = self.inner.client.try_publish(
            self.inner.service_status.as_str(),
            self.inner.qos,
            true,
            "offline",
        ) {
            warn!("Failed to queue offline status: {}", e);
        }
        if let Err(e) = self.inner.client.try_disconnect() {
            warn!("Failed to queue MQTT disconnect: {}", e);
        }

        let task = self.task.lock().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await.is_err() {
                warn!("MQTT event loop did not stop within {:?}", SHUTDOWN_TIMEOUT);
                task.abort();
            }
        }
        self.inner.connected.store(false, Ordering::SeqCst);
    }
}

impl Transport for MqttTransport {
    fn publish(&self, topic: &str, payload: Payload, opts: PublishOptions) {
        let qos = opts.qos.map(qos_from_level).unwrap_or(self.inner.qos);
        if let Err(e) = self
            .inner
            .client
            .try_publish(topic, qos, opts.retain, payload.to_bytes())
        {
            warn!(topic = %topic, "MQTT publish dropped: {}", e);
        }
    }

    fn subscribe_wildcard(&self, pattern: &str, handler: Arc<dyn InboundHandler>) {
        let already = {
            let mut sub = self.inner.subscription.lock();
            let already = sub.as_ref().is_some_and(|(p, _)| p == pattern);
            *sub = Some((pattern.to_string(), handler));
            already
        };
        if already && self.inner.subscribed.load(Ordering::SeqCst) {
            return;
        }

        match self.inner.client.try_subscribe(pattern, self.inner.qos) {
            Ok(()) => {
                self.inner.subscribed.store(true, Ordering::SeqCst);
                info!("Subscribed wildcard: {}", pattern);
            }
            Err(e) => error!("Failed to subscribe {}: {}", pattern, e),
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }
}
