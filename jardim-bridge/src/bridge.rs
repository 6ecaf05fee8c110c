use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    BridgeError, ConnectStatus, Delivery, Handler, HandlerId, Message, Payload, Registry,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    /// Prefix of the per-launch client id.
    pub client_prefix: String,
    pub keep_alive_secs: u64,
    /// How long `connect` waits for the first acknowledgement.
    pub connect_timeout_ms: u64,
    /// Pause between reconnection attempts.
    pub reconnect_delay_ms: u64,
    /// Outbound request queue size.
    pub capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 1883,
            client_prefix: "jardim".to_owned(),
            keep_alive_secs: 30,
            connect_timeout_ms: 4000,
            reconnect_delay_ms: 1000,
            capacity: 64,
        }
    }
}

impl BridgeConfig {
    /// A fresh client id: the prefix and six random hex digits.
    pub fn client_id(&self) -> String {
        let suffix: u32 = rand::rng().random_range(0..0x100_0000);
        format!("{}_{suffix:06x}", self.client_prefix)
    }
}

/// The request half of a broker client.
#[async_trait]
pub trait BrokerClient: Send + Sync + 'static {
    async fn subscribe(&self, topic: &str) -> Result<(), BridgeError>;
    /// Queue a subscription without waiting for room in the request queue.
    fn try_subscribe(&self, topic: &str) -> Result<(), BridgeError>;
    async fn unsubscribe(&self, topic: &str) -> Result<(), BridgeError>;
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError>;
    async fn disconnect(&self) -> Result<(), BridgeError>;
}

#[async_trait]
impl BrokerClient for AsyncClient {
    async fn subscribe(&self, topic: &str) -> Result<(), BridgeError> {
        AsyncClient::subscribe(self, topic, QoS::AtMostOnce)
            .await
            .map_err(|e| BridgeError::Client(e.to_string()))
    }

    fn try_subscribe(&self, topic: &str) -> Result<(), BridgeError> {
        AsyncClient::try_subscribe(self, topic, QoS::AtMostOnce)
            .map_err(|e| BridgeError::Client(e.to_string()))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BridgeError> {
        AsyncClient::unsubscribe(self, topic)
            .await
            .map_err(|e| BridgeError::Client(e.to_string()))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        AsyncClient::publish(self, topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| BridgeError::Client(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), BridgeError> {
        AsyncClient::disconnect(self)
            .await
            .map_err(|e| BridgeError::Client(e.to_string()))
    }
}

/// What the event loop observed, reduced to what the bridge reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BrokerEvent {
    Connected,
    Message(Message),
    Disconnected,
}

/// Running event loop and the token that stops it.
struct EventLoopTask {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Shared broker connection.
///
/// Construct once, wrap in `Arc` and hand clones to whoever needs to
/// publish or listen. Subscriptions are kept as a desired set and replayed on
/// every reconnection.
pub struct Bridge {
    config: BridgeConfig,
    client: OnceLock<Arc<dyn BrokerClient>>,
    started: AtomicBool,
    task: Mutex<Option<EventLoopTask>>,
    connected: watch::Sender<bool>,
    /// Also guards flips of `connected` to true, so a topic is either
    /// subscribed directly or replayed, never both.
    desired: Mutex<BTreeSet<String>>,
    registry: Registry,
    default_handler: Mutex<Option<HandlerId>>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Arc<Self> {
        let (connected, _) = watch::channel(false);
        Arc::new(Self {
            config,
            client: OnceLock::new(),
            started: AtomicBool::new(false),
            task: Mutex::new(None),
            connected,
            desired: Mutex::new(BTreeSet::new()),
            registry: Registry::default(),
            default_handler: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Open the broker connection.
    ///
    /// Spawns the event loop and waits up to `connect_timeout_ms` for the
    /// first acknowledgement. The loop keeps reconnecting after that, so a
    /// [`ConnectStatus::Pending`] result is not a failure. Calling this again
    /// does nothing.
    pub async fn connect(self: &Arc<Self>, cancel: CancellationToken) -> ConnectStatus {
        if self.started.swap(true, Ordering::AcqRel) {
            debug!("Bridge already started");
            return self.status();
        }

        let client_id = self.config.client_id();
        let mut options = MqttOptions::new(&client_id, &self.config.host, self.config.port);
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, self.config.capacity);
        if self.client.set(Arc::new(client)).is_err() {
            warn!("Broker client already attached");
        }

        info!(
            client_id = %client_id,
            host = %self.config.host,
            port = self.config.port,
            "Connecting to broker"
        );

        let stop = cancel.child_token();
        let handle = tokio::spawn(run_event_loop(Arc::clone(self), eventloop, stop.clone()));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(EventLoopTask { stop, handle });

        let mut connected = self.connected.subscribe();
        let wait = tokio::time::timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            connected.wait_for(|c| *c),
        );

        tokio::select! {
            _ = cancel.cancelled() => ConnectStatus::Pending,
            result = wait => match result {
                Ok(Ok(_)) => ConnectStatus::Connected,
                _ => {
                    warn!(
                        timeout_ms = self.config.connect_timeout_ms,
                        "Broker not reachable yet, retrying in background"
                    );
                    ConnectStatus::Pending
                }
            },
        }
    }

    /// Close the broker connection gracefully.
    ///
    /// Requests already handed to the client are flushed before the
    /// DISCONNECT goes out, and this returns once the event loop has ended.
    /// Does nothing if the bridge was never connected.
    pub async fn shutdown(&self) {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(task) = task else {
            return;
        };

        task.stop.cancel();
        if let Err(e) = task.handle.await {
            error!(error = %e, "Broker event loop ended abnormally");
        }
    }

    /// Record `topic` as wanted and subscribe now if possible.
    pub async fn subscribe(&self, topic: &str) -> Delivery {
        let (added, client) = {
            let mut desired = self.desired();
            (desired.insert(topic.to_owned()), self.live_client())
        };
        if !added {
            debug!(topic, "Already subscribed");
        }

        match client {
            Some(client) => match client.subscribe(topic).await {
                Ok(()) => {
                    info!(topic, "Subscribed");
                    Delivery::Sent
                }
                Err(e) => {
                    warn!(topic, error = %e, "Subscribe failed, retrying on reconnect");
                    Delivery::Deferred
                }
            },
            None => {
                info!(topic, "Not connected, subscription deferred");
                Delivery::Deferred
            }
        }
    }

    /// Forget `topic` and unsubscribe now if possible.
    pub async fn unsubscribe(&self, topic: &str) -> Delivery {
        self.desired().remove(topic);

        match self.live_client() {
            Some(client) => match client.unsubscribe(topic).await {
                Ok(()) => {
                    info!(topic, "Unsubscribed");
                    Delivery::Sent
                }
                Err(e) => {
                    warn!(topic, error = %e, "Unsubscribe failed");
                    Delivery::Dropped(e)
                }
            },
            None => {
                debug!(topic, "Not connected, unsubscription deferred");
                Delivery::Deferred
            }
        }
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.desired().iter().cloned().collect()
    }

    /// Publish `payload` on `topic`. Dropped with a warning while disconnected.
    pub async fn publish(&self, topic: &str, payload: impl Into<Payload>) -> Delivery {
        let Some(client) = self.live_client() else {
            warn!(topic, "Not connected, message dropped");
            return Delivery::Dropped(BridgeError::TransportUnavailable);
        };

        match client.publish(topic, payload.into().into_bytes()).await {
            Ok(()) => {
                debug!(topic, "Published");
                Delivery::Sent
            }
            Err(e) => {
                error!(topic, error = %e, "Publish failed");
                Delivery::Dropped(e)
            }
        }
    }

    pub fn add_handler<F>(&self, filter: &str, handler: F) -> HandlerId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let id = self.registry.insert(filter, Arc::new(handler));
        debug!(filter, handler = %id, "Handler added");
        id
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.registry.remove(id)
    }

    /// Receive messages matching `filter` on a bounded channel.
    pub fn channel(&self, filter: &str, capacity: usize) -> (HandlerId, mpsc::Receiver<Message>) {
        self.registry.channel(filter, capacity)
    }

    /// Install the catch-all handler, replacing the previous one.
    pub fn set_message_handler<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        let id = self.registry.insert("#", handler);
        let previous = self
            .default_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(id);

        if let Some(previous) = previous {
            self.registry.remove(previous);
        }
        id
    }

    fn status(&self) -> ConnectStatus {
        if self.is_connected() {
            ConnectStatus::Connected
        } else {
            ConnectStatus::Pending
        }
    }

    fn desired(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.desired.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live_client(&self) -> Option<Arc<dyn BrokerClient>> {
        if self.is_connected() {
            self.client.get().cloned()
        } else {
            None
        }
    }

    #[cfg(test)]
    pub(crate) fn attach(&self, client: Arc<dyn BrokerClient>) {
        assert!(self.client.set(client).is_ok(), "client attached once");
    }

    pub(crate) async fn on_event(self: &Arc<Self>, event: BrokerEvent) {
        match event {
            BrokerEvent::Connected => {
                let topics: Vec<String> = {
                    let desired = self.desired();
                    self.connected.send_replace(true);
                    desired.iter().cloned().collect()
                };

                info!("Broker connected");
                self.replay_subscriptions(&topics);
            }
            BrokerEvent::Message(message) => {
                let handled = self.registry.dispatch(&message);
                if handled == 0 {
                    debug!(topic = %message.topic, "No handler for message");
                }
            }
            BrokerEvent::Disconnected => {
                if self.connected.send_replace(false) {
                    warn!("Broker disconnected");
                }
            }
        }
    }

    /// Re-issue `topics` without blocking the event loop.
    fn replay_subscriptions(&self, topics: &[String]) -> usize {
        let Some(client) = self.client.get() else {
            return 0;
        };

        let mut sent = 0;
        for topic in topics {
            match client.try_subscribe(topic) {
                Ok(()) => sent += 1,
                Err(e) => error!(topic = %topic, error = %e, "Re-subscribe failed"),
            }
        }

        if !topics.is_empty() {
            info!(count = sent, "Subscriptions restored");
        }
        sent
    }
}

#[instrument(name = "broker", skip_all)]
async fn run_event_loop(bridge: Arc<Bridge>, mut eventloop: EventLoop, cancel: CancellationToken) {
    let reconnect_delay = Duration::from_millis(bridge.config.reconnect_delay_ms);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Shutting down broker connection");
                if bridge.is_connected() {
                    drain(&bridge, &mut eventloop).await;
                }
                bridge.on_event(BrokerEvent::Disconnected).await;
                break;
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    bridge.on_event(BrokerEvent::Connected).await;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = Message::from_bytes(publish.topic.clone(), &publish.payload);
                    bridge.on_event(BrokerEvent::Message(message)).await;
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    bridge.on_event(BrokerEvent::Disconnected).await;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Broker connection error");
                    bridge.on_event(BrokerEvent::Disconnected).await;

                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(reconnect_delay) => {}
                    }
                }
            },
        }
    }
}

/// Send DISCONNECT after everything already queued, then poll until it is out.
async fn drain(bridge: &Bridge, eventloop: &mut EventLoop) {
    let Some(client) = bridge.client.get() else {
        return;
    };
    if let Err(e) = client.disconnect().await {
        warn!(error = %e, "Failed to queue disconnect");
        return;
    }

    let flushed = tokio::time::timeout(
        Duration::from_millis(bridge.config.connect_timeout_ms),
        async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "Connection closed while draining");
                        break;
                    }
                }
            }
        },
    )
    .await;

    if flushed.is_err() {
        warn!("Timed out flushing outbound requests");
    }
}
