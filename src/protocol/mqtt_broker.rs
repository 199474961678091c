// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT broker connection backed by `rumqttc`.
//!
//! The connection is shared by every bridge that synchronizes state over it.
//! Its event loop keeps polling after connection errors, which makes
//! `rumqttc` reconnect; every successful (re)connection fires the registered
//! connect hooks so bridges can re-subscribe and re-publish.
//!
//! # Examples
//!
//! ```no_run
//! use statebridge::protocol::{BrokerClient, MqttBroker};
//!
//! # async fn example() -> Result<(), statebridge::error::ProtocolError> {
//! let broker = MqttBroker::builder()
//!     .host("192.168.1.50")
//!     .port(1883)
//!     .credentials("user", "password")
//!     .build()
//!     .await?;
//!
//! if broker.is_connected() {
//!     println!("Connected to MQTT broker");
//! }
//!
//! broker.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rumqttc::{AsyncClient, EventLoop, MqttOptions};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::ProtocolError;

use super::{BrokerClient, ConnectHook, HookId, HookRegistry, InboundMessage, MessageHook, QoS};

/// Global counter for generating unique client IDs.
static BROKER_CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Configuration for an MQTT broker connection.
#[derive(Debug, Clone)]
pub struct MqttBrokerConfig {
    host: String,
    port: u16,
    client_id: Option<String>,
    credentials: Option<(String, String)>,
    keep_alive: Duration,
    connection_timeout: Duration,
    reconnect_delay: Duration,
    request_capacity: usize,
}

impl Default for MqttBrokerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1883,
            client_id: None,
            credentials: None,
            keep_alive: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            request_capacity: 64,
        }
    }
}

impl MqttBrokerConfig {
    /// Returns the broker host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the broker port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the delay between reconnection attempts.
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }
}

/// A shared MQTT broker connection.
///
/// `MqttBroker` is cheaply cloneable (via `Arc`). All [`BrokerClient`]
/// requests are queued without waiting, so they may be issued from hooks
/// running on the connection's own event loop.
#[derive(Clone)]
pub struct MqttBroker {
    inner: Arc<MqttBrokerInner>,
}

struct MqttBrokerInner {
    client: AsyncClient,
    config: MqttBrokerConfig,
    connected: AtomicBool,
    shutting_down: AtomicBool,
    hooks: HookRegistry,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBroker {
    /// Creates a new builder for configuring an MQTT broker connection.
    #[must_use]
    pub fn builder() -> MqttBrokerBuilder {
        MqttBrokerBuilder::default()
    }

    /// Returns the host address of the broker.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.inner.config.host
    }

    /// Returns the port of the broker.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.config.port
    }

    /// Returns whether authentication is configured.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.inner.config.credentials.is_some()
    }

    /// Disconnects from the broker and stops reconnecting.
    ///
    /// # Errors
    ///
    /// Returns error if the disconnect request cannot be sent.
    pub async fn disconnect(&self) -> Result<(), ProtocolError> {
        tracing::info!(
            host = %self.inner.config.host,
            port = %self.inner.config.port,
            "Disconnecting from MQTT broker"
        );

        self.inner.shutting_down.store(true, Ordering::Release);
        let result = self
            .inner
            .client
            .disconnect()
            .await
            .map_err(ProtocolError::Mqtt);
        self.inner.connected.store(false, Ordering::Release);
        result
    }

    fn handle_connack(&self) {
        self.inner.connected.store(true, Ordering::Release);
        self.inner.hooks.dispatch_connect();
    }

    fn handle_publish(&self, publish: &rumqttc::Publish) {
        tracing::debug!(
            topic = %publish.topic,
            bytes = publish.payload.len(),
            "MQTT message received"
        );
        let message = InboundMessage {
            topic: &publish.topic,
            payload: &publish.payload,
            retain: publish.retain,
            qos: publish.qos.into(),
            dup: publish.dup,
        };
        self.inner.hooks.dispatch_message(&message);
    }

    fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }
}

impl BrokerClient for MqttBroker {
    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), ProtocolError> {
        self.inner
            .client
            .try_publish(topic, qos.into(), retain, payload)
            .map_err(ProtocolError::Mqtt)
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ProtocolError> {
        self.inner
            .client
            .try_subscribe(topic, qos.into())
            .map_err(ProtocolError::Mqtt)
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), ProtocolError> {
        self.inner
            .client
            .try_unsubscribe(topic)
            .map_err(ProtocolError::Mqtt)
    }

    fn on_connect(&self, hook: ConnectHook) -> HookId {
        self.inner.hooks.add_connect(hook)
    }

    fn on_message(&self, hook: MessageHook) -> HookId {
        self.inner.hooks.add_message(hook)
    }

    fn remove_hook(&self, id: HookId) -> bool {
        self.inner.hooks.remove(id)
    }
}

impl std::fmt::Debug for MqttBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttBroker")
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Drop for MqttBrokerInner {
    fn drop(&mut self) {
        if let Some(task) = self.event_task.get_mut().take() {
            task.abort();
        }
    }
}

/// Builder for creating an MQTT broker connection.
///
/// # Examples
///
/// ```no_run
/// use statebridge::protocol::MqttBroker;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), statebridge::error::ProtocolError> {
/// let broker = MqttBroker::builder()
///     .host("192.168.1.50")
///     .port(1883)
///     .client_id("light-controller")
///     .credentials("user", "password")
///     .keep_alive(Duration::from_secs(60))
///     .reconnect_delay(Duration::from_secs(2))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MqttBrokerBuilder {
    config: MqttBrokerConfig,
}

impl MqttBrokerBuilder {
    /// Sets the broker host address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets the MQTT client identifier (default: generated).
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = Some(client_id.into());
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the keep-alive interval (default: 30 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.config.keep_alive = duration;
        self
    }

    /// Sets the timeout for the initial connection (default: 10 seconds).
    #[must_use]
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.config.connection_timeout = duration;
        self
    }

    /// Sets the delay between reconnection attempts (default: 5 seconds).
    #[must_use]
    pub fn reconnect_delay(mut self, duration: Duration) -> Self {
        self.config.reconnect_delay = duration;
        self
    }

    /// Sets how many requests may be queued for the event loop (default: 64).
    #[must_use]
    pub fn request_capacity(mut self, capacity: usize) -> Self {
        self.config.request_capacity = capacity.max(1);
        self
    }

    /// Builds and connects to the MQTT broker.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Host is not set
    /// - Connection fails
    /// - No `ConnAck` arrives within the connection timeout
    ///   ([`ProtocolError::Timeout`])
    pub async fn build(self) -> Result<MqttBroker, ProtocolError> {
        if self.config.host.is_empty() {
            return Err(ProtocolError::InvalidAddress(
                "MQTT broker host is required".to_string(),
            ));
        }

        let client_id = self.config.client_id.clone().unwrap_or_else(|| {
            let counter = BROKER_CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
            format!("statebridge_{}_{}", std::process::id(), counter)
        });

        let mut mqtt_options = MqttOptions::new(&client_id, &self.config.host, self.config.port);
        mqtt_options.set_keep_alive(self.config.keep_alive);
        mqtt_options.set_clean_session(true);

        if let Some((ref username, ref password)) = self.config.credentials {
            mqtt_options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(mqtt_options, self.config.request_capacity);

        let broker = MqttBroker {
            inner: Arc::new(MqttBrokerInner {
                client,
                config: self.config.clone(),
                connected: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                hooks: HookRegistry::new(),
                event_task: Mutex::new(None),
            }),
        };

        let (connack_tx, connack_rx) = oneshot::channel();

        // The task only holds a weak reference so dropping the last broker
        // handle ends the connection.
        let weak = Arc::downgrade(&broker.inner);
        let reconnect_delay = self.config.reconnect_delay;
        let task = tokio::spawn(async move {
            handle_broker_events(event_loop, weak, reconnect_delay, connack_tx).await;
        });
        *broker.inner.event_task.lock() = Some(task);

        let timeout = self.config.connection_timeout;
        match tokio::time::timeout(timeout, connack_rx).await {
            Ok(Ok(())) => {
                tracing::info!(
                    host = %self.config.host,
                    port = %self.config.port,
                    client_id = %client_id,
                    "Connected to MQTT broker"
                );
                Ok(broker)
            }
            Ok(Err(_)) => Err(ProtocolError::ConnectionFailed(
                "MQTT event loop terminated unexpectedly".to_string(),
            )),
            Err(_) => Err(ProtocolError::Timeout(
                u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }
}

/// Drives the `rumqttc` event loop until the broker is dropped or disconnected.
async fn handle_broker_events(
    mut event_loop: EventLoop,
    weak: std::sync::Weak<MqttBrokerInner>,
    reconnect_delay: Duration,
    connack_tx: oneshot::Sender<()>,
) {
    use rumqttc::{Event, Packet};

    let mut connack_tx = Some(connack_tx);

    loop {
        let event = event_loop.poll().await;
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let broker = MqttBroker { inner };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT broker connected");
                broker.handle_connack();
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(());
                }
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                tracing::debug!(?suback, "MQTT subscription acknowledged");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                broker.handle_publish(&publish);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::info!("MQTT broker sent disconnect");
                broker.inner.connected.store(false, Ordering::Release);
            }
            Ok(_) => {}
            Err(e) => {
                broker.inner.connected.store(false, Ordering::Release);
                if broker.is_shutting_down() {
                    tracing::debug!("MQTT event loop stopped after disconnect");
                    break;
                }
                tracing::error!(
                    error = %e,
                    retry_in_ms = reconnect_delay.as_millis(),
                    "MQTT broker event loop error"
                );
                drop(broker);
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}
