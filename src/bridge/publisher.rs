// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Publish side of the state bridge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::error::BridgeError;
use crate::protocol::{BrokerClient, HookId, QoS, connect_hook};
use crate::state::{HandlerId, StateReader, StatefulService};

use super::{
    BrokerConnector, DEFAULT_BUFFER_SIZE, MQTT_ORIGIN_ID, MqttSubscriber, PublishOutcome,
    SkipReason, TopicCell,
};

/// Publishes the serialized state to an MQTT topic.
///
/// A publication happens on every committed update, when the broker
/// (re)connects, and when the topic or retain flag is changed. Each
/// publication carries the whole state, at QoS 0. An empty topic or a
/// disconnected broker silently skips the publication.
///
/// Commits tagged [`MQTT_ORIGIN_ID`] are not published back: an unpaired
/// publisher skips all of them, a publisher paired through
/// [`suppress_echo_from`](Self::suppress_echo_from) only those arriving on
/// its own topic.
///
/// Dropping the last handle unregisters the store handler and broker hook.
pub struct MqttPublisher<T> {
    inner: Arc<PublisherInner<T>>,
}

pub(super) struct PublisherInner<T> {
    store: Arc<StatefulService<T>>,
    broker: Arc<dyn BrokerClient>,
    reader: Arc<dyn StateReader<T>>,
    topic: RwLock<String>,
    retain: AtomicBool,
    buffer_size: usize,
    echo_source: RwLock<Option<TopicCell>>,
    handler_id: HandlerId,
    connect_hook: Option<HookId>,
}

impl<T: Send + Sync + 'static> MqttPublisher<T> {
    /// Starts building a publisher that serializes state with `reader`.
    pub fn builder<R>(reader: R) -> MqttPublisherBuilder<T>
    where
        R: StateReader<T> + 'static,
    {
        MqttPublisherBuilder {
            reader: Arc::new(reader),
            topic: String::new(),
            retain: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Publishes the current state now.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::SerializationOverflow`] if the payload exceeds
    /// the buffer size, or the broker's error if the publish cannot be queued.
    pub fn publish(&self) -> Result<PublishOutcome, BridgeError> {
        self.inner.publish()
    }

    /// Publishes the current state in reaction to a commit made by `origin`.
    ///
    /// This is what the store handler runs on every commit. Echoes are
    /// reported as [`SkipReason::Echo`].
    ///
    /// # Errors
    ///
    /// Same as [`publish`](Self::publish).
    pub fn publish_for(&self, origin: &str) -> Result<PublishOutcome, BridgeError> {
        self.inner.publish_for(origin)
    }

    /// Changes the retain flag and re-publishes.
    pub fn set_retain(&self, retain: bool) {
        self.inner.retain.store(retain, Ordering::Release);
        self.inner.publish_logged();
    }

    /// Changes the publish topic and re-publishes.
    ///
    /// An empty topic disables publication.
    pub fn set_topic(&self, topic: impl Into<String>) {
        *self.inner.topic.write() = topic.into();
        self.inner.publish_logged();
    }

    /// Pairs the publisher with `subscriber`.
    ///
    /// Commits made by the subscriber are then skipped only while both use
    /// the same topic; on different topics inbound state is re-published.
    pub fn suppress_echo_from(&self, subscriber: &MqttSubscriber<T>) {
        *self.inner.echo_source.write() = Some(subscriber.topic_cell());
    }

    /// Returns the current publish topic.
    #[must_use]
    pub fn topic(&self) -> String {
        self.inner.topic.read().clone()
    }

    /// Returns the current retain flag.
    #[must_use]
    pub fn retain(&self) -> bool {
        self.inner.retain.load(Ordering::Acquire)
    }

    /// Returns the serialization budget in bytes.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Returns the broker this publisher sends to.
    #[must_use]
    pub fn broker(&self) -> &Arc<dyn BrokerClient> {
        &self.inner.broker
    }

    pub(super) fn downgrade(&self) -> Weak<PublisherInner<T>> {
        Arc::downgrade(&self.inner)
    }
}

impl<T: Send + Sync + 'static> BrokerConnector for MqttPublisher<T> {
    fn on_connect(&self) {
        self.inner.on_connect();
    }
}

impl<T> Clone for MqttPublisher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for MqttPublisher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttPublisher")
            .field("topic", &*self.inner.topic.read())
            .field("retain", &self.inner.retain.load(Ordering::Relaxed))
            .field("buffer_size", &self.inner.buffer_size)
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> PublisherInner<T> {
    pub(super) fn on_connect(&self) {
        self.publish_logged();
    }

    fn on_state_update(&self, origin: &str) {
        if let Err(e) = self.publish_for(origin) {
            tracing::warn!(
                topic = %self.topic.read(),
                origin,
                error = %e,
                "Dropping state publication"
            );
        }
    }

    fn publish_for(&self, origin: &str) -> Result<PublishOutcome, BridgeError> {
        if origin == MQTT_ORIGIN_ID && self.is_echo() {
            tracing::trace!(
                topic = %self.topic.read(),
                "Skipping publish of state received from MQTT"
            );
            return Ok(PublishOutcome::Skipped(SkipReason::Echo));
        }
        self.publish()
    }

    // Unpaired, the source topic of an inbound commit is unknown.
    fn is_echo(&self) -> bool {
        let echo_source = self.echo_source.read();
        let Some(sub_topic) = echo_source.as_ref() else {
            return true;
        };
        let topic = self.topic.read();
        !topic.is_empty() && *topic == *sub_topic.read()
    }

    fn publish(&self) -> Result<PublishOutcome, BridgeError> {
        let topic = self.topic.read().clone();
        if topic.is_empty() {
            tracing::trace!("Publish skipped: no topic configured");
            return Ok(PublishOutcome::Skipped(SkipReason::NoTopic));
        }
        if !self.broker.is_connected() {
            tracing::trace!(topic = %topic, "Publish skipped: broker not connected");
            return Ok(PublishOutcome::Skipped(SkipReason::Disconnected));
        }

        let doc = self.store.read(self.reader.as_ref());
        let payload = serde_json::to_vec(&doc)?;
        if payload.len() > self.buffer_size {
            return Err(BridgeError::SerializationOverflow {
                size: payload.len(),
                limit: self.buffer_size,
            });
        }

        let retain = self.retain.load(Ordering::Acquire);
        let bytes = payload.len();
        self.broker.publish(&topic, QoS::AtMostOnce, retain, payload)?;
        tracing::debug!(topic = %topic, retain, bytes, "Published state");
        Ok(PublishOutcome::Published)
    }

    fn publish_logged(&self) {
        if let Err(e) = self.publish() {
            tracing::warn!(
                topic = %self.topic.read(),
                error = %e,
                "Dropping state publication"
            );
        }
    }
}

impl<T> Drop for PublisherInner<T> {
    fn drop(&mut self) {
        self.store.remove_update_handler(self.handler_id);
        if let Some(id) = self.connect_hook {
            self.broker.remove_hook(id);
        }
    }
}

/// Builder for [`MqttPublisher`].
pub struct MqttPublisherBuilder<T> {
    reader: Arc<dyn StateReader<T>>,
    topic: String,
    retain: bool,
    buffer_size: usize,
}

impl<T: Send + Sync + 'static> MqttPublisherBuilder<T> {
    /// Sets the publish topic (default: empty, publication disabled).
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Sets the retain flag (default: `false`).
    #[must_use]
    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    /// Sets the serialization budget (default: [`DEFAULT_BUFFER_SIZE`]).
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Attaches the publisher to `store` and `broker`.
    ///
    /// If the broker is already connected the current state is published
    /// right away.
    pub fn build(
        self,
        store: Arc<StatefulService<T>>,
        broker: Arc<dyn BrokerClient>,
    ) -> MqttPublisher<T> {
        let publisher = self.attach(store, broker, true);
        if publisher.inner.broker.is_connected() {
            publisher.inner.on_connect();
        }
        publisher
    }

    /// Attaches without registering a connect hook; the owner forwards
    /// connect events itself.
    pub(super) fn attach(
        self,
        store: Arc<StatefulService<T>>,
        broker: Arc<dyn BrokerClient>,
        own_connect_hook: bool,
    ) -> MqttPublisher<T> {
        let inner = Arc::new_cyclic(|weak: &Weak<PublisherInner<T>>| {
            let on_update = weak.clone();
            let handler_id = store.add_update_handler(
                move |origin| {
                    if let Some(inner) = on_update.upgrade() {
                        inner.on_state_update(origin);
                    }
                },
                false,
            );

            let connect_hook = own_connect_hook.then(|| {
                let on_connect = weak.clone();
                broker.on_connect(connect_hook(move || {
                    if let Some(inner) = on_connect.upgrade() {
                        inner.on_connect();
                    }
                }))
            });

            PublisherInner {
                store,
                broker,
                reader: self.reader,
                topic: RwLock::new(self.topic),
                retain: AtomicBool::new(self.retain),
                buffer_size: self.buffer_size,
                echo_source: RwLock::new(None),
                handler_id,
                connect_hook,
            }
        });
        MqttPublisher { inner }
    }
}
