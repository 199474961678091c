// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Publisher and subscriber pair sharing one connect hook.

use std::sync::Arc;

use crate::config::TopicPair;
use crate::protocol::{BrokerClient, HookId, connect_hook};
use crate::state::{StateReader, StateUpdater, StatefulService};

use super::{
    BrokerConnector, DEFAULT_BUFFER_SIZE, MqttPublisher, MqttPublisherBuilder, MqttSubscriber,
    MqttSubscriberBuilder,
};

/// Bidirectional bridge between a store and two MQTT topics.
///
/// Commits are published on the publish topic; JSON objects received on the
/// subscribe topic are committed into the store. Commits that arrived on the
/// subscribe topic are not re-published while both topics are equal.
pub struct MqttPubSub<T> {
    publisher: MqttPublisher<T>,
    subscriber: MqttSubscriber<T>,
    broker: Arc<dyn BrokerClient>,
    connect_hook: HookId,
}

impl<T: Send + Sync + 'static> MqttPubSub<T> {
    /// Starts building a bridge that uses `reader` for outbound state and
    /// `updater` for inbound documents.
    pub fn builder<R, U>(reader: R, updater: U) -> MqttPubSubBuilder<T>
    where
        R: StateReader<T> + 'static,
        U: StateUpdater<T> + 'static,
    {
        MqttPubSubBuilder {
            publisher: MqttPublisher::builder(reader),
            subscriber: MqttSubscriber::builder(updater),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Reconfigures both topics.
    ///
    /// The subscription moves first, then the current state is published on
    /// the new publish topic.
    pub fn configure_topics(&self, pub_topic: impl Into<String>, sub_topic: impl Into<String>) {
        self.subscriber.set_topic(sub_topic);
        self.publisher.set_topic(pub_topic);
    }

    /// Applies persisted topic settings, like
    /// [`configure_topics`](Self::configure_topics).
    pub fn configure(&self, topics: &TopicPair) {
        self.configure_topics(topics.pub_topic.as_str(), topics.sub_topic.as_str());
    }

    /// Returns the current topics in their persisted form.
    #[must_use]
    pub fn topics(&self) -> TopicPair {
        TopicPair::new(self.publisher.topic(), self.subscriber.topic())
    }

    /// Changes the retain flag of outbound publications and re-publishes.
    pub fn set_retain(&self, retain: bool) {
        self.publisher.set_retain(retain);
    }

    /// Returns the publish half.
    #[must_use]
    pub fn publisher(&self) -> &MqttPublisher<T> {
        &self.publisher
    }

    /// Returns the subscribe half.
    #[must_use]
    pub fn subscriber(&self) -> &MqttSubscriber<T> {
        &self.subscriber
    }

    /// Returns the broker both halves are attached to.
    #[must_use]
    pub fn broker(&self) -> &Arc<dyn BrokerClient> {
        &self.broker
    }
}

impl<T: Send + Sync + 'static> BrokerConnector for MqttPubSub<T> {
    fn on_connect(&self) {
        self.subscriber.on_connect();
        self.publisher.on_connect();
    }
}

impl<T> Drop for MqttPubSub<T> {
    fn drop(&mut self) {
        self.broker.remove_hook(self.connect_hook);
    }
}

impl<T> std::fmt::Debug for MqttPubSub<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttPubSub")
            .field("publisher", &self.publisher)
            .field("subscriber", &self.subscriber)
            .finish_non_exhaustive()
    }
}

/// Builder for [`MqttPubSub`].
pub struct MqttPubSubBuilder<T> {
    publisher: MqttPublisherBuilder<T>,
    subscriber: MqttSubscriberBuilder<T>,
    buffer_size: usize,
}

impl<T: Send + Sync + 'static> MqttPubSubBuilder<T> {
    /// Sets the publish topic.
    #[must_use]
    pub fn pub_topic(mut self, topic: impl Into<String>) -> Self {
        self.publisher = self.publisher.topic(topic);
        self
    }

    /// Sets the subscribe topic.
    #[must_use]
    pub fn sub_topic(mut self, topic: impl Into<String>) -> Self {
        self.subscriber = self.subscriber.topic(topic);
        self
    }

    /// Sets the retain flag of outbound publications.
    #[must_use]
    pub fn retain(mut self, retain: bool) -> Self {
        self.publisher = self.publisher.retain(retain);
        self
    }

    /// Sets the buffer size used in both directions.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Attaches both halves to `store` and `broker`.
    pub fn build(
        self,
        store: Arc<StatefulService<T>>,
        broker: Arc<dyn BrokerClient>,
    ) -> MqttPubSub<T> {
        let subscriber = self
            .subscriber
            .buffer_size(self.buffer_size)
            .attach(Arc::clone(&store), Arc::clone(&broker), false);
        let publisher = self
            .publisher
            .buffer_size(self.buffer_size)
            .attach(store, Arc::clone(&broker), false);
        publisher.suppress_echo_from(&subscriber);

        let sub = subscriber.downgrade();
        let publ = publisher.downgrade();
        let connect_hook = broker.on_connect(connect_hook(move || {
            if let Some(subscriber) = sub.upgrade() {
                subscriber.on_connect();
            }
            if let Some(publisher) = publ.upgrade() {
                publisher.on_connect();
            }
        }));

        let bridge = MqttPubSub {
            publisher,
            subscriber,
            broker,
            connect_hook,
        };
        if bridge.broker.is_connected() {
            bridge.on_connect();
        }
        bridge
    }
}
