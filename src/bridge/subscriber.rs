// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subscribe side of the state bridge.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::BridgeError;
use crate::protocol::{BrokerClient, HookId, InboundMessage, QoS, connect_hook, message_hook};
use crate::state::{Document, StateUpdateResult, StateUpdater, StatefulService};

use super::{BrokerConnector, DEFAULT_BUFFER_SIZE, MQTT_ORIGIN_ID, TopicCell};

/// Commits JSON objects received on an MQTT topic into the store.
///
/// The subscriber holds at most one broker subscription at a time. Topic
/// matching is exact string equality; wildcards are not expanded. Payloads
/// that are larger than the buffer, not valid JSON, or not a JSON object are
/// ignored.
///
/// Dropping the last handle unregisters the broker hooks.
pub struct MqttSubscriber<T> {
    inner: Arc<SubscriberInner<T>>,
}

pub(super) struct SubscriberInner<T> {
    store: Arc<StatefulService<T>>,
    broker: Arc<dyn BrokerClient>,
    updater: Arc<dyn StateUpdater<T>>,
    topic: TopicCell,
    buffer_size: usize,
    message_hook: HookId,
    connect_hook: Option<HookId>,
}

impl<T: Send + Sync + 'static> MqttSubscriber<T> {
    /// Starts building a subscriber that merges documents with `updater`.
    pub fn builder<U>(updater: U) -> MqttSubscriberBuilder<T>
    where
        U: StateUpdater<T> + 'static,
    {
        MqttSubscriberBuilder {
            updater: Arc::new(updater),
            topic: String::new(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Moves the subscription to `topic`.
    ///
    /// The previous topic is unsubscribed before the new one is subscribed.
    /// Setting the current topic again is a no-op; an empty topic disables
    /// the subscription.
    pub fn set_topic(&self, topic: impl Into<String>) {
        self.inner.set_topic(topic.into());
    }

    /// Decodes `payload` and commits it with origin [`MQTT_ORIGIN_ID`], the
    /// same way a message on the subscribed topic is handled.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Deserialization`] if the payload is larger than
    /// the buffer, not valid JSON, or not a JSON object, and
    /// [`BridgeError::State`] if the updater rejects the document.
    pub fn apply(&self, payload: &[u8]) -> Result<StateUpdateResult, BridgeError> {
        self.inner.apply(payload)
    }

    /// Returns the current subscribe topic.
    #[must_use]
    pub fn topic(&self) -> String {
        self.inner.topic.read().clone()
    }

    /// Returns the serialization budget in bytes.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Returns the broker this subscriber listens on.
    #[must_use]
    pub fn broker(&self) -> &Arc<dyn BrokerClient> {
        &self.inner.broker
    }

    pub(super) fn topic_cell(&self) -> TopicCell {
        Arc::clone(&self.inner.topic)
    }

    pub(super) fn downgrade(&self) -> Weak<SubscriberInner<T>> {
        Arc::downgrade(&self.inner)
    }
}

impl<T: Send + Sync + 'static> BrokerConnector for MqttSubscriber<T> {
    fn on_connect(&self) {
        self.inner.on_connect();
    }
}

impl<T> Clone for MqttSubscriber<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for MqttSubscriber<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSubscriber")
            .field("topic", &*self.inner.topic.read())
            .field("buffer_size", &self.inner.buffer_size)
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> SubscriberInner<T> {
    pub(super) fn on_connect(&self) {
        // Subscriptions do not survive a reconnect.
        let topic = self.topic.read();
        self.subscribe(&topic);
    }

    fn set_topic(&self, new_topic: String) {
        // Held across unsubscribe/subscribe so concurrent calls cannot
        // interleave and leave two subscriptions behind.
        let mut topic = self.topic.write();
        if *topic == new_topic {
            return;
        }
        if !topic.is_empty() && self.broker.is_connected() {
            match self.broker.unsubscribe(&topic) {
                Ok(()) => tracing::debug!(topic = %topic, "Unsubscribed from state topic"),
                Err(e) => {
                    tracing::warn!(topic = %topic, error = %e, "Failed to unsubscribe");
                }
            }
        }
        *topic = new_topic;
        self.subscribe(&topic);
    }

    fn subscribe(&self, topic: &str) {
        if topic.is_empty() || !self.broker.is_connected() {
            return;
        }
        match self.broker.subscribe(topic, QoS::ExactlyOnce) {
            Ok(()) => tracing::debug!(topic = %topic, "Subscribed to state topic"),
            Err(e) => tracing::warn!(topic = %topic, error = %e, "Failed to subscribe"),
        }
    }

    fn on_message(&self, message: &InboundMessage<'_>) {
        {
            let topic = self.topic.read();
            if topic.is_empty() || *topic != message.topic {
                return;
            }
        }

        match self.apply(message.payload) {
            Ok(result) => {
                tracing::debug!(topic = %message.topic, ?result, "Applied inbound state");
            }
            Err(e @ BridgeError::Deserialization(_)) => {
                tracing::debug!(topic = %message.topic, error = %e, "Ignoring inbound payload");
            }
            Err(e) => {
                tracing::warn!(topic = %message.topic, error = %e, "Inbound state rejected");
            }
        }
    }

    fn apply(&self, payload: &[u8]) -> Result<StateUpdateResult, BridgeError> {
        let doc = self.decode(payload)?;
        Ok(self.store.update(&doc, self.updater.as_ref(), MQTT_ORIGIN_ID)?)
    }

    fn decode(&self, payload: &[u8]) -> Result<Document, BridgeError> {
        if payload.len() > self.buffer_size {
            return Err(BridgeError::Deserialization(format!(
                "payload of {} bytes exceeds buffer of {} bytes",
                payload.len(),
                self.buffer_size
            )));
        }
        match serde_json::from_slice::<Value>(payload) {
            Ok(Value::Object(doc)) => Ok(doc),
            Ok(_) => Err(BridgeError::Deserialization(
                "payload is not a JSON object".to_string(),
            )),
            Err(e) => Err(BridgeError::Deserialization(e.to_string())),
        }
    }
}

impl<T> Drop for SubscriberInner<T> {
    fn drop(&mut self) {
        self.broker.remove_hook(self.message_hook);
        if let Some(id) = self.connect_hook {
            self.broker.remove_hook(id);
        }
    }
}

/// Builder for [`MqttSubscriber`].
pub struct MqttSubscriberBuilder<T> {
    updater: Arc<dyn StateUpdater<T>>,
    topic: String,
    buffer_size: usize,
}

impl<T: Send + Sync + 'static> MqttSubscriberBuilder<T> {
    /// Sets the subscribe topic (default: empty, subscription disabled).
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Sets the maximum accepted payload size (default: [`DEFAULT_BUFFER_SIZE`]).
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Attaches the subscriber to `store` and `broker`.
    ///
    /// If the broker is already connected the topic is subscribed right away.
    pub fn build(
        self,
        store: Arc<StatefulService<T>>,
        broker: Arc<dyn BrokerClient>,
    ) -> MqttSubscriber<T> {
        let subscriber = self.attach(store, broker, true);
        subscriber.inner.on_connect();
        subscriber
    }

    pub(super) fn attach(
        self,
        store: Arc<StatefulService<T>>,
        broker: Arc<dyn BrokerClient>,
        own_connect_hook: bool,
    ) -> MqttSubscriber<T> {
        let inner = Arc::new_cyclic(|weak: &Weak<SubscriberInner<T>>| {
            let on_message = weak.clone();
            let message_hook = broker.on_message(message_hook(move |message| {
                if let Some(inner) = on_message.upgrade() {
                    inner.on_message(message);
                }
            }));

            let connect_hook = own_connect_hook.then(|| {
                let on_connect = weak.clone();
                broker.on_connect(connect_hook(move || {
                    if let Some(inner) = on_connect.upgrade() {
                        inner.on_connect();
                    }
                }))
            });

            SubscriberInner {
                store,
                broker,
                updater: self.updater,
                topic: Arc::new(RwLock::new(self.topic)),
                buffer_size: self.buffer_size,
                message_hook,
                connect_hook,
            }
        });
        MqttSubscriber { inner }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::protocol::recording::{BrokerCall, RecordingBroker};
    use crate::state::JsonAdapter;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Light {
        on: bool,
        brightness: u8,
    }

    fn setup() -> (Arc<StatefulService<Light>>, Arc<RecordingBroker>) {
        let broker = Arc::new(RecordingBroker::new());
        broker.connect();
        (Arc::new(StatefulService::new(Light::default())), broker)
    }

    fn record_origins(store: &StatefulService<Light>) -> Arc<parking_lot::Mutex<Vec<String>>> {
        let origins = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let origins_clone = Arc::clone(&origins);
        store.add_update_handler(move |origin| origins_clone.lock().push(origin.to_string()), false);
        origins
    }

    #[test]
    fn subscribes_at_exactly_once_on_build() {
        let (store, broker) = setup();
        let _subscriber = MqttSubscriber::builder(JsonAdapter)
            .topic("home/light/set")
            .build(store, broker.clone());

        assert_eq!(
            broker.calls(),
            vec![BrokerCall::Subscribe {
                topic: "home/light/set".into(),
                qos: QoS::ExactlyOnce,
            }]
        );
    }

    #[test]
    fn matching_message_commits_with_mqtt_origin() {
        let (store, broker) = setup();
        let origins = record_origins(&store);
        let _subscriber = MqttSubscriber::builder(JsonAdapter)
            .topic("home/light/set")
            .build(Arc::clone(&store), broker.clone());

        broker.deliver("home/light/set", r#"{"on":true,"brightness":40}"#);

        assert_eq!(
            store.snapshot(),
            Light {
                on: true,
                brightness: 40
            }
        );
        assert_eq!(*origins.lock(), vec![MQTT_ORIGIN_ID.to_string()]);
    }

    #[test]
    fn non_matching_topic_never_commits() {
        let (store, broker) = setup();
        let origins = record_origins(&store);
        let _subscriber = MqttSubscriber::builder(JsonAdapter)
            .topic("home/light/set")
            .build(Arc::clone(&store), broker.clone());

        broker.deliver("home/light/set/extra", r#"{"on":true}"#);
        broker.deliver("home/+/set", r#"{"on":true}"#);
        broker.deliver("other", r#"{"on":true}"#);

        assert!(origins.lock().is_empty());
        assert_eq!(store.snapshot(), Light::default());
    }

    #[test]
    fn malformed_payloads_are_ignored() {
        let (store, broker) = setup();
        let origins = record_origins(&store);
        let _subscriber = MqttSubscriber::builder(JsonAdapter)
            .topic("set")
            .build(Arc::clone(&store), broker.clone());

        broker.deliver("set", "not json");
        broker.deliver("set", "[1,2,3]");
        broker.deliver("set", "42");
        broker.deliver("set", r#"{"brightness":"high"}"#);

        assert!(origins.lock().is_empty());
        assert_eq!(store.snapshot(), Light::default());
    }

    #[test]
    fn oversized_payload_is_ignored() {
        let (store, broker) = setup();
        let _subscriber = MqttSubscriber::builder(JsonAdapter)
            .topic("set")
            .buffer_size(4)
            .build(Arc::clone(&store), broker.clone());

        broker.deliver("set", r#"{"on":true}"#);
        assert_eq!(store.snapshot(), Light::default());
    }

    #[test]
    fn apply_reports_why_a_payload_was_refused() {
        let (store, broker) = setup();
        let subscriber = MqttSubscriber::builder(JsonAdapter)
            .topic("set")
            .buffer_size(32)
            .build(Arc::clone(&store), broker.clone());

        let oversized = vec![b' '; 64];
        let refused: [&[u8]; 4] = [b"not json", b"[1,2,3]", b"42", &oversized];
        for payload in refused {
            assert!(matches!(
                subscriber.apply(payload),
                Err(BridgeError::Deserialization(_))
            ));
        }
        assert!(matches!(
            subscriber.apply(br#"{"brightness":"high"}"#),
            Err(BridgeError::State(_))
        ));
        assert_eq!(store.snapshot(), Light::default());

        assert_eq!(
            subscriber.apply(br#"{"on":true}"#).unwrap(),
            StateUpdateResult::Changed
        );
        assert!(store.snapshot().on);
    }

    #[test]
    fn set_topic_unsubscribes_before_subscribing() {
        let (store, broker) = setup();
        let subscriber = MqttSubscriber::builder(JsonAdapter)
            .topic("a")
            .build(store, broker.clone());

        subscriber.set_topic("b");
        subscriber.set_topic("b");
        subscriber.set_topic("");
        subscriber.set_topic("c");

        assert_eq!(
            broker.calls(),
            vec![
                BrokerCall::Subscribe {
                    topic: "a".into(),
                    qos: QoS::ExactlyOnce
                },
                BrokerCall::Unsubscribe { topic: "a".into() },
                BrokerCall::Subscribe {
                    topic: "b".into(),
                    qos: QoS::ExactlyOnce
                },
                BrokerCall::Unsubscribe { topic: "b".into() },
                BrokerCall::Subscribe {
                    topic: "c".into(),
                    qos: QoS::ExactlyOnce
                },
            ]
        );
    }

    #[test]
    fn at_most_one_subscription_across_reconfiguration() {
        let (store, broker) = setup();
        let subscriber = MqttSubscriber::builder(JsonAdapter).build(store, broker.clone());

        for topic in ["x", "y", "y", "", "", "z", "x", "", "w"] {
            subscriber.set_topic(topic);
            let active = broker
                .active_subscriptions()
                .expect("duplicate subscription");
            assert!(active.len() <= 1, "active subscriptions: {active:?}");
            if !topic.is_empty() {
                assert!(active.contains(topic));
            }
        }
    }

    #[test]
    fn old_topic_stops_matching_after_reconfiguration() {
        let (store, broker) = setup();
        let subscriber = MqttSubscriber::builder(JsonAdapter)
            .topic("old")
            .build(Arc::clone(&store), broker.clone());
        subscriber.set_topic("new");

        broker.deliver("old", r#"{"on":true}"#);
        assert!(!store.snapshot().on);

        broker.deliver("new", r#"{"on":true}"#);
        assert!(store.snapshot().on);
    }

    #[test]
    fn reconnect_resubscribes() {
        let (store, broker) = setup();
        let _subscriber = MqttSubscriber::builder(JsonAdapter)
            .topic("set")
            .build(store, broker.clone());
        broker.drop_connection();
        broker.clear();

        broker.connect();
        assert_eq!(
            broker.calls(),
            vec![BrokerCall::Subscribe {
                topic: "set".into(),
                qos: QoS::ExactlyOnce
            }]
        );
    }

    #[test]
    fn disconnected_broker_defers_subscription() {
        let store = Arc::new(StatefulService::new(Light::default()));
        let broker = Arc::new(RecordingBroker::new());
        let _subscriber = MqttSubscriber::builder(JsonAdapter)
            .topic("set")
            .build(store, broker.clone());
        assert!(broker.calls().is_empty());

        broker.connect();
        assert_eq!(broker.calls().len(), 1);
    }

    #[test]
    fn drop_unregisters_hooks() {
        let (store, broker) = setup();
        let subscriber = MqttSubscriber::builder(JsonAdapter)
            .topic("set")
            .build(Arc::clone(&store), broker.clone());
        assert_eq!(broker.hook_count(), 2);

        drop(subscriber);
        assert_eq!(broker.hook_count(), 0);
        broker.deliver("set", r#"{"on":true}"#);
        assert!(!store.snapshot().on);
    }
}
