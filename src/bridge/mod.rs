// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bridges between a [`StatefulService`](crate::state::StatefulService) and
//! MQTT topics.
//!
//! - [`MqttPublisher`] publishes the whole state on every commit, on broker
//!   (re)connect, and whenever its topic or retain flag changes.
//! - [`MqttSubscriber`] keeps exactly one subscription on its topic and
//!   commits inbound JSON objects into the store with origin
//!   [`MQTT_ORIGIN_ID`].
//! - [`MqttPubSub`] owns one of each behind a single connect hook.
//!
//! # Echo suppression
//!
//! A publisher never re-publishes a commit tagged [`MQTT_ORIGIN_ID`] onto
//! the topic it came from. Unpaired, it skips every such commit. Paired with
//! a subscriber (always the case inside [`MqttPubSub`]) it skips them only
//! while both point at the same topic, and re-publishes inbound state to a
//! different publish topic.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde::{Deserialize, Serialize};
//! use statebridge::bridge::MqttPubSub;
//! use statebridge::protocol::MqttBroker;
//! use statebridge::state::{JsonAdapter, StatefulService};
//!
//! #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
//! struct Light {
//!     on: bool,
//!     brightness: u8,
//! }
//!
//! # async fn example() -> Result<(), statebridge::error::ProtocolError> {
//! let broker = Arc::new(MqttBroker::builder().host("192.168.1.50").build().await?);
//! let store = Arc::new(StatefulService::new(Light::default()));
//!
//! let bridge = MqttPubSub::builder(JsonAdapter, JsonAdapter)
//!     .pub_topic("home/light/state")
//!     .sub_topic("home/light/set")
//!     .retain(true)
//!     .build(Arc::clone(&store), broker);
//!
//! // Later, when the operator changes the settings:
//! bridge.configure_topics("home/kitchen/state", "home/kitchen/set");
//! # Ok(())
//! # }
//! ```

mod pubsub;
mod publisher;
mod subscriber;

use std::sync::Arc;

use parking_lot::RwLock;

pub use pubsub::{MqttPubSub, MqttPubSubBuilder};
pub use publisher::{MqttPublisher, MqttPublisherBuilder};
pub use subscriber::{MqttSubscriber, MqttSubscriberBuilder};

/// Origin tag for commits made by an [`MqttSubscriber`].
pub const MQTT_ORIGIN_ID: &str = "mqtt";

/// Default serialization budget of a bridge, in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Topic shared between a subscriber and the publisher paired with it.
pub(crate) type TopicCell = Arc<RwLock<String>>;

/// Capability of reacting to the broker (re)connecting.
pub trait BrokerConnector {
    /// Re-arms the bridge after the broker connection is (re)established.
    fn on_connect(&self);
}

/// Result of a publication attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The state was handed to the broker.
    Published,
    /// Nothing was sent.
    Skipped(SkipReason),
}

/// Why a publication was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The publish topic is empty.
    NoTopic,
    /// The broker is not connected.
    Disconnected,
    /// The commit came from MQTT and would be sent back where it came from.
    Echo,
}
