// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `statebridge` - keep typed in-process state in sync with an MQTT broker
//! and run observable firmware updates.
//!
//! # Components
//!
//! - **[`state`]**: a typed state store that serializes commits and notifies
//!   handlers with the origin of every change
//! - **[`bridge`]**: publish, subscribe and combined bridges between a store
//!   and MQTT topics, with echo suppression
//! - **[`protocol`]**: the broker client contract and the `rumqttc`-backed
//!   [`MqttBroker`]
//! - **[`firmware`]**: a single-job firmware download worker reporting its
//!   lifecycle on an [`event`] channel
//!
//! # Feature Flags
//!
//! - `mqtt` (default): [`MqttBroker`] over `rumqttc`
//! - `http` (default): [`HttpUpdater`](firmware::HttpUpdater) over `reqwest`
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde::{Deserialize, Serialize};
//! use statebridge::{JsonAdapter, MqttBroker, MqttPubSub, StatefulService};
//!
//! #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
//! struct Light {
//!     on: bool,
//!     brightness: u8,
//! }
//!
//! #[tokio::main]
//! async fn main() -> statebridge::Result<()> {
//!     let broker = Arc::new(MqttBroker::builder().host("192.168.1.50").build().await?);
//!     let store = Arc::new(StatefulService::new(Light::default()));
//!
//!     let _bridge = MqttPubSub::builder(JsonAdapter, JsonAdapter)
//!         .pub_topic("home/light/state")
//!         .sub_topic("home/light/set")
//!         .build(Arc::clone(&store), broker);
//!
//!     // Local commits are published on home/light/state.
//!     store.update_with(
//!         |light| {
//!             light.on = true;
//!             Ok(statebridge::StateUpdateResult::Changed)
//!         },
//!         "http",
//!     )?;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod event;
pub mod firmware;
pub mod protocol;
pub mod state;

pub use bridge::{
    BrokerConnector, MQTT_ORIGIN_ID, MqttPubSub, MqttPublisher, MqttSubscriber, PublishOutcome,
    SkipReason,
};
pub use config::{FirmwareConfig, TopicPair};
pub use error::{BridgeError, Error, FirmwareError, ProtocolError, Result, StateError};
pub use event::{EventBus, EventSink, Notification};
pub use firmware::{DownloadFirmwareService, FirmwareStatus, JobId};
#[cfg(feature = "mqtt")]
pub use protocol::{MqttBroker, MqttBrokerBuilder, MqttBrokerConfig};
pub use protocol::{BrokerClient, QoS};
pub use state::{JsonAdapter, StateUpdateResult, StatefulService};
