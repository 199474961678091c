// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broker client contract and the MQTT implementation.
//!
//! Bridges talk to the broker only through the [`BrokerClient`] trait. Every
//! method is non-blocking: requests are queued to the client's I/O task, so
//! the trait is safe to call from broker callbacks, update handlers and
//! request handlers alike.
//!
//! # Implementations
//!
//! - [`MqttBroker`]: a `rumqttc` connection with automatic reconnection
//!   (requires the `mqtt` feature)

mod hooks;
#[cfg(feature = "mqtt")]
mod mqtt_broker;
#[cfg(test)]
pub(crate) mod recording;

use std::sync::Arc;

pub use hooks::{HookId, HookRegistry};
#[cfg(feature = "mqtt")]
pub use mqtt_broker::{MqttBroker, MqttBrokerBuilder, MqttBrokerConfig};

use crate::error::ProtocolError;

/// MQTT quality of service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QoS {
    /// Fire and forget.
    AtMostOnce,
    /// Acknowledged delivery, duplicates possible.
    AtLeastOnce,
    /// Assured single delivery.
    ExactlyOnce,
}

#[cfg(feature = "mqtt")]
impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

#[cfg(feature = "mqtt")]
impl From<rumqttc::QoS> for QoS {
    fn from(qos: rumqttc::QoS) -> Self {
        match qos {
            rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
            rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
            rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

/// A message received from the broker.
#[derive(Debug, Clone, Copy)]
pub struct InboundMessage<'a> {
    /// Topic the message was published on.
    pub topic: &'a str,
    /// Raw payload.
    pub payload: &'a [u8],
    /// Whether the broker delivered a retained message.
    pub retain: bool,
    /// Delivery quality of service.
    pub qos: QoS,
    /// Whether this is a redelivery.
    pub dup: bool,
}

/// Callback invoked whenever the client (re)connects to the broker.
pub type ConnectHook = Arc<dyn Fn() + Send + Sync>;

/// Callback invoked for every message the client receives.
pub type MessageHook = Arc<dyn Fn(&InboundMessage<'_>) + Send + Sync>;

/// Wraps a closure into a [`ConnectHook`].
pub fn connect_hook<F>(f: F) -> ConnectHook
where
    F: Fn() + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wraps a closure into a [`MessageHook`].
pub fn message_hook<F>(f: F) -> MessageHook
where
    F: Fn(&InboundMessage<'_>) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Operations a broker connection exposes to the bridges.
///
/// Implementations must deliver connect hooks on every transition to the
/// connected state and message hooks for every inbound publish, from the
/// client's own I/O context.
pub trait BrokerClient: Send + Sync {
    /// Returns whether the connection is currently established.
    fn is_connected(&self) -> bool;

    /// Queues a publish.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the request cannot be queued.
    fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), ProtocolError>;

    /// Queues a subscription.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the request cannot be queued.
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ProtocolError>;

    /// Queues an unsubscription.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the request cannot be queued.
    fn unsubscribe(&self, topic: &str) -> Result<(), ProtocolError>;

    /// Registers a hook called on every (re)connection.
    fn on_connect(&self, hook: ConnectHook) -> HookId;

    /// Registers a hook called for every inbound message.
    fn on_message(&self, hook: MessageHook) -> HookId;

    /// Removes a previously registered hook.
    fn remove_hook(&self, id: HookId) -> bool;
}
