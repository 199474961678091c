// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory broker client that records every request, for unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::ProtocolError;

use super::{BrokerClient, ConnectHook, HookId, HookRegistry, InboundMessage, MessageHook, QoS};

/// A request issued to the [`RecordingBroker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BrokerCall {
    Publish {
        topic: String,
        qos: QoS,
        retain: bool,
        payload: String,
    },
    Subscribe {
        topic: String,
        qos: QoS,
    },
    Unsubscribe {
        topic: String,
    },
}

#[derive(Debug, Default)]
pub(crate) struct RecordingBroker {
    connected: AtomicBool,
    calls: Mutex<Vec<BrokerCall>>,
    hooks: HookRegistry,
}

impl RecordingBroker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Marks the broker connected and fires the connect hooks.
    pub(crate) fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.hooks.dispatch_connect();
    }

    pub(crate) fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Delivers an inbound message to every message hook.
    pub(crate) fn deliver(&self, topic: &str, payload: &str) {
        self.hooks.dispatch_message(&InboundMessage {
            topic,
            payload: payload.as_bytes(),
            retain: false,
            qos: QoS::AtMostOnce,
            dup: false,
        });
    }

    pub(crate) fn calls(&self) -> Vec<BrokerCall> {
        self.calls.lock().clone()
    }

    pub(crate) fn clear(&self) {
        self.calls.lock().clear();
    }

    /// Returns `(topic, retain, payload)` for every publish so far.
    pub(crate) fn publishes(&self) -> Vec<(String, bool, String)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                BrokerCall::Publish {
                    topic,
                    retain,
                    payload,
                    ..
                } => Some((topic.clone(), *retain, payload.clone())),
                _ => None,
            })
            .collect()
    }

    /// Replays subscribe/unsubscribe calls to compute live subscriptions.
    ///
    /// Returns `None` if a topic was subscribed twice without an
    /// unsubscribe in between.
    pub(crate) fn active_subscriptions(&self) -> Option<HashSet<String>> {
        let mut active = HashSet::new();
        for call in self.calls.lock().iter() {
            match call {
                BrokerCall::Subscribe { topic, .. } => {
                    if !active.insert(topic.clone()) {
                        return None;
                    }
                }
                BrokerCall::Unsubscribe { topic } => {
                    active.remove(topic);
                }
                BrokerCall::Publish { .. } => {}
            }
        }
        Some(active)
    }

    pub(crate) fn hook_count(&self) -> usize {
        self.hooks.len()
    }
}

impl BrokerClient for RecordingBroker {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), ProtocolError> {
        let payload =
            String::from_utf8(payload).map_err(|e| ProtocolError::Rejected(e.to_string()))?;
        self.calls.lock().push(BrokerCall::Publish {
            topic: topic.to_string(),
            qos,
            retain,
            payload,
        });
        Ok(())
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ProtocolError> {
        self.calls.lock().push(BrokerCall::Subscribe {
            topic: topic.to_string(),
            qos,
        });
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), ProtocolError> {
        self.calls.lock().push(BrokerCall::Unsubscribe {
            topic: topic.to_string(),
        });
        Ok(())
    }

    fn on_connect(&self, hook: ConnectHook) -> HookId {
        self.hooks.add_connect(hook)
    }

    fn on_message(&self, hook: MessageHook) -> HookId {
        self.hooks.add_message(hook)
    }

    fn remove_hook(&self, id: HookId) -> bool {
        self.hooks.remove(id)
    }
}
