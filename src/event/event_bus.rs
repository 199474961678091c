// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event bus for broadcasting notifications.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use super::{EventSink, Notification};

/// Default channel capacity for the event bus.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Broadcasts [`Notification`]s to any number of subscribers.
///
/// # Capacity
///
/// The bus has a fixed capacity (default 256). A subscriber that falls more
/// than that many notifications behind loses the oldest ones and receives
/// `RecvError::Lagged`; other subscribers and the producer are unaffected.
///
/// # Examples
///
/// ```
/// use statebridge::event::{EventBus, Notification};
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(Notification::now("download_ota", r#"{"status":"finished"}"#));
/// assert_eq!(rx.try_recv().unwrap().payload, r#"{"status":"finished"}"#);
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Notification>,
}

impl EventBus {
    /// Creates a new event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a new event bus buffering up to `capacity` notifications.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to notifications published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publishes a notification to all subscribers.
    ///
    /// Without subscribers the notification is discarded.
    pub fn publish(&self, notification: Notification) {
        if self.sender.send(notification).is_err() {
            tracing::trace!("Notification dropped: no subscribers");
        }
    }

    /// Publishes a notification and returns how many subscribers received it.
    #[must_use]
    pub fn publish_counted(&self, notification: Notification) -> usize {
        self.sender.send(notification).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventBus {
    fn send(&self, payload: &str, event: &str, timestamp: DateTime<Utc>) {
        self.publish(Notification {
            event: event.to_string(),
            payload: payload.to_string(),
            timestamp,
        });
    }
}
