// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Notification channel for remote observers.
//!
//! Producers such as the firmware worker only depend on the [`EventSink`]
//! trait: "emit a named event with a text payload". The [`EventBus`] is the
//! in-process implementation, fanning every [`Notification`] out to all
//! subscribers over a tokio broadcast channel. Applications forward those
//! notifications to whatever transport their observers use.
//!
//! # Examples
//!
//! ```
//! use statebridge::event::{EventBus, EventSink};
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! bus.send(r#"{"status":"preparing"}"#, "download_ota", chrono::Utc::now());
//!
//! let notification = rx.try_recv().unwrap();
//! assert_eq!(notification.event, "download_ota");
//! ```

mod event_bus;
mod notification;

use std::sync::Arc;

use chrono::{DateTime, Utc};

pub use event_bus::EventBus;
pub use notification::Notification;

/// Fan-out emitter keyed by event name.
///
/// Delivery is best-effort: implementations must not block, and a missing or
/// slow observer never affects the producer.
pub trait EventSink: Send + Sync {
    /// Emits `payload` under the name `event`.
    fn send(&self, payload: &str, event: &str, timestamp: DateTime<Utc>);
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn send(&self, payload: &str, event: &str, timestamp: DateTime<Utc>) {
        (**self).send(payload, event, timestamp);
    }
}
