// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Notification type carried by the event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named event with a serialized JSON payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Event name, e.g. `download_ota`.
    pub event: String,
    /// Serialized JSON document.
    pub payload: String,
    /// When the producer emitted the event.
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    /// Creates a notification stamped with the current time.
    #[must_use]
    pub fn now(event: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            payload: payload.into(),
            timestamp: Utc::now(),
        }
    }

    /// Parses the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not valid JSON.
    pub fn payload_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }

    /// Returns the timestamp as milliseconds since the Unix epoch.
    #[must_use]
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}
