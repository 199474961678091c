// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lifecycle payloads emitted on the notification channel.

use serde::{Deserialize, Serialize};

/// One firmware lifecycle event.
///
/// Serializes to the documents observers expect:
///
/// | Variant | JSON |
/// |---|---|
/// | `Preparing` | `{"status":"preparing"}` |
/// | `Progress` | `{"status":"progress","progress":42}` |
/// | `Finished` | `{"status":"finished"}` |
/// | `Error` | `{"status":"error","error":"..."}` |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FirmwareStatus {
    /// The request was accepted and the worker is starting.
    Preparing,
    /// Download progress in percent, `0..=100`.
    Progress {
        /// Percentage of the image written.
        progress: u8,
    },
    /// The image was fully written.
    Finished,
    /// The job ended without installing a new image.
    Error {
        /// Human-readable reason.
        error: String,
    },
}

impl FirmwareStatus {
    /// Serializes the status to its JSON text form.
    #[must_use]
    pub fn to_json(&self) -> String {
        // Unit and string-only variants cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Returns whether this status ends a job.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Error { .. })
    }
}
