// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration types for the firmware worker and the MQTT bridge.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings of the firmware download worker.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use statebridge::config::FirmwareConfig;
///
/// let config = FirmwareConfig::new()
///     .with_connect_timeout(Duration::from_secs(5))
///     .with_current_version("1.4.2");
///
/// assert_eq!(config.event_name(), "download_ota");
/// assert_eq!(config.current_version(), Some("1.4.2"));
/// ```
#[derive(Debug, Clone)]
pub struct FirmwareConfig {
    connect_timeout: Duration,
    read_timeout: Duration,
    redirect_limit: usize,
    restart_delay: Duration,
    event_name: String,
    user_agent: String,
    current_version: Option<String>,
}

impl FirmwareConfig {
    /// Default TCP/TLS connect timeout.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default timeout between two reads of the image body.
    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default maximum number of redirects followed.
    pub const DEFAULT_REDIRECT_LIMIT: usize = 10;
    /// Default pause between the last event and the restart.
    pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_millis(100);
    /// Default notification event name.
    pub const DEFAULT_EVENT_NAME: &'static str = "download_ota";
    /// Header carrying [`current_version`](Self::current_version).
    pub const VERSION_HEADER: &'static str = "x-firmware-version";

    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            read_timeout: Self::DEFAULT_READ_TIMEOUT,
            redirect_limit: Self::DEFAULT_REDIRECT_LIMIT,
            restart_delay: Self::DEFAULT_RESTART_DELAY,
            event_name: Self::DEFAULT_EVENT_NAME.to_string(),
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
            current_version: None,
        }
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the read timeout.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets how many redirects are followed before giving up.
    #[must_use]
    pub fn with_redirect_limit(mut self, limit: usize) -> Self {
        self.redirect_limit = limit;
        self
    }

    /// Sets the pause between a successful update and the restart.
    #[must_use]
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Sets the notification event name.
    #[must_use]
    pub fn with_event_name(mut self, name: impl Into<String>) -> Self {
        self.event_name = name.into();
        self
    }

    /// Sets the `User-Agent` of download requests.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets the running firmware version, sent so servers can answer
    /// `304 Not Modified`.
    #[must_use]
    pub fn with_current_version(mut self, version: impl Into<String>) -> Self {
        self.current_version = Some(version.into());
        self
    }

    /// Returns the connect timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the read timeout.
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Returns the redirect limit.
    #[must_use]
    pub fn redirect_limit(&self) -> usize {
        self.redirect_limit
    }

    /// Returns the restart delay.
    #[must_use]
    pub fn restart_delay(&self) -> Duration {
        self.restart_delay
    }

    /// Returns the notification event name.
    #[must_use]
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Returns the user agent.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Returns the running firmware version, if configured.
    #[must_use]
    pub fn current_version(&self) -> Option<&str> {
        self.current_version.as_deref()
    }
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Publish and subscribe topics of a bridge, as persisted by the
/// application.
///
/// Either topic may be empty to disable that direction.
///
/// # Examples
///
/// ```
/// use statebridge::config::TopicPair;
///
/// let topics: TopicPair =
///     serde_json::from_str(r#"{"pub_topic":"home/light/state"}"#).unwrap();
/// assert_eq!(topics.pub_topic, "home/light/state");
/// assert!(topics.sub_topic.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicPair {
    /// Topic the state is published on.
    pub pub_topic: String,
    /// Topic inbound state is received on.
    pub sub_topic: String,
}

impl TopicPair {
    /// Creates a topic pair.
    #[must_use]
    pub fn new(pub_topic: impl Into<String>, sub_topic: impl Into<String>) -> Self {
        Self {
            pub_topic: pub_topic.into(),
            sub_topic: sub_topic.into(),
        }
    }

    /// Returns whether both directions use the same non-empty topic.
    #[must_use]
    pub fn is_shared(&self) -> bool {
        !self.pub_topic.is_empty() && self.pub_topic == self.sub_topic
    }
}
