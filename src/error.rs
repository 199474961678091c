// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `statebridge` library.
//!
//! Each concern has its own error enum (state store, bridges, broker
//! protocol, firmware updates). All of them fold into [`Error`] so callers
//! that do not care about the origin can use the crate-wide [`Result`].

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// Error raised by the typed state store.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Error raised while bridging state to or from the broker.
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// Error occurred during broker communication.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error raised by the firmware update service.
    #[error("firmware error: {0}")]
    Firmware(#[from] FirmwareError),
}

/// Errors raised by the typed state store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The updater refused to merge the incoming document.
    #[error("update rejected: {0}")]
    UpdateRejected(String),
}

/// Errors raised by the publish and subscribe bridges.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The serialized state does not fit into the bridge buffer.
    #[error("serialized payload of {size} bytes exceeds buffer of {limit} bytes")]
    SerializationOverflow {
        /// Size of the serialized payload.
        size: usize,
        /// Configured buffer size.
        limit: usize,
    },

    /// The state document could not be encoded.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An inbound payload was not a JSON object.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// The store refused the inbound document.
    #[error(transparent)]
    State(#[from] StateError),

    /// The broker call itself failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Errors related to broker communication.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// MQTT client request failed.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Connection to the broker failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The broker did not acknowledge the connection in time.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// Invalid broker address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The broker rejected or could not queue the request.
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Errors returned when a firmware download request is not accepted.
///
/// Failures that happen after a job was accepted are never returned to the
/// caller; they are reported as `error` notifications instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FirmwareError {
    /// The request body is malformed.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Another firmware job is still running.
    #[error("a firmware update is already in progress")]
    Busy,

    /// The worker task could not be spawned.
    #[error("cannot start firmware worker: {0}")]
    ResourceExhausted(String),

    /// The transport failed before a download could start.
    #[error("transport error: {0}")]
    Transport(String),
}

impl FirmwareError {
    /// Returns the HTTP status code a request handler should reply with.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Busy => 409,
            Self::ResourceExhausted(_) | Self::Transport(_) => 500,
        }
    }
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
