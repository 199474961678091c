// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Serialization adapters between typed state and JSON documents.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::StateError;

use super::Document;

/// Outcome reported by a [`StateUpdater`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateUpdateResult {
    /// The state was modified and handlers must be notified.
    Changed,
    /// The document matched the current state; nothing was committed.
    Unchanged,
}

/// Projects state of type `T` into a JSON document.
///
/// Implemented for any `Fn(&T, &mut Document)` closure.
pub trait StateReader<T>: Send + Sync {
    /// Writes the fields of `state` into `doc`.
    fn read(&self, state: &T, doc: &mut Document);
}

impl<T, F> StateReader<T> for F
where
    F: Fn(&T, &mut Document) + Send + Sync,
{
    fn read(&self, state: &T, doc: &mut Document) {
        self(state, doc);
    }
}

/// Merges a JSON document into state of type `T`.
///
/// Implemented for any
/// `Fn(&Document, &mut T) -> Result<StateUpdateResult, StateError>` closure.
///
/// Updates are all-or-nothing: an implementation validates the whole
/// document before it writes to `state`, and must not touch `state` when it
/// returns an error. The store does not roll back.
pub trait StateUpdater<T>: Send + Sync {
    /// Applies `doc` to `state`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::UpdateRejected`] if the document cannot be
    /// applied, with `state` unmodified.
    fn update(&self, doc: &Document, state: &mut T) -> Result<StateUpdateResult, StateError>;
}

impl<T, F> StateUpdater<T> for F
where
    F: Fn(&Document, &mut T) -> Result<StateUpdateResult, StateError> + Send + Sync,
{
    fn update(&self, doc: &Document, state: &mut T) -> Result<StateUpdateResult, StateError> {
        self(doc, state)
    }
}

/// Reader and updater for any serde-compatible state type.
///
/// Reading serializes the whole value; it must serialize to a JSON object.
/// Updating overlays the document's keys onto the current value and
/// deserializes the result, so partial documents only touch the fields they
/// name.
///
/// # Examples
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use statebridge::state::{Document, JsonAdapter, StatefulService, StateUpdateResult};
///
/// #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// struct Light {
///     on: bool,
///     brightness: u8,
/// }
///
/// let store = StatefulService::new(Light::default());
///
/// let doc: Document = serde_json::from_str(r#"{"on":true}"#).unwrap();
/// let result = store.update(&doc, &JsonAdapter, "http").unwrap();
/// assert_eq!(result, StateUpdateResult::Changed);
///
/// let out = store.read(&JsonAdapter);
/// assert_eq!(out["on"], true);
/// assert_eq!(out["brightness"], 0);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonAdapter;

impl<T> StateReader<T> for JsonAdapter
where
    T: Serialize,
{
    fn read(&self, state: &T, doc: &mut Document) {
        match serde_json::to_value(state) {
            Ok(Value::Object(map)) => doc.extend(map),
            Ok(other) => {
                tracing::warn!(kind = %value_kind(&other), "State does not serialize to an object");
            }
            Err(e) => tracing::warn!(error = %e, "Failed to serialize state"),
        }
    }
}

impl<T> StateUpdater<T> for JsonAdapter
where
    T: Serialize + DeserializeOwned + PartialEq + Send + Sync,
{
    fn update(&self, doc: &Document, state: &mut T) -> Result<StateUpdateResult, StateError> {
        let mut merged = match serde_json::to_value(&*state) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Document::new(),
            Err(e) => return Err(StateError::UpdateRejected(e.to_string())),
        };
        merged.extend(doc.iter().map(|(k, v)| (k.clone(), v.clone())));

        let next: T = serde_json::from_value(Value::Object(merged))
            .map_err(|e| StateError::UpdateRejected(e.to_string()))?;
        if next == *state {
            return Ok(StateUpdateResult::Unchanged);
        }
        *state = next;
        Ok(StateUpdateResult::Changed)
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
