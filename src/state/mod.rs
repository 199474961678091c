// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed state store and its serialization adapters.
//!
//! The [`StatefulService`] owns an application-defined value and fans every
//! committed change out to registered handlers, tagged with the origin of the
//! commit. Bridges never look inside the value: they only go through a
//! [`StateReader`] (state to document) and a [`StateUpdater`] (document to
//! state).
//!
//! # Examples
//!
//! ```
//! use statebridge::state::{JsonAdapter, StatefulService};
//!
//! let store = StatefulService::new(serde_json::json!({"on": false}));
//! store.add_update_handler(|origin| println!("committed by {origin}"), false);
//!
//! let doc = store.read(&JsonAdapter);
//! assert_eq!(doc["on"], false);
//! ```

mod adapter;
mod stateful;

pub use adapter::{JsonAdapter, StateReader, StateUpdateResult, StateUpdater};
pub use stateful::{HandlerId, INITIAL_ORIGIN_ID, StatefulService};

/// A structured JSON object exchanged with readers and updaters.
pub type Document = serde_json::Map<String, serde_json::Value>;
