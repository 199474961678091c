// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed state store with origin-tagged update handlers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{ReentrantMutex, RwLock};

use crate::error::StateError;

use super::{Document, StateReader, StateUpdateResult, StateUpdater};

/// Origin passed to handlers invoked right after registration.
pub const INITIAL_ORIGIN_ID: &str = "";

/// Unique identifier for a registered update handler.
///
/// Returned by [`StatefulService::add_update_handler`] and used to remove the
/// handler again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    /// Returns the raw ID value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handler({})", self.0)
    }
}

type UpdateHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Holds a value of an application-defined type and notifies handlers on
/// every committed change.
///
/// Commits are serialized: only one update runs at a time, and handlers are
/// invoked synchronously, after the new value is visible to readers and
/// before [`update`](Self::update) returns. Handlers may read the store and
/// may commit further updates from within the handler.
///
/// # Examples
///
/// ```
/// use statebridge::error::StateError;
/// use statebridge::state::{Document, StatefulService, StateUpdateResult};
///
/// let store = StatefulService::new(false);
/// store.add_update_handler(|origin| println!("changed by {origin}"), false);
///
/// let mut doc = Document::new();
/// doc.insert("on".into(), true.into());
///
/// store
///     .update(
///         &doc,
///         &|doc: &Document, on: &mut bool| -> Result<StateUpdateResult, StateError> {
///             *on = doc.get("on").and_then(|v| v.as_bool()).unwrap_or(*on);
///             Ok(StateUpdateResult::Changed)
///         },
///         "http",
///     )
///     .unwrap();
///
/// assert!(store.read_with(|on| *on));
/// ```
pub struct StatefulService<T> {
    state: RwLock<T>,
    commit_lock: ReentrantMutex<()>,
    handlers: RwLock<Vec<(HandlerId, UpdateHandler)>>,
    next_id: AtomicU64,
}

impl<T> StatefulService<T> {
    /// Creates a store holding the given initial value.
    #[must_use]
    pub fn new(initial: T) -> Self {
        Self {
            state: RwLock::new(initial),
            commit_lock: ReentrantMutex::new(()),
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Projects the current state into a fresh document.
    #[must_use]
    pub fn read<R>(&self, reader: &R) -> Document
    where
        R: StateReader<T> + ?Sized,
    {
        let mut doc = Document::new();
        self.read_into(&mut doc, reader);
        doc
    }

    /// Projects the current state into `target`.
    pub fn read_into<R>(&self, target: &mut Document, reader: &R)
    where
        R: StateReader<T> + ?Sized,
    {
        let state = self.state.read();
        reader.read(&state, target);
    }

    /// Runs `f` against the current state.
    pub fn read_with<F, O>(&self, f: F) -> O
    where
        F: FnOnce(&T) -> O,
    {
        f(&self.state.read())
    }

    /// Merges `source` into the state and notifies every handler with `origin`.
    ///
    /// Handlers only run when the updater reports
    /// [`StateUpdateResult::Changed`].
    ///
    /// # Errors
    ///
    /// Returns the updater's error without invoking any handler. Updaters
    /// leave the state untouched on error (see [`StateUpdater`]).
    pub fn update<U>(
        &self,
        source: &Document,
        updater: &U,
        origin: &str,
    ) -> Result<StateUpdateResult, StateError>
    where
        U: StateUpdater<T> + ?Sized,
    {
        self.update_with(|state| updater.update(source, state), origin)
    }

    /// Mutates the state in place and notifies every handler with `origin`.
    ///
    /// `f` follows the same contract as [`StateUpdater::update`]: it either
    /// applies the whole change or returns an error before writing.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `f`.
    pub fn update_with<F>(&self, f: F, origin: &str) -> Result<StateUpdateResult, StateError>
    where
        F: FnOnce(&mut T) -> Result<StateUpdateResult, StateError>,
    {
        let _commit = self.commit_lock.lock();
        let result = {
            let mut state = self.state.write();
            f(&mut state)?
        };
        if result == StateUpdateResult::Changed {
            self.call_update_handlers(origin);
        }
        Ok(result)
    }

    /// Merges `source` into the state without notifying any handler.
    ///
    /// # Errors
    ///
    /// Returns the updater's error.
    pub fn update_without_propagation<U>(
        &self,
        source: &Document,
        updater: &U,
    ) -> Result<StateUpdateResult, StateError>
    where
        U: StateUpdater<T> + ?Sized,
    {
        let _commit = self.commit_lock.lock();
        let mut state = self.state.write();
        updater.update(source, &mut state)
    }

    /// Registers a handler called with the origin of every committed update.
    ///
    /// When `call_immediately` is set the handler is invoked once right away
    /// with [`INITIAL_ORIGIN_ID`].
    pub fn add_update_handler<F>(&self, handler: F, call_immediately: bool) -> HandlerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: UpdateHandler = Arc::new(handler);
        self.handlers.write().push((id, Arc::clone(&handler)));
        if call_immediately {
            handler(INITIAL_ORIGIN_ID);
        }
        id
    }

    /// Removes a handler.
    ///
    /// Returns `true` if the handler was registered.
    pub fn remove_update_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    /// Invokes every registered handler with `origin`.
    pub fn call_update_handlers(&self, origin: &str) {
        // Snapshot so handlers can (un)register without deadlocking.
        let handlers: Vec<UpdateHandler> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(origin);
        }
    }

    /// Returns the number of registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }
}

impl<T: Clone> StatefulService<T> {
    /// Returns a copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> T {
        self.state.read().clone()
    }
}

impl<T: Default> Default for StatefulService<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for StatefulService<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatefulService")
            .field("state", &*self.state.read())
            .field("handlers", &self.handler_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn set_count(doc: &Document, count: &mut u32) -> Result<StateUpdateResult, StateError> {
        let Some(value) = doc.get("count").and_then(serde_json::Value::as_u64) else {
            return Err(StateError::UpdateRejected("missing count".into()));
        };
        let value = u32::try_from(value).map_err(|e| StateError::UpdateRejected(e.to_string()))?;
        if *count == value {
            return Ok(StateUpdateResult::Unchanged);
        }
        *count = value;
        Ok(StateUpdateResult::Changed)
    }

    fn doc(count: u32) -> Document {
        let mut doc = Document::new();
        doc.insert("count".into(), count.into());
        doc
    }

    #[test]
    fn handlers_run_once_per_commit_before_update_returns() {
        let store = StatefulService::new(0u32);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        store.add_update_handler(
            move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
            false,
        );

        store.update(&doc(1), &set_count, "test").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        store.update(&doc(2), &set_count, "test").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handlers_receive_origin() {
        let store = StatefulService::new(0u32);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        store.add_update_handler(move |origin| seen_clone.lock().push(origin.to_string()), false);

        store.update(&doc(5), &set_count, "mqtt").unwrap();
        store.update(&doc(6), &set_count, "http").unwrap();

        assert_eq!(*seen.lock(), vec!["mqtt".to_string(), "http".to_string()]);
    }

    #[test]
    fn handler_sees_committed_value() {
        let store = Arc::new(StatefulService::new(0u32));
        let observed = Arc::new(AtomicUsize::new(0));
        let observed_clone = Arc::clone(&observed);
        let weak = Arc::downgrade(&store);
        store.add_update_handler(
            move |_| {
                if let Some(store) = weak.upgrade() {
                    let value = store.read_with(|v| *v);
                    observed_clone.store(value as usize, Ordering::SeqCst);
                }
            },
            false,
        );

        store.update(&doc(42), &set_count, "test").unwrap();
        assert_eq!(observed.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn unchanged_result_fires_nothing() {
        let store = StatefulService::new(3u32);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        store.add_update_handler(
            move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
            false,
        );

        let result = store.update(&doc(3), &set_count, "test").unwrap();
        assert_eq!(result, StateUpdateResult::Unchanged);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn updater_error_is_returned_without_notification() {
        let store = StatefulService::new(0u32);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        store.add_update_handler(
            move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
            false,
        );

        let result = store.update(&Document::new(), &set_count, "test");
        assert!(matches!(result, Err(StateError::UpdateRejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.snapshot(), 0);
    }

    #[test]
    fn rejected_json_update_leaves_state_intact() {
        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Light {
            on: bool,
            brightness: u8,
        }

        let store = StatefulService::new(Light {
            on: true,
            brightness: 30,
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        store.add_update_handler(
            move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
            false,
        );

        // The valid `on` key must not be applied when `brightness` is rejected.
        let doc: Document = serde_json::from_str(r#"{"on":false,"brightness":300}"#).unwrap();
        let result = store.update(&doc, &crate::state::JsonAdapter, "mqtt");

        assert!(matches!(result, Err(StateError::UpdateRejected(_))));
        assert_eq!(
            store.snapshot(),
            Light {
                on: true,
                brightness: 30
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn call_immediately_uses_initial_origin() {
        let store = StatefulService::new(0u32);
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        store.add_update_handler(move |origin| *seen_clone.lock() = Some(origin.to_string()), true);
        assert_eq!(seen.lock().as_deref(), Some(INITIAL_ORIGIN_ID));
    }

    #[test]
    fn remove_handler_stops_notifications() {
        let store = StatefulService::new(0u32);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let id = store.add_update_handler(
            move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
            false,
        );

        assert!(store.remove_update_handler(id));
        assert!(!store.remove_update_handler(id));
        store.update(&doc(1), &set_count, "test").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.handler_count(), 0);
    }

    #[test]
    fn update_without_propagation_is_silent() {
        let store = StatefulService::new(0u32);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        store.add_update_handler(
            move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
            false,
        );

        store.update_without_propagation(&doc(9), &set_count).unwrap();
        assert_eq!(store.snapshot(), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handler_may_commit_reentrantly() {
        let store = Arc::new(StatefulService::new(0u32));
        let weak = Arc::downgrade(&store);
        store.add_update_handler(
            move |origin| {
                if origin == "chain"
                    && let Some(store) = weak.upgrade()
                {
                    store.update(&doc(100), &set_count, "chained").unwrap();
                }
            },
            false,
        );

        store.update(&doc(1), &set_count, "chain").unwrap();
        assert_eq!(store.snapshot(), 100);
    }

    #[test]
    fn concurrent_commits_are_serialized() {
        let store = Arc::new(StatefulService::new(0u32));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        store.add_update_handler(
            move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
            false,
        );

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store
                            .update_with(
                                |count| {
                                    *count += 1;
                                    Ok(StateUpdateResult::Changed)
                                },
                                "thread",
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(store.snapshot(), 800);
        assert_eq!(calls.load(Ordering::SeqCst), 800);
    }
}
