// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connect and message hook bookkeeping shared by broker clients.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::{ConnectHook, InboundMessage, MessageHook};

/// Unique identifier for a hook registered on a broker client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

impl HookId {
    /// Returns the raw ID value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for HookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hook({})", self.0)
    }
}

/// Registry of connect and message hooks.
///
/// Broker client implementations embed one of these and call
/// [`dispatch_connect`](Self::dispatch_connect) on every (re)connection and
/// [`dispatch_message`](Self::dispatch_message) for every inbound publish.
/// Hooks are cloned out of the lock before they run, so a hook may register
/// or remove hooks itself.
#[derive(Default)]
pub struct HookRegistry {
    next_id: AtomicU64,
    connect: RwLock<Vec<(HookId, ConnectHook)>>,
    message: RwLock<Vec<(HookId, MessageHook)>>,
}

impl HookRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> HookId {
        HookId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Registers a connect hook.
    pub fn add_connect(&self, hook: ConnectHook) -> HookId {
        let id = self.next_id();
        self.connect.write().push((id, hook));
        id
    }

    /// Registers a message hook.
    pub fn add_message(&self, hook: MessageHook) -> HookId {
        let id = self.next_id();
        self.message.write().push((id, hook));
        id
    }

    /// Removes a hook of either kind.
    ///
    /// Returns `true` if a hook was removed.
    pub fn remove(&self, id: HookId) -> bool {
        let mut connect = self.connect.write();
        let before = connect.len();
        connect.retain(|(hook_id, _)| *hook_id != id);
        if connect.len() != before {
            return true;
        }
        drop(connect);

        let mut message = self.message.write();
        let before = message.len();
        message.retain(|(hook_id, _)| *hook_id != id);
        message.len() != before
    }

    /// Invokes every connect hook.
    pub fn dispatch_connect(&self) {
        let hooks: Vec<ConnectHook> = self
            .connect
            .read()
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect();
        tracing::debug!(hooks = hooks.len(), "Dispatching broker connect");
        for hook in hooks {
            hook();
        }
    }

    /// Invokes every message hook with `message`.
    pub fn dispatch_message(&self, message: &InboundMessage<'_>) {
        let hooks: Vec<MessageHook> = self
            .message
            .read()
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect();
        for hook in hooks {
            hook(message);
        }
    }

    /// Returns the number of registered hooks of both kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connect.read().len() + self.message.read().len()
    }

    /// Returns `true` if no hooks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("connect", &self.connect.read().len())
            .field("message", &self.message.read().len())
            .finish()
    }
}
