// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Callback management for event listeners and session notifications.
//!
//! - [`SubscriptionId`] - Unique identifier for removing a callback
//! - [`ListenerRegistry`] - Per-family registry that decodes inbound events
//!   and dispatches them to listeners
//! - [`LifecycleCallbacks`] - Started/stopped notifications of a client

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::event::{EndpointId, EventEnvelope};
use crate::family::EventFamily;

/// Unique identifier for a registered callback.
///
/// IDs are unique within the registry that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Creates a new subscription ID with the given value.
    #[must_use]
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", self.0)
    }
}

/// Type alias for tagged-variant event callbacks.
type EventCallback<F> = Arc<dyn Fn(&F, &EndpointId) + Send + Sync>;

/// Type alias for callbacks receiving events of unknown type.
type UnknownCallback = Arc<dyn Fn(&str, &EndpointId) + Send + Sync>;

/// Type alias for session notification callbacks.
type NotifyCallback = Arc<dyn Fn(&EndpointId) + Send + Sync>;

/// Registry of listeners for one event family.
///
/// Inbound envelopes are decoded into the family's event enum and handed to
/// every registered listener together with the sender. Envelopes whose type
/// the family does not define go to the unknown-event callbacks instead.
///
/// # Thread Safety
///
/// Registration and dispatch may happen from different tasks. Callbacks are
/// cloned out of the lock before being called, so a callback may register or
/// remove listeners without deadlocking.
pub struct ListenerRegistry<F: EventFamily> {
    next_id: AtomicU64,
    event_callbacks: RwLock<HashMap<SubscriptionId, EventCallback<F>>>,
    unknown_callbacks: RwLock<HashMap<SubscriptionId, UnknownCallback>>,
}

impl<F: EventFamily> ListenerRegistry<F> {
    /// Creates a new empty listener registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            event_callbacks: RwLock::new(HashMap::new()),
            unknown_callbacks: RwLock::new(HashMap::new()),
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a closure receiving every decoded event of the family.
    pub fn on_event<C>(&self, callback: C) -> SubscriptionId
    where
        C: Fn(&F, &EndpointId) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.event_callbacks.write().insert(id, Arc::new(callback));
        id
    }

    /// Registers a family listener object with one method per event type.
    pub fn add_listener(&self, listener: Arc<F::Listener>) -> SubscriptionId {
        self.on_event(move |event: &F, sender: &EndpointId| event.dispatch_to(&*listener, sender))
    }

    /// Registers a closure receiving the type name of events the family
    /// does not define.
    pub fn on_unknown_event<C>(&self, callback: C) -> SubscriptionId
    where
        C: Fn(&str, &EndpointId) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.unknown_callbacks.write().insert(id, Arc::new(callback));
        id
    }

    /// Removes a listener by its subscription ID.
    ///
    /// Returns `true` if a listener was found and removed.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        self.event_callbacks.write().remove(&id).is_some()
            || self.unknown_callbacks.write().remove(&id).is_some()
    }

    /// Removes every listener.
    pub fn clear(&self) {
        self.event_callbacks.write().clear();
        self.unknown_callbacks.write().clear();
    }

    /// Returns the total number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.event_callbacks.read().len() + self.unknown_callbacks.read().len()
    }

    /// Returns `true` if there are no registered listeners.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listener_count() == 0
    }

    /// Decodes an envelope and dispatches it to the listeners.
    ///
    /// Listeners are called synchronously in an arbitrary order.
    pub fn dispatch(&self, envelope: &EventEnvelope, sender: &EndpointId) {
        if !F::supports(&envelope.fqn) {
            tracing::debug!(
                family = F::NAME,
                fqn = %envelope.fqn,
                %sender,
                "Dispatching unknown event type"
            );
            let callbacks: Vec<UnknownCallback> =
                self.unknown_callbacks.read().values().cloned().collect();
            for callback in callbacks {
                callback(&envelope.fqn, sender);
            }
            return;
        }

        let event = match F::from_payload(&envelope.fqn, envelope.payload.clone()) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    family = F::NAME,
                    fqn = %envelope.fqn,
                    %sender,
                    error = %e,
                    "Dropping undecodable event"
                );
                return;
            }
        };

        let callbacks: Vec<EventCallback<F>> =
            self.event_callbacks.read().values().cloned().collect();
        tracing::debug!(
            family = F::NAME,
            fqn = %envelope.fqn,
            %sender,
            listeners = callbacks.len(),
            "Dispatching event"
        );
        for callback in callbacks {
            callback(&event, sender);
        }
    }
}

impl<F: EventFamily> Default for ListenerRegistry<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: EventFamily> std::fmt::Debug for ListenerRegistry<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("family", &F::NAME)
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

/// Type-erased view of a [`ListenerRegistry`] used by the client's
/// inbound dispatch loop.
pub(crate) trait FamilyDispatch: Send + Sync {
    fn family_name(&self) -> &'static str;
    fn event_types(&self) -> &'static [&'static str];
    fn dispatch_envelope(&self, envelope: &EventEnvelope, sender: &EndpointId);
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<F: EventFamily> FamilyDispatch for ListenerRegistry<F> {
    fn family_name(&self) -> &'static str {
        F::NAME
    }

    fn event_types(&self) -> &'static [&'static str] {
        F::EVENT_TYPES
    }

    fn dispatch_envelope(&self, envelope: &EventEnvelope, sender: &EndpointId) {
        self.dispatch(envelope, sender);
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Started and stopped notifications of a client session.
pub(crate) struct LifecycleCallbacks {
    next_id: AtomicU64,
    started: RwLock<HashMap<SubscriptionId, NotifyCallback>>,
    stopped: RwLock<HashMap<SubscriptionId, NotifyCallback>>,
}

impl LifecycleCallbacks {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            started: RwLock::new(HashMap::new()),
            stopped: RwLock::new(HashMap::new()),
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn on_started<C>(&self, callback: C) -> SubscriptionId
    where
        C: Fn(&EndpointId) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.started.write().insert(id, Arc::new(callback));
        id
    }

    pub(crate) fn on_stopped<C>(&self, callback: C) -> SubscriptionId
    where
        C: Fn(&EndpointId) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.stopped.write().insert(id, Arc::new(callback));
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.started.write().remove(&id).is_some() || self.stopped.write().remove(&id).is_some()
    }

    pub(crate) fn dispatch_started(&self, endpoint_id: &EndpointId) {
        let callbacks: Vec<NotifyCallback> = self.started.read().values().cloned().collect();
        for callback in callbacks {
            callback(endpoint_id);
        }
    }

    pub(crate) fn dispatch_stopped(&self, endpoint_id: &EndpointId) {
        let callbacks: Vec<NotifyCallback> = self.stopped.read().values().cloned().collect();
        for callback in callbacks {
            callback(endpoint_id);
        }
    }
}

impl std::fmt::Debug for LifecycleCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleCallbacks")
            .field("started", &self.started.read().len())
            .field("stopped", &self.stopped.read().len())
            .finish()
    }
}
