// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed access to one event family of a client.

use std::sync::Arc;

use crate::error::Error;
use crate::event::{EndpointId, EventEnvelope};
use crate::family::EventFamily;
use crate::subscription::{ListenerRegistry, SubscriptionId};
use crate::transaction::TransactionId;
use crate::transport::Transport;

use super::EventClient;

/// Handle for registering listeners and sending events of family `F`.
///
/// Obtained from [`EventClient::family`]. Handles are cheap to clone and
/// share the client's session.
pub struct EventFamilyHandle<F: EventFamily, T: Transport> {
    client: EventClient<T>,
    registry: Arc<ListenerRegistry<F>>,
}

impl<F: EventFamily, T: Transport> Clone for EventFamilyHandle<F, T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<F: EventFamily, T: Transport> EventFamilyHandle<F, T> {
    pub(crate) fn new(client: EventClient<T>, registry: Arc<ListenerRegistry<F>>) -> Self {
        Self { client, registry }
    }

    // ========== Listeners ==========

    /// Registers a listener object with one method per event type.
    pub fn add_listener(&self, listener: Arc<F::Listener>) -> SubscriptionId {
        self.registry.add_listener(listener)
    }

    /// Registers a closure receiving every event of the family together
    /// with the sending endpoint.
    pub fn on_event<C>(&self, callback: C) -> SubscriptionId
    where
        C: Fn(&F, &EndpointId) + Send + Sync + 'static,
    {
        self.registry.on_event(callback)
    }

    /// Registers a closure receiving the type name of inbound events the
    /// family does not define.
    pub fn on_unknown_event<C>(&self, callback: C) -> SubscriptionId
    where
        C: Fn(&str, &EndpointId) + Send + Sync + 'static,
    {
        self.registry.on_unknown_event(callback)
    }

    /// Removes a listener.
    ///
    /// Returns `true` if a listener was found and removed.
    pub fn remove_listener(&self, id: SubscriptionId) -> bool {
        self.registry.remove(id)
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.registry.listener_count()
    }

    // ========== Sending ==========

    /// Sends an event to every endpoint of the user listening for its type.
    ///
    /// # Errors
    ///
    /// Returns error if the session is not started, no user is attached,
    /// the event cannot be encoded or the transport fails.
    pub async fn send_event_to_all(&self, event: impl Into<F>) -> Result<(), Error> {
        let envelope = EventEnvelope::encode(&event.into(), None)?;
        self.client.send_now(envelope).await
    }

    /// Sends an event to a single endpoint.
    ///
    /// # Errors
    ///
    /// Returns error if the session is not started, no user is attached,
    /// the event cannot be encoded or the transport fails.
    pub async fn send_event(&self, event: impl Into<F>, target: EndpointId) -> Result<(), Error> {
        let envelope = EventEnvelope::encode(&event.into(), Some(target))?;
        self.client.send_now(envelope).await
    }

    /// Appends an event to an open transaction.
    ///
    /// A `None` target broadcasts the event when the transaction is
    /// submitted.
    ///
    /// # Errors
    ///
    /// Returns `TransactionError::Closed` or `TransactionError::Unknown` if
    /// the transaction is not open, or a session or codec error.
    pub fn add_event_to_block(
        &self,
        id: TransactionId,
        event: impl Into<F>,
        target: Option<EndpointId>,
    ) -> Result<(), Error> {
        let envelope = EventEnvelope::encode(&event.into(), target)?;
        self.client.add_to_block(id, envelope)
    }

    /// Returns the client this handle belongs to.
    #[must_use]
    pub fn client(&self) -> &EventClient<T> {
        &self.client
    }
}

impl<F: EventFamily, T: Transport> std::fmt::Debug for EventFamilyHandle<F, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFamilyHandle")
            .field("family", &F::NAME)
            .field("endpoint_id", self.client.endpoint_id())
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::family::thermostat::{ChangeDegreeRequest, ThermostatEvent};
    use crate::transport::LocalHub;

    #[tokio::test]
    async fn handles_share_listeners() {
        let client = EventClient::builder(LocalHub::new().transport())
            .with_family::<ThermostatEvent>()
            .build();
        let first = client.family::<ThermostatEvent>().unwrap();
        let second = client.family::<ThermostatEvent>().unwrap();

        let id = first.on_event(|_, _| {});
        assert_eq!(second.listener_count(), 1);
        assert!(second.remove_listener(id));
        assert_eq!(first.listener_count(), 0);
    }

    #[tokio::test]
    async fn targeted_send_reaches_only_target() {
        let hub = LocalHub::new();
        let build = |id: &str| {
            EventClient::builder(hub.transport())
                .with_endpoint_id(id)
                .with_family::<ThermostatEvent>()
                .build()
        };
        let sender = build("sender");
        let target = build("target");
        let bystander = build("bystander");

        let target_hits = Arc::new(AtomicU32::new(0));
        let bystander_hits = Arc::new(AtomicU32::new(0));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let hits = target_hits.clone();
        target
            .family::<ThermostatEvent>()
            .unwrap()
            .on_event(move |_, _| {
                hits.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(());
            });
        let hits = bystander_hits.clone();
        bystander
            .family::<ThermostatEvent>()
            .unwrap()
            .on_event(move |_, _| {
                hits.fetch_add(1, Ordering::SeqCst);
            });

        for client in [&sender, &target, &bystander] {
            client.start().await.unwrap();
            client.attach_user("user", "token").await.unwrap();
        }

        sender
            .family::<ThermostatEvent>()
            .unwrap()
            .send_event(ChangeDegreeRequest::new(3), EndpointId::new("target"))
            .await
            .unwrap();

        rx.recv().await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(target_hits.load(Ordering::SeqCst), 1);
        assert_eq!(bystander_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn debug_output() {
        let client = EventClient::builder(LocalHub::new().transport())
            .with_endpoint_id("panel")
            .with_family::<ThermostatEvent>()
            .build();
        let handle = client.family::<ThermostatEvent>().unwrap();
        let debug = format!("{handle:?}");
        assert!(debug.contains("thermostat"));
        assert!(debug.contains("panel"));
    }
}
