// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fan-out of [`ClientEvent`] notifications.

use tokio::sync::broadcast;

use super::ClientEvent;

/// Number of notifications buffered per subscriber unless configured.
pub(crate) const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Delivers the notifications of one client to any number of observers.
///
/// Observers only see notifications published after they subscribed. An
/// observer lagging more than [`capacity`](Self::capacity) notifications
/// behind skips the oldest ones and gets `RecvError::Lagged` once.
///
/// # Examples
///
/// ```
/// use endpoint_events::event::{ClientEvent, EndpointId, EventBus};
///
/// let bus = EventBus::with_capacity(8);
/// let mut observer = bus.subscribe();
///
/// bus.publish(ClientEvent::started(EndpointId::new("panel")));
/// assert!(observer.try_recv().unwrap().is_lifecycle());
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ClientEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a bus buffering 256 notifications per observer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a bus buffering `capacity` notifications per observer.
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    /// Returns how many notifications are buffered per observer.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Adds an observer.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of live observers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Hands `event` to every observer and returns how many got it.
    pub fn publish(&self, event: ClientEvent) -> usize {
        let endpoint = event.endpoint_id().clone();
        match self.sender.send(event) {
            Ok(observers) => observers,
            Err(_) => {
                tracing::trace!(%endpoint, "No observer for client event");
                0
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
