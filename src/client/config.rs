// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client configuration and builder.

use std::sync::Arc;
use std::time::Duration;

use crate::event::{DEFAULT_CHANNEL_CAPACITY, EndpointId};
use crate::family::EventFamily;
use crate::subscription::{FamilyDispatch, ListenerRegistry};
use crate::transport::Transport;

use super::EventClient;

/// Default upper bound for a listener discovery request.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration of an event client.
///
/// # Examples
///
/// ```
/// use endpoint_events::client::ClientConfig;
/// use endpoint_events::event::EndpointId;
/// use std::time::Duration;
///
/// let config = ClientConfig::default()
///     .with_endpoint_id(EndpointId::new("thermostat_endpoint_id"))
///     .with_discovery_timeout(Duration::from_secs(2));
/// assert_eq!(config.event_capacity, 256);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Identifier of the endpoint, generated when `None`.
    pub endpoint_id: Option<EndpointId>,
    /// Upper bound for a listener discovery request.
    pub discovery_timeout: Duration,
    /// Capacity of the lifecycle event channel.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint_id: None,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            event_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Sets the endpoint identifier.
    #[must_use]
    pub fn with_endpoint_id(mut self, endpoint_id: impl Into<EndpointId>) -> Self {
        self.endpoint_id = Some(endpoint_id.into());
        self
    }

    /// Sets the discovery timeout (default: 5 seconds).
    #[must_use]
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Sets the lifecycle event channel capacity (default: 256).
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

/// Builder for an [`EventClient`].
///
/// # Examples
///
/// ```
/// use endpoint_events::client::EventClient;
/// use endpoint_events::family::thermostat::ThermostatEvent;
/// use endpoint_events::transport::LocalHub;
///
/// let hub = LocalHub::new();
/// let client = EventClient::builder(hub.transport())
///     .with_endpoint_id("living_room_panel")
///     .with_family::<ThermostatEvent>()
///     .build();
///
/// assert_eq!(client.endpoint_id().as_str(), "living_room_panel");
/// ```
pub struct EventClientBuilder<T: Transport> {
    transport: T,
    config: ClientConfig,
    families: Vec<Arc<dyn FamilyDispatch>>,
}

impl<T: Transport> EventClientBuilder<T> {
    pub(crate) fn new(transport: T) -> Self {
        Self {
            transport,
            config: ClientConfig::default(),
            families: Vec::new(),
        }
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the endpoint identifier.
    #[must_use]
    pub fn with_endpoint_id(mut self, endpoint_id: impl Into<EndpointId>) -> Self {
        self.config = self.config.with_endpoint_id(endpoint_id);
        self
    }

    /// Sets the discovery timeout (default: 5 seconds).
    #[must_use]
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_discovery_timeout(timeout);
        self
    }

    /// Sets the lifecycle event channel capacity (default: 256).
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.config = self.config.with_event_capacity(capacity);
        self
    }

    /// Registers an event family.
    ///
    /// The client listens for every event type of its registered families.
    /// Registering the same family twice has no effect.
    #[must_use]
    pub fn with_family<F: EventFamily>(mut self) -> Self {
        if self
            .families
            .iter()
            .all(|family| family.family_name() != F::NAME)
        {
            self.families.push(Arc::new(ListenerRegistry::<F>::new()));
        }
        self
    }

    /// Returns the configuration collected so far.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Builds the client. The session is not started.
    #[must_use]
    pub fn build(self) -> EventClient<T> {
        EventClient::from_parts(self.transport, self.config, self.families)
    }
}

impl<T: Transport> std::fmt::Debug for EventClientBuilder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let families: Vec<&str> = self.families.iter().map(|f| f.family_name()).collect();
        f.debug_struct("EventClientBuilder")
            .field("config", &self.config)
            .field("families", &families)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::thermostat::ThermostatEvent;
    use crate::transport::LocalHub;

    #[test]
    fn config_defaults() {
        let config = ClientConfig::default();
        assert!(config.endpoint_id.is_none());
        assert_eq!(config.discovery_timeout, Duration::from_secs(5));
        assert_eq!(config.event_capacity, 256);
    }

    #[test]
    fn builder_registers_family_once() {
        let builder = EventClientBuilder::new(LocalHub::new().transport())
            .with_family::<ThermostatEvent>()
            .with_family::<ThermostatEvent>();
        assert_eq!(builder.families.len(), 1);
    }

    #[test]
    fn builder_settings() {
        let builder = EventClientBuilder::new(LocalHub::new().transport())
            .with_endpoint_id("panel")
            .with_discovery_timeout(Duration::from_millis(100))
            .with_event_capacity(8);

        let config = builder.config();
        assert_eq!(config.endpoint_id, Some(EndpointId::new("panel")));
        assert_eq!(config.discovery_timeout, Duration::from_millis(100));
        assert_eq!(config.event_capacity, 8);
    }

    #[test]
    fn builder_debug_lists_families() {
        let builder =
            EventClientBuilder::new(LocalHub::new().transport()).with_family::<ThermostatEvent>();
        let debug = format!("{builder:?}");
        assert!(debug.contains("thermostat"));
    }
}
