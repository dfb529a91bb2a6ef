// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subscription system for inbound events.
//!
//! Listeners are registered per event family through an
//! [`EventFamilyHandle`](crate::client::EventFamilyHandle) and receive every
//! event of that family together with the sending endpoint.
//!
//! # Usage
//!
//! ```no_run
//! use endpoint_events::client::EventClient;
//! use endpoint_events::family::thermostat::ThermostatEvent;
//! use endpoint_events::transport::LocalHub;
//!
//! # async fn example() -> endpoint_events::Result<()> {
//! let hub = LocalHub::new();
//! let client = EventClient::builder(hub.transport())
//!     .with_family::<ThermostatEvent>()
//!     .build();
//!
//! let thermostat = client.family::<ThermostatEvent>()?;
//! let sub_id = thermostat.on_event(|event, sender| {
//!     println!("{event:?} from {sender}");
//! });
//!
//! // Later, stop listening
//! thermostat.remove_listener(sub_id);
//! # Ok(())
//! # }
//! ```

mod callback;

pub use callback::{ListenerRegistry, SubscriptionId};
pub(crate) use callback::{FamilyDispatch, LifecycleCallbacks};
