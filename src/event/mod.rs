// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event types shared by clients and transports.
//!
//! This module holds two kinds of events:
//!
//! - Client lifecycle notifications ([`ClientEvent`]) distributed through an
//!   [`EventBus`] built on tokio's broadcast channel
//! - Endpoint events on the wire ([`EventEnvelope`] grouped in an
//!   [`EventBatch`]) addressed by [`EndpointId`]
//!
//! # Examples
//!
//! ```
//! use endpoint_events::event::{ClientEvent, EndpointId, EventBus};
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! bus.publish(ClientEvent::started(EndpointId::generate()));
//! ```

mod client_event;
mod endpoint_id;
mod envelope;
mod event_bus;

pub use client_event::ClientEvent;
pub use endpoint_id::EndpointId;
pub use envelope::{EventBatch, EventEnvelope};
pub use event_bus::EventBus;
pub(crate) use event_bus::DEFAULT_CHANNEL_CAPACITY;
