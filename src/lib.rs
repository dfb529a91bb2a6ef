// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Endpoint Events - client side of an IoT device event subsystem.
//!
//! Endpoints (devices, phones, panels) attached to the same user exchange
//! typed events through an event server. This library provides async APIs
//! to start an endpoint session, attach it to a user, discover peers and
//! exchange events immediately or in atomic batches.
//!
//! # Supported Features
//!
//! - **Session lifecycle**: Start/stop with started and stopped notifications
//! - **User attachment**: Credential verification with exactly-once results
//! - **Listener discovery**: Find peers listening for a set of event types
//! - **Event families**: Typed event enums with per-type listener traits
//! - **Transactions**: Event blocks delivered as one unit or not at all
//!
//! # Transports
//!
//! - [`LocalHub`](transport::LocalHub): In-process event server
//! - [`MqttTransport`](transport::MqttTransport): Events over an MQTT broker
//!   (feature `mqtt`, enabled by default)
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use endpoint_events::client::EventClient;
//! use endpoint_events::event::EndpointId;
//! use endpoint_events::family::thermostat::{
//!     CHANGE_DEGREE_REQUEST_FQN, ChangeDegreeRequest, THERMOSTAT_INFO_REQUEST_FQN,
//!     ThermostatEvent, ThermostatInfoRequest,
//! };
//! use endpoint_events::transport::LocalHub;
//!
//! #[tokio::main]
//! async fn main() -> endpoint_events::Result<()> {
//!     let hub = LocalHub::new();
//!     let client = EventClient::builder(hub.transport())
//!         .with_family::<ThermostatEvent>()
//!         .build();
//!
//!     client.start().await?;
//!     client.attach_user("userExternalId", "userAccessToken").await?;
//!
//!     let listeners = client
//!         .find_event_listeners(&[THERMOSTAT_INFO_REQUEST_FQN, CHANGE_DEGREE_REQUEST_FQN])
//!         .await?;
//!     println!("Found {} listeners", listeners.len());
//!
//!     let thermostat = client.family::<ThermostatEvent>()?;
//!     thermostat.on_event(|event, sender| println!("{event:?} from {sender}"));
//!
//!     // Immediate broadcast
//!     thermostat.send_event_to_all(ChangeDegreeRequest::new(10)).await?;
//!
//!     // Batched delivery
//!     let block = client.start_events_block()?;
//!     thermostat.add_event_to_block(block, ThermostatInfoRequest::new(), None)?;
//!     thermostat.add_event_to_block(
//!         block,
//!         ChangeDegreeRequest::new(-30),
//!         Some(EndpointId::new("thermostat_endpoint_id")),
//!     )?;
//!     client.submit_events_block(block).await?;
//!
//!     client.stop().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod event;
pub mod family;
pub mod subscription;
pub mod transaction;
pub mod transport;

pub use client::{ClientConfig, EventClient, EventClientBuilder, EventFamilyHandle, SessionState};
pub use error::{
    AttachError, CodecError, DiscoveryError, Error, ProtocolError, Result, SessionError,
    TransactionError,
};
pub use event::{ClientEvent, EndpointId, EventBatch, EventEnvelope, EventBus};
pub use family::EventFamily;
pub use subscription::SubscriptionId;
pub use transaction::TransactionId;
pub use transport::{LocalHub, LocalTransport, Transport};
