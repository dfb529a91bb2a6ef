// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event families.
//!
//! An event family is a named group of related event types exchanged between
//! endpoints. Each family is modelled as an enum with one variant per event
//! type, implementing [`EventFamily`]. Every event type is identified on the
//! wire by its fully-qualified name (FQN).
//!
//! # Implementing a Family
//!
//! ```
//! use endpoint_events::error::CodecError;
//! use endpoint_events::event::EndpointId;
//! use endpoint_events::family::EventFamily;
//! use serde_json::{Value, json};
//!
//! #[derive(Debug, Clone)]
//! enum Doorbell {
//!     Ring,
//! }
//!
//! trait DoorbellListener: Send + Sync {
//!     fn on_ring(&self, sender: &EndpointId);
//! }
//!
//! impl EventFamily for Doorbell {
//!     const NAME: &'static str = "doorbell";
//!     const EVENT_TYPES: &'static [&'static str] = &["org.example.doorbell.Ring"];
//!     type Listener = dyn DoorbellListener;
//!
//!     fn fqn(&self) -> &'static str {
//!         Self::EVENT_TYPES[0]
//!     }
//!
//!     fn to_payload(&self) -> Result<Value, CodecError> {
//!         Ok(json!({}))
//!     }
//!
//!     fn from_payload(fqn: &str, _payload: Value) -> Result<Self, CodecError> {
//!         match fqn {
//!             "org.example.doorbell.Ring" => Ok(Self::Ring),
//!             other => Err(CodecError::UnknownEventType(other.to_string())),
//!         }
//!     }
//!
//!     fn dispatch_to(&self, listener: &Self::Listener, sender: &EndpointId) {
//!         match self {
//!             Self::Ring => listener.on_ring(sender),
//!         }
//!     }
//! }
//! ```

pub mod thermostat;

use serde_json::Value;

use crate::error::CodecError;
use crate::event::EndpointId;

/// A closed set of event types exchanged between endpoints.
pub trait EventFamily: Sized + Send + Sync + 'static {
    /// Name of the family, unique within a client.
    const NAME: &'static str;

    /// Fully-qualified names of every event type in the family.
    const EVENT_TYPES: &'static [&'static str];

    /// Listener interface with one method per event type.
    type Listener: ?Sized + Send + Sync + 'static;

    /// Returns the fully-qualified name of this event's type.
    fn fqn(&self) -> &'static str;

    /// Encodes the event payload.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Json` if the payload cannot be serialized.
    fn to_payload(&self) -> Result<Value, CodecError>;

    /// Decodes an event of type `fqn` from its payload.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::UnknownEventType` if the family does not define
    /// `fqn`, or `CodecError::Json` if the payload does not match the type.
    fn from_payload(fqn: &str, payload: Value) -> Result<Self, CodecError>;

    /// Calls the listener method matching this event's type.
    fn dispatch_to(&self, listener: &Self::Listener, sender: &EndpointId);

    /// Returns `true` if the family defines the event type `fqn`.
    #[must_use]
    fn supports(fqn: &str) -> bool {
        Self::EVENT_TYPES.contains(&fqn)
    }
}
