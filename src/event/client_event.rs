// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client lifecycle event types.

use serde::{Deserialize, Serialize};

use crate::transaction::TransactionId;

use super::EndpointId;

/// Lifecycle events emitted by an [`EventClient`](crate::client::EventClient).
///
/// These events report session start and stop, user attachment results and
/// transaction outcomes. Every event carries the endpoint it concerns.
///
/// # Examples
///
/// ```
/// use endpoint_events::event::{ClientEvent, EndpointId};
///
/// let endpoint_id = EndpointId::new("ep");
///
/// let started = ClientEvent::started(endpoint_id.clone());
/// assert!(started.is_lifecycle());
///
/// let attached = ClientEvent::UserAttached {
///     endpoint_id,
///     external_id: "userExternalId".to_string(),
/// };
/// assert!(attached.is_attachment());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// The session is started and ready for use.
    Started {
        /// The local endpoint.
        endpoint_id: EndpointId,
    },

    /// The session was stopped.
    Stopped {
        /// The local endpoint.
        endpoint_id: EndpointId,
    },

    /// The endpoint was attached to a user.
    UserAttached {
        /// The local endpoint.
        endpoint_id: EndpointId,
        /// External identifier of the user.
        external_id: String,
    },

    /// An attach request failed.
    AttachFailed {
        /// The local endpoint.
        endpoint_id: EndpointId,
        /// Why the request failed.
        reason: String,
    },

    /// The endpoint was detached from its user.
    UserDetached {
        /// The local endpoint.
        endpoint_id: EndpointId,
    },

    /// A transaction was submitted.
    TransactionSubmitted {
        /// The local endpoint.
        endpoint_id: EndpointId,
        /// The submitted transaction.
        transaction: TransactionId,
        /// Number of events sent in the block.
        event_count: usize,
    },

    /// A transaction was discarded without sending anything.
    TransactionDiscarded {
        /// The local endpoint.
        endpoint_id: EndpointId,
        /// The discarded transaction.
        transaction: TransactionId,
        /// Number of events dropped with the block.
        event_count: usize,
    },
}

impl ClientEvent {
    /// Returns the endpoint associated with this event.
    #[must_use]
    pub fn endpoint_id(&self) -> &EndpointId {
        match self {
            Self::Started { endpoint_id }
            | Self::Stopped { endpoint_id }
            | Self::UserAttached { endpoint_id, .. }
            | Self::AttachFailed { endpoint_id, .. }
            | Self::UserDetached { endpoint_id }
            | Self::TransactionSubmitted { endpoint_id, .. }
            | Self::TransactionDiscarded { endpoint_id, .. } => endpoint_id,
        }
    }

    /// Returns `true` if this is a session lifecycle event (started/stopped).
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Started { .. } | Self::Stopped { .. })
    }

    /// Returns `true` if this is a user attachment event.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        matches!(
            self,
            Self::UserAttached { .. } | Self::AttachFailed { .. } | Self::UserDetached { .. }
        )
    }

    /// Returns `true` if this is a transaction outcome event.
    #[must_use]
    pub fn is_transaction(&self) -> bool {
        matches!(
            self,
            Self::TransactionSubmitted { .. } | Self::TransactionDiscarded { .. }
        )
    }

    /// Creates a started event.
    #[must_use]
    pub fn started(endpoint_id: EndpointId) -> Self {
        Self::Started { endpoint_id }
    }

    /// Creates a stopped event.
    #[must_use]
    pub fn stopped(endpoint_id: EndpointId) -> Self {
        Self::Stopped { endpoint_id }
    }

    /// Creates an attach failure event.
    #[must_use]
    pub fn attach_failed(endpoint_id: EndpointId, reason: impl Into<String>) -> Self {
        Self::AttachFailed {
            endpoint_id,
            reason: reason.into(),
        }
    }
}
