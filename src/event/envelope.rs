// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire representation of events exchanged between endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CodecError;
use crate::family::EventFamily;

use super::EndpointId;

/// A single encoded event with its routing information.
///
/// A `None` target means the event is broadcast to every endpoint of the
/// user that listens for its type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Fully-qualified name of the event type.
    pub fqn: String,
    /// Receiving endpoint, or `None` for broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<EndpointId>,
    /// The encoded event payload.
    pub payload: Value,
}

impl EventEnvelope {
    /// Encodes a family event into an envelope.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Json` if the payload cannot be serialized.
    pub fn encode<F: EventFamily>(
        event: &F,
        target: Option<EndpointId>,
    ) -> Result<Self, CodecError> {
        Ok(Self {
            fqn: event.fqn().to_string(),
            target,
            payload: event.to_payload()?,
        })
    }

    /// Returns `true` if the event has no explicit target.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.target.is_none()
    }

    /// Returns `true` if the event is addressed to `endpoint`, either
    /// explicitly or by broadcast.
    #[must_use]
    pub fn is_addressed_to(&self, endpoint: &EndpointId) -> bool {
        self.target.as_ref().is_none_or(|target| target == endpoint)
    }
}

/// A group of events sent by one endpoint as a single delivery unit.
///
/// Immediate sends travel as a batch of one; a submitted transaction travels
/// as one batch holding all of its events. Receivers process a batch as a
/// whole, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    /// The sending endpoint.
    pub source: EndpointId,
    /// When the batch left the sender.
    pub sent_at: DateTime<Utc>,
    /// The events, in the order they were added.
    pub events: Vec<EventEnvelope>,
}

impl EventBatch {
    /// Creates a batch stamped with the current time.
    #[must_use]
    pub fn new(source: EndpointId, events: Vec<EventEnvelope>) -> Self {
        Self {
            source,
            sent_at: Utc::now(),
            events,
        }
    }

    /// Returns the number of events in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if the batch holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns the part of this batch that `recipient` should receive.
    ///
    /// An event reaches the recipient when the recipient is not the sender,
    /// the event is broadcast or targeted at the recipient, and `listens`
    /// accepts the event type. Returns `None` when nothing remains.
    #[must_use]
    pub fn for_recipient<L>(&self, recipient: &EndpointId, listens: L) -> Option<Self>
    where
        L: Fn(&str) -> bool,
    {
        if &self.source == recipient {
            return None;
        }

        let events: Vec<EventEnvelope> = self
            .events
            .iter()
            .filter(|event| event.is_addressed_to(recipient) && listens(&event.fqn))
            .cloned()
            .collect();

        if events.is_empty() {
            return None;
        }

        Some(Self {
            source: self.source.clone(),
            sent_at: self.sent_at,
            events,
        })
    }
}
