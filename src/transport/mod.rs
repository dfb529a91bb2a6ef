// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transports carrying endpoint events between clients.
//!
//! A transport connects one endpoint to the event server, verifies user
//! credentials, answers listener discovery queries and delivers event
//! batches. Two implementations are provided:
//!
//! - [`LocalTransport`]: in-process server hosted by a [`LocalHub`], used by
//!   tests and single-process programs
//! - [`MqttTransport`]: events and endpoint presence over an MQTT broker
//!   (requires the `mqtt` feature)
//!
//! # Delivery Rule
//!
//! Both transports deliver an event of a batch to endpoint `E` iff `E` is
//! not the sender, `E` is attached to the sender's user, `E` listens for the
//! event type and the event is broadcast or targeted at `E`. Each recipient
//! receives its share of a batch as one batch, in the original order.

mod local;
#[cfg(feature = "mqtt")]
mod mqtt;
mod verifier;

pub use local::{LocalHub, LocalTransport};
#[cfg(feature = "mqtt")]
pub use mqtt::{DEFAULT_TOPIC_PREFIX, MqttTransport, MqttTransportBuilder};
pub use verifier::{StaticVerifier, TrustfulVerifier, UserVerifier};

use std::future::Future;

use tokio::sync::mpsc;

use crate::error::{AttachError, DiscoveryError, ProtocolError};
use crate::event::{EndpointId, EventBatch};

/// Connection of a single endpoint to an event server.
///
/// The returned futures are `Send` so that clients can drive them from
/// spawned tasks.
pub trait Transport: Send + Sync + 'static {
    /// Connects `endpoint`, advertising the event types it listens for.
    ///
    /// Returns the receiver of inbound batches for the endpoint.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the server cannot be reached or the
    /// endpoint is already connected.
    fn connect(
        &self,
        endpoint: &EndpointId,
        listened_fqns: &[String],
    ) -> impl Future<Output = Result<mpsc::UnboundedReceiver<EventBatch>, ProtocolError>> + Send;

    /// Disconnects `endpoint`, detaching it from its user if needed.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the endpoint is not connected or the
    /// server cannot be told.
    fn disconnect(
        &self,
        endpoint: &EndpointId,
    ) -> impl Future<Output = Result<(), ProtocolError>> + Send;

    /// Attaches `endpoint` to the user identified by `external_id`.
    ///
    /// # Errors
    ///
    /// Returns `AttachError` if the credentials are rejected or the server
    /// cannot be reached.
    fn attach_user(
        &self,
        endpoint: &EndpointId,
        external_id: &str,
        access_token: &str,
    ) -> impl Future<Output = Result<(), AttachError>> + Send;

    /// Detaches `endpoint` from its user.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the server cannot be told.
    fn detach_user(
        &self,
        endpoint: &EndpointId,
    ) -> impl Future<Output = Result<(), ProtocolError>> + Send;

    /// Returns the endpoints of the requester's user, other than the
    /// requester, that listen for every type in `fqns`.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError` if the requester is not attached or the
    /// server cannot be reached.
    fn find_listeners(
        &self,
        endpoint: &EndpointId,
        fqns: &[String],
    ) -> impl Future<Output = Result<Vec<EndpointId>, DiscoveryError>> + Send;

    /// Sends a batch of events from `batch.source`.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the batch cannot be handed to the server.
    fn send_batch(&self, batch: EventBatch)
    -> impl Future<Output = Result<(), ProtocolError>> + Send;
}
