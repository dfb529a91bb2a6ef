// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-process event server.
//!
//! A [`LocalHub`] keeps the registry of connected endpoints, the users they
//! are attached to and the event types they listen for. Every client gets
//! its own [`LocalTransport`] handle to the hub.
//!
//! # Examples
//!
//! ```
//! use endpoint_events::transport::{LocalHub, StaticVerifier};
//!
//! let hub = LocalHub::with_verifier(
//!     StaticVerifier::new().with_user("userExternalId", "userAccessToken"),
//! );
//! let transport = hub.transport();
//! assert_eq!(hub.endpoint_count(), 0);
//! # drop(transport);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::error::{AttachError, DiscoveryError, ProtocolError};
use crate::event::{EndpointId, EventBatch};

use super::Transport;
use super::verifier::{TrustfulVerifier, UserVerifier};

/// A connected endpoint as seen by the hub.
struct EndpointEntry {
    user: Option<String>,
    fqns: Vec<String>,
    inbox: mpsc::UnboundedSender<EventBatch>,
}

impl EndpointEntry {
    fn listens(&self, fqn: &str) -> bool {
        self.fqns.iter().any(|listened| listened == fqn)
    }
}

struct HubInner {
    verifier: Arc<dyn UserVerifier>,
    endpoints: RwLock<HashMap<EndpointId, EndpointEntry>>,
    reachable: AtomicBool,
}

/// In-process event server shared by any number of clients.
///
/// `LocalHub` is cheaply cloneable; clones refer to the same server.
#[derive(Clone)]
pub struct LocalHub {
    inner: Arc<HubInner>,
}

impl LocalHub {
    /// Creates a hub that accepts every user.
    #[must_use]
    pub fn new() -> Self {
        Self::with_verifier(TrustfulVerifier)
    }

    /// Creates a hub that checks credentials with `verifier`.
    #[must_use]
    pub fn with_verifier(verifier: impl UserVerifier + 'static) -> Self {
        Self {
            inner: Arc::new(HubInner {
                verifier: Arc::new(verifier),
                endpoints: RwLock::new(HashMap::new()),
                reachable: AtomicBool::new(true),
            }),
        }
    }

    /// Returns a new transport handle connected to this hub.
    #[must_use]
    pub fn transport(&self) -> LocalTransport {
        LocalTransport { hub: self.clone() }
    }

    /// Makes the hub reachable or unreachable.
    ///
    /// While unreachable, connect, attach, discovery and send requests fail
    /// as if the server could not be contacted.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::Release);
        tracing::debug!(reachable, "Local hub reachability changed");
    }

    /// Returns whether the hub is reachable.
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.inner.reachable.load(Ordering::Acquire)
    }

    /// Returns the number of connected endpoints.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.inner.endpoints.read().len()
    }

    /// Returns the user `endpoint` is attached to, if any.
    #[must_use]
    pub fn attached_user(&self, endpoint: &EndpointId) -> Option<String> {
        self.inner
            .endpoints
            .read()
            .get(endpoint)
            .and_then(|entry| entry.user.clone())
    }

    fn register(
        &self,
        endpoint: &EndpointId,
        fqns: &[String],
    ) -> Result<mpsc::UnboundedReceiver<EventBatch>, ProtocolError> {
        if !self.is_reachable() {
            return Err(ProtocolError::Unreachable);
        }

        let mut endpoints = self.inner.endpoints.write();
        if endpoints.contains_key(endpoint) {
            return Err(ProtocolError::ConnectionFailed(format!(
                "endpoint {endpoint} is already connected"
            )));
        }

        let (inbox, rx) = mpsc::unbounded_channel();
        endpoints.insert(
            endpoint.clone(),
            EndpointEntry {
                user: None,
                fqns: fqns.to_vec(),
                inbox,
            },
        );
        tracing::debug!(%endpoint, fqns = fqns.len(), "Endpoint connected to local hub");
        Ok(rx)
    }

    fn unregister(&self, endpoint: &EndpointId) -> Result<(), ProtocolError> {
        if self.inner.endpoints.write().remove(endpoint).is_none() {
            return Err(ProtocolError::UnknownEndpoint(endpoint.to_string()));
        }
        tracing::debug!(%endpoint, "Endpoint disconnected from local hub");
        Ok(())
    }

    fn attach(
        &self,
        endpoint: &EndpointId,
        external_id: &str,
        access_token: &str,
    ) -> Result<(), AttachError> {
        if !self.is_reachable() {
            return Err(AttachError::Unreachable("local hub is unreachable".to_string()));
        }

        self.inner.verifier.verify(external_id, access_token)?;

        let mut endpoints = self.inner.endpoints.write();
        let entry = endpoints.get_mut(endpoint).ok_or_else(|| {
            AttachError::Unreachable(format!("endpoint {endpoint} is not connected"))
        })?;
        entry.user = Some(external_id.to_string());
        tracing::debug!(%endpoint, user = %external_id, "Endpoint attached on local hub");
        Ok(())
    }

    fn detach(&self, endpoint: &EndpointId) -> Result<(), ProtocolError> {
        if !self.is_reachable() {
            return Err(ProtocolError::Unreachable);
        }

        let mut endpoints = self.inner.endpoints.write();
        let entry = endpoints
            .get_mut(endpoint)
            .ok_or_else(|| ProtocolError::UnknownEndpoint(endpoint.to_string()))?;
        entry.user = None;
        Ok(())
    }

    fn listeners(
        &self,
        endpoint: &EndpointId,
        fqns: &[String],
    ) -> Result<Vec<EndpointId>, DiscoveryError> {
        if !self.is_reachable() {
            return Err(DiscoveryError::Unreachable(
                "local hub is unreachable".to_string(),
            ));
        }

        let endpoints = self.inner.endpoints.read();
        let user = endpoints
            .get(endpoint)
            .and_then(|entry| entry.user.as_deref())
            .ok_or(DiscoveryError::NotAttached)?;

        let mut found: Vec<EndpointId> = endpoints
            .iter()
            .filter(|(id, entry)| {
                *id != endpoint
                    && entry.user.as_deref() == Some(user)
                    && fqns.iter().all(|fqn| entry.listens(fqn))
            })
            .map(|(id, _)| id.clone())
            .collect();
        found.sort();
        Ok(found)
    }

    fn route(&self, batch: &EventBatch) -> Result<(), ProtocolError> {
        if !self.is_reachable() {
            return Err(ProtocolError::Unreachable);
        }

        // Exclusive so that concurrent batches reach every inbox in the same order.
        let endpoints = self.inner.endpoints.write();
        let Some(user) = endpoints
            .get(&batch.source)
            .and_then(|entry| entry.user.as_deref())
        else {
            return Err(ProtocolError::UnknownEndpoint(batch.source.to_string()));
        };

        for target in batch.events.iter().filter_map(|event| event.target.as_ref()) {
            let known = endpoints
                .get(target)
                .is_some_and(|entry| entry.user.as_deref() == Some(user));
            if !known {
                tracing::debug!(source = %batch.source, to = %target, "Dropping event for unknown endpoint");
            }
        }

        let mut delivered = 0usize;
        for (id, entry) in endpoints.iter() {
            if entry.user.as_deref() != Some(user) {
                continue;
            }
            let Some(part) = batch.for_recipient(id, |fqn| entry.listens(fqn)) else {
                continue;
            };
            let count = part.len();
            if entry.inbox.send(part).is_err() {
                tracing::debug!(recipient = %id, "Recipient inbox closed");
                continue;
            }
            delivered += count;
        }

        tracing::debug!(
            source = %batch.source,
            events = batch.len(),
            delivered,
            "Routed batch on local hub"
        );
        Ok(())
    }
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalHub")
            .field("endpoints", &self.endpoint_count())
            .field("reachable", &self.is_reachable())
            .finish_non_exhaustive()
    }
}

/// Transport handle of one client on a [`LocalHub`].
#[derive(Debug, Clone)]
pub struct LocalTransport {
    hub: LocalHub,
}

impl LocalTransport {
    /// Returns the hub this transport talks to.
    #[must_use]
    pub fn hub(&self) -> &LocalHub {
        &self.hub
    }
}

impl Transport for LocalTransport {
    async fn connect(
        &self,
        endpoint: &EndpointId,
        listened_fqns: &[String],
    ) -> Result<mpsc::UnboundedReceiver<EventBatch>, ProtocolError> {
        self.hub.register(endpoint, listened_fqns)
    }

    async fn disconnect(&self, endpoint: &EndpointId) -> Result<(), ProtocolError> {
        self.hub.unregister(endpoint)
    }

    async fn attach_user(
        &self,
        endpoint: &EndpointId,
        external_id: &str,
        access_token: &str,
    ) -> Result<(), AttachError> {
        self.hub.attach(endpoint, external_id, access_token)
    }

    async fn detach_user(&self, endpoint: &EndpointId) -> Result<(), ProtocolError> {
        self.hub.detach(endpoint)
    }

    async fn find_listeners(
        &self,
        endpoint: &EndpointId,
        fqns: &[String],
    ) -> Result<Vec<EndpointId>, DiscoveryError> {
        self.hub.listeners(endpoint, fqns)
    }

    async fn send_batch(&self, batch: EventBatch) -> Result<(), ProtocolError> {
        self.hub.route(&batch)
    }
}
