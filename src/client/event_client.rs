// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The event session client.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::error::{AttachError, DiscoveryError, Error, SessionError};
use crate::event::{ClientEvent, EndpointId, EventBatch, EventBus, EventEnvelope};
use crate::family::EventFamily;
use crate::subscription::{FamilyDispatch, LifecycleCallbacks, ListenerRegistry, SubscriptionId};
use crate::transaction::{TransactionId, TransactionTable};
use crate::transport::Transport;

use super::callbacks::{FindEventListenersCallback, UserAttachCallback};
use super::config::{ClientConfig, EventClientBuilder};
use super::family_handle::EventFamilyHandle;

/// Lifecycle state of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Built but not started yet.
    Created,
    /// Connected and dispatching inbound events.
    Started,
    /// Stopped for good.
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Started => write!(f, "started"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Internal phase, with the connect in progress made explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Starting,
    Started,
    Stopped,
}

struct ClientInner<T: Transport> {
    transport: T,
    endpoint_id: EndpointId,
    discovery_timeout: Duration,
    families: Vec<Arc<dyn FamilyDispatch>>,
    phase: Mutex<Phase>,
    attached_user: RwLock<Option<String>>,
    transactions: Mutex<TransactionTable>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
    lifecycle: LifecycleCallbacks,
    events: EventBus,
}

/// Client of the endpoint event subsystem.
///
/// A client owns one session: it is started once, attached to a user, used
/// to discover peers and exchange events, and finally stopped. Stopping is
/// terminal.
///
/// `EventClient` is cheaply cloneable (via `Arc`); clones share the session,
/// so a clone can be moved into callbacks and spawned tasks.
///
/// # Examples
///
/// ```no_run
/// use endpoint_events::client::EventClient;
/// use endpoint_events::family::thermostat::{
///     CHANGE_DEGREE_REQUEST_FQN, ChangeDegreeRequest, ThermostatEvent,
/// };
/// use endpoint_events::transport::LocalHub;
///
/// # async fn example() -> endpoint_events::Result<()> {
/// let hub = LocalHub::new();
/// let client = EventClient::builder(hub.transport())
///     .with_family::<ThermostatEvent>()
///     .build();
///
/// client.start().await?;
/// client.attach_user("userExternalId", "userAccessToken").await?;
///
/// let listeners = client.find_event_listeners(&[CHANGE_DEGREE_REQUEST_FQN]).await?;
/// println!("{} thermostats", listeners.len());
///
/// let thermostat = client.family::<ThermostatEvent>()?;
/// thermostat.send_event_to_all(ChangeDegreeRequest::new(10)).await?;
///
/// client.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct EventClient<T: Transport> {
    inner: Arc<ClientInner<T>>,
}

impl<T: Transport> Clone for EventClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> EventClient<T> {
    /// Creates a builder for a client using `transport`.
    #[must_use]
    pub fn builder(transport: T) -> EventClientBuilder<T> {
        EventClientBuilder::new(transport)
    }

    pub(crate) fn from_parts(
        transport: T,
        config: ClientConfig,
        families: Vec<Arc<dyn FamilyDispatch>>,
    ) -> Self {
        let endpoint_id = config.endpoint_id.unwrap_or_else(EndpointId::generate);
        Self {
            inner: Arc::new(ClientInner {
                transport,
                endpoint_id,
                discovery_timeout: config.discovery_timeout,
                families,
                phase: Mutex::new(Phase::Created),
                attached_user: RwLock::new(None),
                transactions: Mutex::new(TransactionTable::new()),
                dispatch_task: Mutex::new(None),
                lifecycle: LifecycleCallbacks::new(),
                events: EventBus::with_capacity(config.event_capacity),
            }),
        }
    }

    // ========== Session ==========

    /// Returns the identifier of the local endpoint.
    #[must_use]
    pub fn endpoint_id(&self) -> &EndpointId {
        &self.inner.endpoint_id
    }

    /// Returns the current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        match *self.inner.phase.lock() {
            Phase::Created | Phase::Starting => SessionState::Created,
            Phase::Started => SessionState::Started,
            Phase::Stopped => SessionState::Stopped,
        }
    }

    /// Returns the transport used by the client.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Returns the names of the registered event families.
    #[must_use]
    pub fn family_names(&self) -> Vec<&'static str> {
        self.inner
            .families
            .iter()
            .map(|family| family.family_name())
            .collect()
    }

    /// Starts the session.
    ///
    /// Connects the transport, advertising every event type of the
    /// registered families, and starts dispatching inbound events. On
    /// success the started callbacks run and [`ClientEvent::Started`] is
    /// published.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlreadyStarted` or `SessionError::Stopped` when
    /// the session is not freshly created, and `Error::Protocol` when the
    /// transport cannot connect. A failed start leaves the session created.
    pub async fn start(&self) -> Result<(), Error> {
        {
            let mut phase = self.inner.phase.lock();
            match *phase {
                Phase::Created => *phase = Phase::Starting,
                Phase::Starting | Phase::Started => return Err(SessionError::AlreadyStarted.into()),
                Phase::Stopped => return Err(SessionError::Stopped.into()),
            }
        }

        let endpoint = &self.inner.endpoint_id;
        let fqns = self.listened_fqns();

        let inbound = match self.inner.transport.connect(endpoint, &fqns).await {
            Ok(inbound) => inbound,
            Err(e) => {
                let mut phase = self.inner.phase.lock();
                if *phase == Phase::Starting {
                    *phase = Phase::Created;
                }
                tracing::warn!(%endpoint, error = %e, "Failed to start event client");
                return Err(e.into());
            }
        };

        let stopped_meanwhile = {
            let mut phase = self.inner.phase.lock();
            if *phase == Phase::Starting {
                *phase = Phase::Started;
                let task = tokio::spawn(dispatch_inbound(
                    endpoint.clone(),
                    self.inner.families.clone(),
                    inbound,
                ));
                *self.inner.dispatch_task.lock() = Some(task);
                false
            } else {
                true
            }
        };

        if stopped_meanwhile {
            if let Err(e) = self.inner.transport.disconnect(endpoint).await {
                tracing::warn!(%endpoint, error = %e, "Failed to disconnect after concurrent stop");
            }
            return Err(SessionError::Stopped.into());
        }

        tracing::info!(%endpoint, fqns = fqns.len(), "Event client started");
        self.inner.lifecycle.dispatch_started(endpoint);
        self.inner.events.publish(ClientEvent::started(endpoint.clone()));
        Ok(())
    }

    /// Stops the session.
    ///
    /// Safe to call in any state and more than once. Open transactions are
    /// discarded, inbound dispatch ends and the transport is disconnected.
    /// Only the first call runs the stopped callbacks and publishes
    /// [`ClientEvent::Stopped`].
    pub async fn stop(&self) {
        let previous = std::mem::replace(&mut *self.inner.phase.lock(), Phase::Stopped);
        if previous == Phase::Stopped {
            return;
        }

        let endpoint = &self.inner.endpoint_id;

        let leaked = self.inner.transactions.lock().discard_all();
        if leaked > 0 {
            tracing::warn!(%endpoint, transactions = leaked, "Discarding open transactions on stop");
        }

        if let Some(task) = self.inner.dispatch_task.lock().take() {
            task.abort();
        }

        if previous == Phase::Started
            && let Err(e) = self.inner.transport.disconnect(endpoint).await
        {
            tracing::warn!(%endpoint, error = %e, "Failed to disconnect transport");
        }

        *self.inner.attached_user.write() = None;

        tracing::info!(%endpoint, "Event client stopped");
        self.inner.lifecycle.dispatch_stopped(endpoint);
        self.inner.events.publish(ClientEvent::stopped(endpoint.clone()));
    }

    /// Subscribes to lifecycle events of the client.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Registers a callback run once the session has started.
    pub fn on_started<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&EndpointId) + Send + Sync + 'static,
    {
        self.inner.lifecycle.on_started(callback)
    }

    /// Registers a callback run once the session has stopped.
    pub fn on_stopped<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&EndpointId) + Send + Sync + 'static,
    {
        self.inner.lifecycle.on_stopped(callback)
    }

    /// Removes a started or stopped callback.
    ///
    /// Returns `true` if a callback was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.lifecycle.unsubscribe(id)
    }

    // ========== User Attachment ==========

    /// Attaches the endpoint to a user.
    ///
    /// Publishes [`ClientEvent::UserAttached`] on success and
    /// [`ClientEvent::AttachFailed`] on failure.
    ///
    /// # Errors
    ///
    /// Returns `AttachError::SessionNotStarted` before start,
    /// `AttachError::InvalidCredentials` for an empty external ID and the
    /// transport's verdict otherwise.
    pub async fn attach_user(&self, external_id: &str, access_token: &str) -> Result<(), AttachError> {
        let result = self.try_attach(external_id, access_token).await;
        let endpoint = &self.inner.endpoint_id;

        match &result {
            Ok(()) => {
                *self.inner.attached_user.write() = Some(external_id.to_string());
                tracing::info!(%endpoint, user = %external_id, "Endpoint attached to user");
                self.inner.events.publish(ClientEvent::UserAttached {
                    endpoint_id: endpoint.clone(),
                    external_id: external_id.to_string(),
                });
            }
            Err(e) => {
                tracing::warn!(%endpoint, user = %external_id, error = %e, "Attach request failed");
                self.inner
                    .events
                    .publish(ClientEvent::attach_failed(endpoint.clone(), e.to_string()));
            }
        }

        result
    }

    async fn try_attach(&self, external_id: &str, access_token: &str) -> Result<(), AttachError> {
        if !self.is_started() {
            return Err(AttachError::SessionNotStarted);
        }
        if external_id.trim().is_empty() {
            return Err(AttachError::InvalidCredentials(
                "external id is empty".to_string(),
            ));
        }

        self.inner
            .transport
            .attach_user(&self.inner.endpoint_id, external_id, access_token)
            .await
    }

    /// Attaches the endpoint to a user in the background.
    ///
    /// `callback` is invoked exactly once with the result, on a spawned task.
    pub fn attach_user_with_callback<C>(
        &self,
        external_id: impl Into<String>,
        access_token: impl Into<String>,
        callback: C,
    ) -> JoinHandle<()>
    where
        C: UserAttachCallback,
    {
        let client = self.clone();
        let external_id = external_id.into();
        let access_token = access_token.into();
        tokio::spawn(async move {
            let result = client.attach_user(&external_id, &access_token).await;
            callback.on_attach_result(result);
        })
    }

    /// Detaches the endpoint from its user.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotStarted` before start, `Error::NotAttached`
    /// if no user is attached and `Error::Protocol` if the transport fails.
    pub async fn detach_user(&self) -> Result<(), Error> {
        self.ensure_started()?;
        self.ensure_attached()?;

        let endpoint = &self.inner.endpoint_id;
        self.inner.transport.detach_user(endpoint).await?;
        *self.inner.attached_user.write() = None;

        tracing::info!(%endpoint, "Endpoint detached from user");
        self.inner.events.publish(ClientEvent::UserDetached {
            endpoint_id: endpoint.clone(),
        });
        Ok(())
    }

    /// Returns `true` if the endpoint is attached to a user.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.inner.attached_user.read().is_some()
    }

    /// Returns the external ID of the attached user.
    #[must_use]
    pub fn attached_user(&self) -> Option<String> {
        self.inner.attached_user.read().clone()
    }

    // ========== Discovery ==========

    /// Finds the endpoints of the attached user that listen for every event
    /// type in `fqns`.
    ///
    /// An empty `fqns` yields an empty list without contacting the server.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::InvalidQuery` for a blank type name,
    /// `SessionNotStarted` or `NotAttached` when the session is not ready,
    /// `Timeout` when no answer arrives within the discovery timeout and
    /// `Unreachable` when the server cannot be contacted.
    pub async fn find_event_listeners(&self, fqns: &[&str]) -> Result<Vec<EndpointId>, DiscoveryError> {
        if fqns.is_empty() {
            return Ok(Vec::new());
        }
        if fqns.iter().any(|fqn| fqn.trim().is_empty()) {
            return Err(DiscoveryError::InvalidQuery(
                "event type name is blank".to_string(),
            ));
        }
        if !self.is_started() {
            return Err(DiscoveryError::SessionNotStarted);
        }
        if !self.is_attached() {
            return Err(DiscoveryError::NotAttached);
        }

        let endpoint = &self.inner.endpoint_id;
        let query: Vec<String> = fqns.iter().map(ToString::to_string).collect();
        let timeout = self.inner.discovery_timeout;

        let result = match tokio::time::timeout(
            timeout,
            self.inner.transport.find_listeners(endpoint, &query),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                // Safe: timeout in practical use will never exceed u64::MAX milliseconds
                #[allow(clippy::cast_possible_truncation)]
                let timeout_ms = timeout.as_millis() as u64;
                Err(DiscoveryError::Timeout(timeout_ms))
            }
        };

        match &result {
            Ok(listeners) => {
                tracing::debug!(%endpoint, query = ?query, found = listeners.len(), "Event listeners received");
            }
            Err(e) => {
                tracing::warn!(%endpoint, query = ?query, error = %e, "Event listeners request failed");
            }
        }
        result
    }

    /// Finds event listeners in the background.
    ///
    /// `callback` is invoked exactly once, on a spawned task.
    pub fn find_event_listeners_with_callback<C>(&self, fqns: &[&str], callback: C) -> JoinHandle<()>
    where
        C: FindEventListenersCallback,
    {
        let client = self.clone();
        let fqns: Vec<String> = fqns.iter().map(ToString::to_string).collect();
        tokio::spawn(async move {
            let query: Vec<&str> = fqns.iter().map(String::as_str).collect();
            match client.find_event_listeners(&query).await {
                Ok(listeners) => callback.on_event_listeners_received(listeners),
                Err(e) => callback.on_request_failed(e),
            }
        })
    }

    // ========== Families ==========

    /// Returns the handle of a registered event family.
    ///
    /// # Errors
    ///
    /// Returns `Error::FamilyNotRegistered` if `F` was not registered on the
    /// builder.
    pub fn family<F: EventFamily>(&self) -> Result<EventFamilyHandle<F, T>, Error> {
        self.inner
            .families
            .iter()
            .find_map(|family| {
                Arc::clone(family)
                    .into_any()
                    .downcast::<ListenerRegistry<F>>()
                    .ok()
            })
            .map(|registry| EventFamilyHandle::new(self.clone(), registry))
            .ok_or(Error::FamilyNotRegistered(F::NAME))
    }

    // ========== Transactions ==========

    /// Opens a new transaction (event block).
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotStarted` or `SessionError::Stopped` when
    /// the session is not running.
    pub fn start_events_block(&self) -> Result<TransactionId, Error> {
        self.ensure_started()?;
        let id = self.inner.transactions.lock().start();
        tracing::debug!(endpoint = %self.inner.endpoint_id, transaction = %id, "Opened events block");
        Ok(id)
    }

    /// Sends every event of an open transaction as one batch and closes it.
    ///
    /// An empty transaction is closed without sending anything.
    ///
    /// # Errors
    ///
    /// Returns `TransactionError::Closed` or `TransactionError::Unknown` for
    /// an id that is not open and `Error::NotAttached` (leaving the
    /// transaction open) when no user is attached. A transport failure is
    /// returned after the transaction has been closed.
    pub async fn submit_events_block(&self, id: TransactionId) -> Result<(), Error> {
        self.ensure_started()?;
        self.inner.transactions.lock().check_open(id)?;
        self.ensure_attached()?;

        let events = self.inner.transactions.lock().submit(id)?;
        let event_count = events.len();
        let endpoint = &self.inner.endpoint_id;

        if events.is_empty() {
            tracing::debug!(%endpoint, transaction = %id, "Submitted empty events block");
        } else {
            let batch = EventBatch::new(endpoint.clone(), events);
            if let Err(e) = self.inner.transport.send_batch(batch).await {
                tracing::warn!(%endpoint, transaction = %id, error = %e, "Failed to send events block");
                return Err(e.into());
            }
            tracing::debug!(%endpoint, transaction = %id, events = event_count, "Submitted events block");
        }

        self.inner.events.publish(ClientEvent::TransactionSubmitted {
            endpoint_id: endpoint.clone(),
            transaction: id,
            event_count,
        });
        Ok(())
    }

    /// Closes an open transaction without sending its events.
    ///
    /// Returns the number of discarded events.
    ///
    /// # Errors
    ///
    /// Returns `TransactionError::Closed` or `TransactionError::Unknown` for
    /// an id that is not open.
    pub fn remove_events_block(&self, id: TransactionId) -> Result<usize, Error> {
        self.ensure_started()?;
        let event_count = self.inner.transactions.lock().discard(id)?;
        let endpoint = &self.inner.endpoint_id;

        tracing::debug!(%endpoint, transaction = %id, events = event_count, "Removed events block");
        self.inner.events.publish(ClientEvent::TransactionDiscarded {
            endpoint_id: endpoint.clone(),
            transaction: id,
            event_count,
        });
        Ok(event_count)
    }

    /// Returns the number of open transactions.
    #[must_use]
    pub fn open_events_blocks(&self) -> usize {
        self.inner.transactions.lock().open_count()
    }

    // ========== Internals used by family handles ==========

    pub(crate) fn add_to_block(&self, id: TransactionId, envelope: EventEnvelope) -> Result<(), Error> {
        self.ensure_started()?;
        self.inner.transactions.lock().add(id, envelope)?;
        Ok(())
    }

    pub(crate) async fn send_now(&self, envelope: EventEnvelope) -> Result<(), Error> {
        self.ensure_started()?;
        self.ensure_attached()?;

        let endpoint = &self.inner.endpoint_id;
        tracing::debug!(
            %endpoint,
            fqn = %envelope.fqn,
            to = ?envelope.target.as_ref().map(EndpointId::as_str),
            "Sending event"
        );
        let batch = EventBatch::new(endpoint.clone(), vec![envelope]);
        self.inner.transport.send_batch(batch).await?;
        Ok(())
    }

    fn is_started(&self) -> bool {
        *self.inner.phase.lock() == Phase::Started
    }

    fn ensure_started(&self) -> Result<(), SessionError> {
        match *self.inner.phase.lock() {
            Phase::Started => Ok(()),
            Phase::Created | Phase::Starting => Err(SessionError::NotStarted),
            Phase::Stopped => Err(SessionError::Stopped),
        }
    }

    fn ensure_attached(&self) -> Result<(), Error> {
        if self.is_attached() {
            Ok(())
        } else {
            Err(Error::NotAttached)
        }
    }

    fn listened_fqns(&self) -> Vec<String> {
        let mut fqns: Vec<String> = Vec::new();
        for fqn in self
            .inner
            .families
            .iter()
            .flat_map(|family| family.event_types().iter())
        {
            if !fqns.iter().any(|known| known == fqn) {
                fqns.push((*fqn).to_string());
            }
        }
        fqns
    }
}

impl<T: Transport> std::fmt::Debug for EventClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventClient")
            .field("endpoint_id", &self.inner.endpoint_id)
            .field("state", &self.state())
            .field("attached", &self.is_attached())
            .field("families", &self.family_names())
            .finish_non_exhaustive()
    }
}

/// Dispatches inbound batches to the registered families, one batch at a
/// time and in arrival order.
///
/// An event whose type no family defines goes to the unknown-event
/// listeners of every family.
async fn dispatch_inbound(
    endpoint: EndpointId,
    families: Vec<Arc<dyn FamilyDispatch>>,
    mut inbound: mpsc::UnboundedReceiver<EventBatch>,
) {
    while let Some(batch) = inbound.recv().await {
        tracing::debug!(
            %endpoint,
            source = %batch.source,
            events = batch.len(),
            "Received event batch"
        );
        for envelope in &batch.events {
            let owner = families
                .iter()
                .find(|family| family.event_types().contains(&envelope.fqn.as_str()));
            match owner {
                Some(family) => family.dispatch_envelope(envelope, &batch.source),
                None => {
                    tracing::debug!(
                        %endpoint,
                        fqn = %envelope.fqn,
                        source = %batch.source,
                        "Event type not owned by any family"
                    );
                    // Each registry hands a foreign type to its unknown-event listeners.
                    for family in &families {
                        family.dispatch_envelope(envelope, &batch.source);
                    }
                }
            }
        }
    }
    tracing::debug!(%endpoint, "Inbound event channel closed");
}
