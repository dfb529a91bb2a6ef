// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT transport for endpoint events.
//!
//! Topics live below a configurable prefix:
//!
//! - `<prefix>/users/<user>/events`: JSON [`EventBatch`] messages of a user
//! - `<prefix>/presence/<instance>`: retained presence record
//!   `{"endpoint": ..., "user": ..., "fqns": [...]}` of each attached
//!   transport instance
//!
//! User and instance segments are percent-encoded. Receivers apply the
//! delivery rule locally, so every attached endpoint of a user sees every
//! batch but only hands its own share to the client. The connection's
//! last-will is an empty retained message on its presence topic, so the
//! broker forgets an endpoint whose process dies.
//!
//! # Examples
//!
//! ```no_run
//! use endpoint_events::transport::MqttTransport;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), endpoint_events::error::ProtocolError> {
//! let transport = MqttTransport::builder()
//!     .host("192.168.1.50")
//!     .port(1883)
//!     .credentials("user", "password")
//!     .discovery_window(Duration::from_millis(500))
//!     .build()
//!     .await?;
//!
//! if transport.is_connected() {
//!     println!("Connected to MQTT broker");
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rumqttc::{AsyncClient, EventLoop, LastWill, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::{AttachError, DiscoveryError, ProtocolError};
use crate::event::{EndpointId, EventBatch};

use super::Transport;
use super::verifier::{TrustfulVerifier, UserVerifier};

/// Global counter for generating unique client IDs.
static TRANSPORT_CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Default prefix of every topic used by the transport.
pub const DEFAULT_TOPIC_PREFIX: &str = "endpoint-events";

/// Configuration for an MQTT transport.
#[derive(Clone)]
struct MqttTransportConfig {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    keep_alive: Duration,
    connection_timeout: Duration,
    topic_prefix: String,
    discovery_window: Duration,
    verifier: Arc<dyn UserVerifier>,
}

impl Default for MqttTransportConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1883,
            credentials: None,
            keep_alive: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            discovery_window: Duration::from_secs(1),
            verifier: Arc::new(TrustfulVerifier),
        }
    }
}

impl std::fmt::Debug for MqttTransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttTransportConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("has_credentials", &self.credentials.is_some())
            .field("keep_alive", &self.keep_alive)
            .field("connection_timeout", &self.connection_timeout)
            .field("topic_prefix", &self.topic_prefix)
            .field("discovery_window", &self.discovery_window)
            .finish_non_exhaustive()
    }
}

/// Retained record advertising an attached endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Presence {
    endpoint: EndpointId,
    user: String,
    fqns: Vec<String>,
}

/// The endpoint connected through this transport.
struct Session {
    endpoint: EndpointId,
    fqns: Vec<String>,
    inbound: mpsc::UnboundedSender<EventBatch>,
    user: Option<String>,
}

/// An MQTT connection carrying the events of one endpoint.
///
/// `MqttTransport` is cheaply cloneable (via `Arc`); clones share the same
/// broker connection and endpoint session.
#[derive(Clone)]
pub struct MqttTransport {
    inner: Arc<MqttTransportInner>,
}

struct MqttTransportInner {
    /// The MQTT async client for publishing.
    client: AsyncClient,
    /// Configuration used for this connection.
    config: MqttTransportConfig,
    /// Retained topic holding this instance's presence record.
    presence_topic: String,
    /// Connection status.
    connected: AtomicBool,
    /// Endpoint connected through this transport, if any.
    session: RwLock<Option<Session>>,
    /// Presence collectors of the discoveries in progress, by request.
    collectors: RwLock<HashMap<u64, mpsc::UnboundedSender<Presence>>>,
    next_collector: AtomicU64,
    /// Orders the wildcard subscribe/unsubscribe of overlapping discoveries.
    presence_subscription: tokio::sync::Mutex<()>,
}

impl MqttTransport {
    /// Creates a new builder for configuring an MQTT transport.
    #[must_use]
    pub fn builder() -> MqttTransportBuilder {
        MqttTransportBuilder::default()
    }

    /// Returns whether the broker connection is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Returns the host address of the broker.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.inner.config.host
    }

    /// Returns the port of the broker.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.config.port
    }

    /// Returns the prefix of every topic used by the transport.
    #[must_use]
    pub fn topic_prefix(&self) -> &str {
        &self.inner.config.topic_prefix
    }

    fn events_topic(&self, user: &str) -> String {
        events_topic(&self.inner.config.topic_prefix, user)
    }

    fn presence_filter(&self) -> String {
        format!("{}/presence/+", self.inner.config.topic_prefix)
    }

    /// Returns the user of the connected session, if `endpoint` is the
    /// connected endpoint and attached.
    fn attached_user(&self, endpoint: &EndpointId) -> Option<String> {
        self.inner
            .session
            .read()
            .as_ref()
            .filter(|session| &session.endpoint == endpoint)
            .and_then(|session| session.user.clone())
    }

    /// Removes the retained presence record of this instance.
    async fn clear_presence(&self) -> Result<(), ProtocolError> {
        let topic = &self.inner.presence_topic;
        self.inner
            .client
            .publish(topic, QoS::AtLeastOnce, true, Vec::<u8>::new())
            .await?;
        tracing::debug!(topic = %topic, "Cleared endpoint presence");
        Ok(())
    }

    /// Stops listening for the events of `user`.
    async fn leave_user(&self, user: &str) {
        let topic = self.events_topic(user);
        if let Err(e) = self.inner.client.unsubscribe(&topic).await {
            tracing::warn!(topic = %topic, error = %e, "Failed to unsubscribe from events topic");
        }
    }

    /// Registers a presence collector, subscribing to the wildcard first
    /// if no other discovery is running.
    async fn begin_discovery(
        &self,
    ) -> Result<(u64, mpsc::UnboundedReceiver<Presence>), ProtocolError> {
        let _ordered = self.inner.presence_subscription.lock().await;

        let id = self.inner.next_collector.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.collectors.write().insert(id, tx);

        // Subscribing again also makes the broker replay retained records
        // for the new collector.
        if let Err(e) = self
            .inner
            .client
            .subscribe(self.presence_filter(), QoS::AtLeastOnce)
            .await
        {
            self.inner.collectors.write().remove(&id);
            return Err(e.into());
        }
        Ok((id, rx))
    }

    /// Drops a presence collector, unsubscribing when it was the last one.
    async fn end_discovery(&self, id: u64) {
        let _ordered = self.inner.presence_subscription.lock().await;

        let last = {
            let mut collectors = self.inner.collectors.write();
            collectors.remove(&id);
            collectors.is_empty()
        };
        if last {
            let filter = self.presence_filter();
            if let Err(e) = self.inner.client.unsubscribe(&filter).await {
                tracing::warn!(topic = %filter, error = %e, "Failed to unsubscribe from presence topic");
            }
        }
    }

    /// Routes an incoming message to the session or the discovery collectors.
    fn route_message(&self, topic: &str, payload: &[u8]) {
        let presence_root = format!("{}/presence/", self.inner.config.topic_prefix);
        if topic.starts_with(&presence_root) {
            self.collect_presence(topic, payload);
        } else {
            self.deliver_batch(topic, payload);
        }
    }

    fn collect_presence(&self, topic: &str, payload: &[u8]) {
        if payload.is_empty() {
            return;
        }
        let collectors: Vec<mpsc::UnboundedSender<Presence>> =
            self.inner.collectors.read().values().cloned().collect();
        if collectors.is_empty() {
            return;
        }

        match serde_json::from_slice::<Presence>(payload) {
            Ok(presence) => {
                tracing::debug!(
                    topic = %topic,
                    endpoint = %presence.endpoint,
                    collectors = collectors.len(),
                    "Discovered endpoint"
                );
                for collector in collectors {
                    // Ignore send errors - the discovery may have finished
                    let _ = collector.send(presence.clone());
                }
            }
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "Ignoring malformed presence record");
            }
        }
    }

    fn deliver_batch(&self, topic: &str, payload: &[u8]) {
        let session = self.inner.session.read();
        let Some(session) = session.as_ref() else {
            return;
        };
        let Some(user) = session.user.as_deref() else {
            return;
        };
        if topic != self.events_topic(user) {
            tracing::debug!(topic = %topic, "Ignoring message for another user");
            return;
        }

        let batch: EventBatch = match serde_json::from_slice(payload) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "Dropping malformed event batch");
                return;
            }
        };
        let Some(part) = batch.for_recipient(&session.endpoint, |fqn| {
            session.fqns.iter().any(|listened| listened == fqn)
        }) else {
            return;
        };
        tracing::debug!(
            source = %part.source,
            events = part.len(),
            "Routing batch to endpoint"
        );
        // Ignore send errors - the client may have stopped
        let _ = session.inbound.send(part);
    }
}

impl std::fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttTransport")
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Transport for MqttTransport {
    async fn connect(
        &self,
        endpoint: &EndpointId,
        listened_fqns: &[String],
    ) -> Result<mpsc::UnboundedReceiver<EventBatch>, ProtocolError> {
        if !self.is_connected() {
            return Err(ProtocolError::Unreachable);
        }

        let mut session = self.inner.session.write();
        if let Some(existing) = session.as_ref() {
            return Err(ProtocolError::ConnectionFailed(format!(
                "transport already carries endpoint {}",
                existing.endpoint
            )));
        }

        let (inbound, rx) = mpsc::unbounded_channel();
        *session = Some(Session {
            endpoint: endpoint.clone(),
            fqns: listened_fqns.to_vec(),
            inbound,
            user: None,
        });
        tracing::debug!(%endpoint, fqns = listened_fqns.len(), "Endpoint bound to MQTT transport");
        Ok(rx)
    }

    async fn disconnect(&self, endpoint: &EndpointId) -> Result<(), ProtocolError> {
        let user = {
            let mut session = self.inner.session.write();
            match session.as_ref() {
                Some(current) if &current.endpoint == endpoint => {}
                _ => return Err(ProtocolError::UnknownEndpoint(endpoint.to_string())),
            }
            session.take().and_then(|session| session.user)
        };

        tracing::info!(
            host = %self.inner.config.host,
            port = %self.inner.config.port,
            "Disconnecting from MQTT broker"
        );

        let mut first_error = None;
        if let Some(user) = user {
            self.leave_user(&user).await;
            if let Err(e) = self.clear_presence().await {
                tracing::warn!(%endpoint, error = %e, "Failed to clear presence before disconnecting");
                first_error = Some(e);
            }
        }

        let disconnected = self.inner.client.disconnect().await;
        self.inner.connected.store(false, Ordering::Release);

        match (first_error, disconnected) {
            (Some(e), _) => Err(e),
            (None, result) => result.map_err(ProtocolError::Mqtt),
        }
    }

    async fn attach_user(
        &self,
        endpoint: &EndpointId,
        external_id: &str,
        access_token: &str,
    ) -> Result<(), AttachError> {
        if !self.is_connected() {
            return Err(AttachError::Unreachable(format!(
                "not connected to MQTT broker {}:{}",
                self.inner.config.host, self.inner.config.port
            )));
        }

        self.inner.config.verifier.verify(external_id, access_token)?;

        // The user is recorded first so that batches arriving right after
        // the subscription are routed.
        let (fqns, previous) = {
            let mut session = self.inner.session.write();
            match session.as_mut() {
                Some(session) if &session.endpoint == endpoint => {
                    let previous = session.user.replace(external_id.to_string());
                    (session.fqns.clone(), previous)
                }
                _ => {
                    return Err(AttachError::Unreachable(format!(
                        "endpoint {endpoint} is not connected"
                    )));
                }
            }
        };

        if let Some(previous) = previous.filter(|previous| previous != external_id) {
            tracing::debug!(%endpoint, from = %previous, to = %external_id, "Switching attached user");
            self.leave_user(&previous).await;
        }

        let presence = serde_json::to_vec(&Presence {
            endpoint: endpoint.clone(),
            user: external_id.to_string(),
            fqns,
        })
        .map_err(|e| AttachError::Unreachable(e.to_string()));

        let events_topic = self.events_topic(external_id);
        let presence_topic = &self.inner.presence_topic;
        let announced = async {
            let presence = presence?;
            self.inner
                .client
                .subscribe(&events_topic, QoS::AtLeastOnce)
                .await
                .map_err(|e| AttachError::Unreachable(e.to_string()))?;
            self.inner
                .client
                .publish(presence_topic, QoS::AtLeastOnce, true, presence)
                .await
                .map_err(|e| AttachError::Unreachable(e.to_string()))
        };

        if let Err(e) = announced.await {
            if let Some(session) = self.inner.session.write().as_mut() {
                session.user = None;
            }
            // The record may still name the previous user.
            if let Err(clear_error) = self.clear_presence().await {
                tracing::debug!(%endpoint, error = %clear_error, "Failed to clear presence after failed attach");
            }
            return Err(e);
        }

        tracing::debug!(
            %endpoint,
            events = %events_topic,
            presence = %presence_topic,
            "Endpoint attached over MQTT"
        );
        Ok(())
    }

    async fn detach_user(&self, endpoint: &EndpointId) -> Result<(), ProtocolError> {
        let user = {
            let mut session = self.inner.session.write();
            session
                .as_mut()
                .filter(|session| &session.endpoint == endpoint)
                .and_then(|session| session.user.take())
        };

        match user {
            Some(user) => {
                self.leave_user(&user).await;
                self.clear_presence().await
            }
            None => Ok(()),
        }
    }

    async fn find_listeners(
        &self,
        endpoint: &EndpointId,
        fqns: &[String],
    ) -> Result<Vec<EndpointId>, DiscoveryError> {
        if !self.is_connected() {
            return Err(DiscoveryError::Unreachable(
                "not connected to MQTT broker".to_string(),
            ));
        }
        let user = self
            .attached_user(endpoint)
            .ok_or(DiscoveryError::NotAttached)?;

        let (collector, mut rx) = self
            .begin_discovery()
            .await
            .map_err(|e| DiscoveryError::Unreachable(e.to_string()))?;

        tracing::debug!(
            collector,
            window = ?self.inner.config.discovery_window,
            "Collecting endpoint presence"
        );

        let mut found: Vec<EndpointId> = Vec::new();
        let deadline = tokio::time::Instant::now() + self.inner.config.discovery_window;
        while let Ok(Some(presence)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            let listens_all = fqns.iter().all(|fqn| presence.fqns.contains(fqn));
            if &presence.endpoint != endpoint
                && presence.user == user
                && listens_all
                && !found.contains(&presence.endpoint)
            {
                found.push(presence.endpoint);
            }
        }

        self.end_discovery(collector).await;

        found.sort();
        Ok(found)
    }

    async fn send_batch(&self, batch: EventBatch) -> Result<(), ProtocolError> {
        if !self.is_connected() {
            return Err(ProtocolError::Unreachable);
        }
        let user = self
            .attached_user(&batch.source)
            .ok_or_else(|| ProtocolError::UnknownEndpoint(batch.source.to_string()))?;

        let payload =
            serde_json::to_vec(&batch).map_err(|e| ProtocolError::InvalidPayload(e.to_string()))?;
        let topic = self.events_topic(&user);

        tracing::debug!(topic = %topic, events = batch.len(), "Publishing event batch");

        self.inner
            .client
            .publish(&topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(ProtocolError::Mqtt)
    }
}

/// Builder for creating an MQTT transport.
///
/// # Examples
///
/// ```no_run
/// use endpoint_events::transport::{MqttTransport, StaticVerifier};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), endpoint_events::error::ProtocolError> {
/// let transport = MqttTransport::builder()
///     .host("192.168.1.50")
///     .port(1883)
///     .credentials("user", "password")
///     .keep_alive(Duration::from_secs(60))
///     .connection_timeout(Duration::from_secs(5))
///     .topic_prefix("home/events")
///     .verifier(StaticVerifier::new().with_user("userExternalId", "userAccessToken"))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MqttTransportBuilder {
    config: MqttTransportConfig,
}

impl MqttTransportBuilder {
    /// Sets the broker host address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets the broker host and port from a URL such as `mqtt://host:1883`.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidAddress` if the port is not a number.
    pub fn broker_url(mut self, url: &str) -> Result<Self, ProtocolError> {
        let (host, port) = parse_mqtt_url(url)?;
        self.config.host = host;
        self.config.port = port;
        Ok(self)
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the keep-alive interval (default: 30 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.config.keep_alive = duration;
        self
    }

    /// Sets the connection timeout (default: 10 seconds).
    #[must_use]
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.config.connection_timeout = duration;
        self
    }

    /// Sets the prefix of every topic (default: `endpoint-events`).
    #[must_use]
    pub fn topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.topic_prefix = prefix.into();
        self
    }

    /// Sets how long discovery collects presence records (default: 1 second).
    #[must_use]
    pub fn discovery_window(mut self, duration: Duration) -> Self {
        self.config.discovery_window = duration;
        self
    }

    /// Sets the verifier for attach requests (default: accept every user).
    #[must_use]
    pub fn verifier(mut self, verifier: impl UserVerifier + 'static) -> Self {
        self.config.verifier = Arc::new(verifier);
        self
    }

    /// Builds the transport and connects to the MQTT broker.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Host is not set
    /// - Connection fails
    /// - Connection times out
    pub async fn build(self) -> Result<MqttTransport, ProtocolError> {
        if self.config.host.is_empty() {
            return Err(ProtocolError::InvalidAddress(
                "MQTT broker host is required".to_string(),
            ));
        }

        let counter = TRANSPORT_CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let client_id = format!("endpoint_events_{}_{}", std::process::id(), counter);
        let instance = uuid::Uuid::new_v4().simple().to_string();
        let presence_topic = presence_topic(&self.config.topic_prefix, &instance);

        let options = mqtt_options(&self.config, &client_id, &presence_topic);
        let (client, event_loop) = AsyncClient::new(options, 10);

        let transport = MqttTransport {
            inner: Arc::new(MqttTransportInner {
                client,
                config: self.config.clone(),
                presence_topic,
                connected: AtomicBool::new(false),
                session: RwLock::new(None),
                collectors: RwLock::new(HashMap::new()),
                next_collector: AtomicU64::new(1),
                presence_subscription: tokio::sync::Mutex::new(()),
            }),
        };

        let transport_clone = transport.clone();
        let (connack_tx, connack_rx) = oneshot::channel();

        tokio::spawn(async move {
            handle_transport_events(event_loop, transport_clone, Some(connack_tx)).await;
        });

        let timeout = self.config.connection_timeout;
        match tokio::time::timeout(timeout, connack_rx).await {
            Ok(Ok(())) => {
                transport.inner.connected.store(true, Ordering::Release);
                tracing::info!(
                    host = %self.config.host,
                    port = %self.config.port,
                    client_id = %client_id,
                    "Connected to MQTT broker"
                );
            }
            Ok(Err(_)) => {
                return Err(ProtocolError::ConnectionFailed(
                    "MQTT event loop terminated unexpectedly".to_string(),
                ));
            }
            Err(_) => {
                return Err(ProtocolError::ConnectionFailed(format!(
                    "MQTT connection timeout after {}s",
                    timeout.as_secs()
                )));
            }
        }

        Ok(transport)
    }
}

/// Builds the connection options, with a last-will that clears the
/// retained presence record if the connection drops without a disconnect.
fn mqtt_options(config: &MqttTransportConfig, client_id: &str, presence_topic: &str) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, &config.host, config.port);
    options.set_keep_alive(config.keep_alive);
    options.set_clean_session(true);
    options.set_last_will(LastWill::new(
        presence_topic,
        Vec::<u8>::new(),
        QoS::AtLeastOnce,
        true,
    ));

    if let Some((ref username, ref password)) = config.credentials {
        options.set_credentials(username, password);
    }
    options
}

fn events_topic(prefix: &str, user: &str) -> String {
    format!("{prefix}/users/{}/events", urlencoding::encode(user))
}

fn presence_topic(prefix: &str, instance: &str) -> String {
    format!("{prefix}/presence/{}", urlencoding::encode(instance))
}

/// Parses an MQTT URL into host and port.
fn parse_mqtt_url(url: &str) -> Result<(String, u16), ProtocolError> {
    let url = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port) = if let Some((h, p)) = url.rsplit_once(':') {
        let port = p
            .parse()
            .map_err(|_| ProtocolError::InvalidAddress(format!("Invalid port: {p}")))?;
        (h.to_string(), port)
    } else {
        (url.to_string(), 1883)
    };

    if host.is_empty() {
        return Err(ProtocolError::InvalidAddress(
            "MQTT broker host is required".to_string(),
        ));
    }

    Ok((host, port))
}

/// Handles MQTT events for the transport connection.
async fn handle_transport_events(
    mut event_loop: EventLoop,
    transport: MqttTransport,
    connack_tx: Option<oneshot::Sender<()>>,
) {
    use rumqttc::{Event, Packet};

    let mut connack_tx = connack_tx;

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT broker connected");
                transport.inner.connected.store(true, Ordering::Release);
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(());
                }
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                tracing::debug!(?suback, "MQTT subscription acknowledged");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::debug!(
                    topic = %publish.topic,
                    bytes = publish.payload.len(),
                    "MQTT message received"
                );
                transport.route_message(&publish.topic, &publish.payload);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::info!("MQTT broker disconnected");
                transport.inner.connected.store(false, Ordering::Release);
                break;
            }
            Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                tracing::debug!("MQTT disconnect sent");
                transport.inner.connected.store(false, Ordering::Release);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "MQTT transport event loop error");
                transport.inner.connected.store(false, Ordering::Release);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_default_values() {
        let builder = MqttTransportBuilder::default();
        assert_eq!(builder.config.port, 1883);
        assert!(builder.config.host.is_empty());
        assert!(builder.config.credentials.is_none());
        assert_eq!(builder.config.keep_alive, Duration::from_secs(30));
        assert_eq!(builder.config.connection_timeout, Duration::from_secs(10));
        assert_eq!(builder.config.topic_prefix, DEFAULT_TOPIC_PREFIX);
        assert_eq!(builder.config.discovery_window, Duration::from_secs(1));
    }

    #[test]
    fn builder_chain() {
        let builder = MqttTransportBuilder::default()
            .host("192.168.1.50")
            .port(8883)
            .credentials("admin", "secret")
            .keep_alive(Duration::from_secs(45))
            .connection_timeout(Duration::from_secs(15))
            .topic_prefix("home")
            .discovery_window(Duration::from_millis(250));

        assert_eq!(builder.config.host, "192.168.1.50");
        assert_eq!(builder.config.port, 8883);
        assert!(builder.config.credentials.is_some());
        assert_eq!(builder.config.keep_alive, Duration::from_secs(45));
        assert_eq!(builder.config.connection_timeout, Duration::from_secs(15));
        assert_eq!(builder.config.topic_prefix, "home");
        assert_eq!(builder.config.discovery_window, Duration::from_millis(250));
    }

    #[test]
    fn builder_broker_url() {
        let builder = MqttTransportBuilder::default()
            .broker_url("mqtt://broker.local:1884")
            .unwrap();
        assert_eq!(builder.config.host, "broker.local");
        assert_eq!(builder.config.port, 1884);
    }

    #[test]
    fn builder_debug_hides_credentials() {
        let builder = MqttTransportBuilder::default().credentials("admin", "secret");
        let debug = format!("{builder:?}");
        assert!(debug.contains("has_credentials: true"));
        assert!(!debug.contains("secret"));
    }

    #[tokio::test]
    async fn builder_missing_host_fails() {
        let result = MqttTransportBuilder::default().build().await;
        assert!(matches!(result, Err(ProtocolError::InvalidAddress(_))));
    }

    #[test]
    fn parse_url_variants() {
        assert_eq!(
            parse_mqtt_url("mqtt://10.0.0.1:1883").unwrap(),
            ("10.0.0.1".to_string(), 1883)
        );
        assert_eq!(
            parse_mqtt_url("tcp://broker:8883").unwrap(),
            ("broker".to_string(), 8883)
        );
        assert_eq!(
            parse_mqtt_url("broker").unwrap(),
            ("broker".to_string(), 1883)
        );
    }

    #[test]
    fn parse_url_invalid_port() {
        let result = parse_mqtt_url("mqtt://broker:abc");
        assert!(matches!(result, Err(ProtocolError::InvalidAddress(_))));
        assert!(parse_mqtt_url("mqtt://").is_err());
    }

    #[test]
    fn topics_are_percent_encoded() {
        assert_eq!(
            events_topic("endpoint-events", "user/one"),
            "endpoint-events/users/user%2Fone/events"
        );
        assert_eq!(presence_topic("p", "a b"), "p/presence/a%20b");
    }

    #[test]
    fn presence_json_shape() {
        let presence = Presence {
            endpoint: EndpointId::new("thermostat"),
            user: "userExternalId".to_string(),
            fqns: vec!["org.example.Event".to_string()],
        };
        let json = serde_json::to_value(&presence).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "endpoint": "thermostat",
                "user": "userExternalId",
                "fqns": ["org.example.Event"]
            })
        );
    }

    #[test]
    fn last_will_clears_presence() {
        let config = MqttTransportConfig {
            host: "broker".to_string(),
            ..Default::default()
        };
        let options = mqtt_options(&config, "client", "endpoint-events/presence/abc");

        let will = options.last_will().unwrap();
        assert_eq!(will.topic, "endpoint-events/presence/abc");
        assert!(will.message.is_empty());
        assert!(will.retain);
    }

    const LISTENED: &str = "org.example.Event";

    /// A transport whose event loop is gone, so every request fails.
    fn offline_transport(user: Option<&str>) -> (MqttTransport, mpsc::UnboundedReceiver<EventBatch>) {
        let config = MqttTransportConfig {
            host: "127.0.0.1".to_string(),
            ..Default::default()
        };
        let presence_topic = presence_topic(&config.topic_prefix, "offline");
        let options = mqtt_options(&config, "offline", &presence_topic);
        let (client, event_loop) = AsyncClient::new(options, 10);
        drop(event_loop);

        let (inbound, rx) = mpsc::unbounded_channel();
        let transport = MqttTransport {
            inner: Arc::new(MqttTransportInner {
                client,
                config,
                presence_topic,
                connected: AtomicBool::new(true),
                session: RwLock::new(Some(Session {
                    endpoint: EndpointId::new("panel"),
                    fqns: vec![LISTENED.to_string()],
                    inbound,
                    user: user.map(ToString::to_string),
                })),
                collectors: RwLock::new(HashMap::new()),
                next_collector: AtomicU64::new(1),
                presence_subscription: tokio::sync::Mutex::new(()),
            }),
        };
        (transport, rx)
    }

    fn batch_json(source: &str) -> Vec<u8> {
        let batch = EventBatch::new(
            EndpointId::new(source),
            vec![crate::event::EventEnvelope {
                fqn: LISTENED.to_string(),
                target: None,
                payload: serde_json::json!({}),
            }],
        );
        serde_json::to_vec(&batch).unwrap()
    }

    #[tokio::test]
    async fn disconnect_closes_even_when_presence_cannot_be_cleared() {
        let (transport, _rx) = offline_transport(Some("userExternalId"));

        let result = transport.disconnect(&EndpointId::new("panel")).await;

        assert!(matches!(result, Err(ProtocolError::Mqtt(_))));
        assert!(!transport.is_connected());
        assert!(transport.inner.session.read().is_none());
    }

    #[tokio::test]
    async fn disconnect_unknown_endpoint_fails() {
        let (transport, _rx) = offline_transport(None);
        let result = transport.disconnect(&EndpointId::new("other")).await;
        assert!(matches!(result, Err(ProtocolError::UnknownEndpoint(_))));
        assert!(transport.is_connected());
    }

    #[test]
    fn batches_of_the_attached_user_are_delivered() {
        let (transport, mut rx) = offline_transport(Some("userExternalId"));
        let prefix = DEFAULT_TOPIC_PREFIX;

        transport.route_message(&events_topic(prefix, "someoneElse"), &batch_json("remote"));
        assert!(rx.try_recv().is_err());

        transport.route_message(&events_topic(prefix, "userExternalId"), &batch_json("panel"));
        assert!(rx.try_recv().is_err());

        transport.route_message(&events_topic(prefix, "userExternalId"), &batch_json("remote"));
        let part = rx.try_recv().unwrap();
        assert_eq!(part.source, EndpointId::new("remote"));
        assert_eq!(part.len(), 1);
    }

    #[test]
    fn presence_reaches_every_collector() {
        let (transport, _rx) = offline_transport(Some("userExternalId"));
        let (first_tx, mut first) = mpsc::unbounded_channel();
        let (second_tx, mut second) = mpsc::unbounded_channel();
        transport.inner.collectors.write().insert(1, first_tx);
        transport.inner.collectors.write().insert(2, second_tx);

        let presence = Presence {
            endpoint: EndpointId::new("thermostat"),
            user: "userExternalId".to_string(),
            fqns: vec![LISTENED.to_string()],
        };
        let topic = presence_topic(DEFAULT_TOPIC_PREFIX, "abc");
        transport.route_message(&topic, &serde_json::to_vec(&presence).unwrap());
        transport.route_message(&topic, &[]);

        assert_eq!(first.try_recv().unwrap(), presence);
        assert_eq!(second.try_recv().unwrap(), presence);
        assert!(first.try_recv().is_err());
    }
}
