// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the endpoint events library.
//!
//! This module provides the error hierarchy for session lifecycle misuse,
//! user attachment, listener discovery, transactions, transport
//! communication and event payload encoding.
//!
//! Attachment and discovery failures are values: the corresponding client
//! operations return them (or hand them to a callback) exactly once instead
//! of panicking.

use thiserror::Error;

use crate::transaction::TransactionId;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// The session is not in a state that allows the operation.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Attaching the endpoint to a user failed.
    #[error("attach error: {0}")]
    Attach(#[from] AttachError),

    /// A listener discovery request failed.
    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// A transaction identifier was misused.
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// Error occurred during transport communication.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// An event payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The endpoint is not attached to a user.
    #[error("endpoint is not attached to a user")]
    NotAttached,

    /// The event family was not registered on the client builder.
    #[error("event family {0} is not registered")]
    FamilyNotRegistered(&'static str),
}

/// Errors related to the session lifecycle.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// The operation requires a started session.
    #[error("session is not started")]
    NotStarted,

    /// `start` was called on a session that is already running.
    #[error("session is already started")]
    AlreadyStarted,

    /// The session has been stopped and cannot be used again.
    #[error("session is stopped")]
    Stopped,
}

/// Reasons an attach request can fail.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AttachError {
    /// The identity verifier rejected the credentials.
    #[error("credentials rejected: {0}")]
    Rejected(String),

    /// The server could not be reached.
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// The external identifier was empty or unusable.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Attach was requested before the session started.
    #[error("session is not started")]
    SessionNotStarted,
}

/// Reasons a listener discovery request can fail.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// The query contained a blank event type name.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Discovery requires the endpoint to be attached to a user.
    #[error("endpoint is not attached to a user")]
    NotAttached,

    /// Discovery was requested before the session started.
    #[error("session is not started")]
    SessionNotStarted,

    /// The server could not be reached.
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// No answer arrived in time.
    #[error("discovery timed out after {0} ms")]
    Timeout(u64),
}

/// Errors related to transaction (event block) identifiers.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransactionError {
    /// The transaction was already submitted or removed.
    #[error("transaction {0} is closed")]
    Closed(TransactionId),

    /// The identifier was never issued by this client.
    #[error("transaction {0} is unknown")]
    Unknown(TransactionId),
}

/// Errors related to transport communication.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// MQTT connection or communication failed.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Connection to the server failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid URL or address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The server is not reachable.
    #[error("server unreachable")]
    Unreachable,

    /// The endpoint is not known to the server.
    #[error("endpoint {0} is not connected")]
    UnknownEndpoint(String),

    /// A message could not be encoded for the wire.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Errors related to event payload encoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The event type name does not belong to the family.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
