// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Completion callbacks for asynchronous client requests.
//!
//! Each callback consumes itself, so it can be invoked at most once. The
//! client invokes it exactly once per request. Closures taking the request
//! result implement both traits.

use crate::error::{AttachError, DiscoveryError};
use crate::event::EndpointId;

/// Receives the result of an attach request.
pub trait UserAttachCallback: Send + 'static {
    /// Called with the outcome of the request.
    fn on_attach_result(self, result: Result<(), AttachError>);
}

impl<F> UserAttachCallback for F
where
    F: FnOnce(Result<(), AttachError>) + Send + 'static,
{
    fn on_attach_result(self, result: Result<(), AttachError>) {
        self(result);
    }
}

/// Receives the result of a listener discovery request.
pub trait FindEventListenersCallback: Send + 'static {
    /// Called with the endpoints listening for every requested type.
    fn on_event_listeners_received(self, listeners: Vec<EndpointId>);

    /// Called when the request failed.
    fn on_request_failed(self, error: DiscoveryError);
}

impl<F> FindEventListenersCallback for F
where
    F: FnOnce(Result<Vec<EndpointId>, DiscoveryError>) + Send + 'static,
{
    fn on_event_listeners_received(self, listeners: Vec<EndpointId>) {
        self(Ok(listeners));
    }

    fn on_request_failed(self, error: DiscoveryError) {
        self(Err(error));
    }
}
