// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event session client.
//!
//! An [`EventClient`] drives one endpoint session over a
//! [`Transport`](crate::transport::Transport):
//!
//! 1. [`start`](EventClient::start) connects the endpoint and advertises the
//!    event types of its registered families
//! 2. [`attach_user`](EventClient::attach_user) associates the endpoint with
//!    a user account
//! 3. [`find_event_listeners`](EventClient::find_event_listeners) discovers
//!    peer endpoints of the same user
//! 4. Family handles register listeners and send events, immediately or
//!    batched in transactions
//! 5. [`stop`](EventClient::stop) ends the session
//!
//! Attach and discovery are `async fn`s returning one result. Their
//! `*_with_callback` variants run in the background and invoke a
//! [`UserAttachCallback`] or [`FindEventListenersCallback`] exactly once.

mod callbacks;
mod config;
mod event_client;
mod family_handle;

pub use callbacks::{FindEventListenersCallback, UserAttachCallback};
pub use config::{ClientConfig, DEFAULT_DISCOVERY_TIMEOUT, EventClientBuilder};
pub use event_client::{EventClient, SessionState};
pub use family_handle::EventFamilyHandle;
