// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! User identity verification.

use std::collections::HashMap;

use crate::error::AttachError;

/// Decides whether a user's access token is valid.
pub trait UserVerifier: Send + Sync {
    /// Verifies the credentials of the user `external_id`.
    ///
    /// # Errors
    ///
    /// Returns `AttachError::Rejected` when the token does not match.
    fn verify(&self, external_id: &str, access_token: &str) -> Result<(), AttachError>;
}

/// Verifier that accepts every user.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustfulVerifier;

impl UserVerifier for TrustfulVerifier {
    fn verify(&self, _external_id: &str, _access_token: &str) -> Result<(), AttachError> {
        Ok(())
    }
}

/// Verifier backed by a fixed table of users and their tokens.
///
/// # Examples
///
/// ```
/// use endpoint_events::transport::{StaticVerifier, UserVerifier};
///
/// let verifier = StaticVerifier::new().with_user("userExternalId", "userAccessToken");
/// assert!(verifier.verify("userExternalId", "userAccessToken").is_ok());
/// assert!(verifier.verify("userExternalId", "wrong").is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticVerifier {
    tokens: HashMap<String, String>,
}

impl StaticVerifier {
    /// Creates a verifier with no known users.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user and its access token.
    #[must_use]
    pub fn with_user(mut self, external_id: impl Into<String>, token: impl Into<String>) -> Self {
        self.tokens.insert(external_id.into(), token.into());
        self
    }

    /// Returns the number of known users.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.tokens.len()
    }
}

impl UserVerifier for StaticVerifier {
    fn verify(&self, external_id: &str, access_token: &str) -> Result<(), AttachError> {
        match self.tokens.get(external_id) {
            Some(token) if token == access_token => Ok(()),
            Some(_) => Err(AttachError::Rejected(format!(
                "invalid access token for user {external_id}"
            ))),
            None => Err(AttachError::Rejected(format!("unknown user {external_id}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trustful_accepts_anything() {
        assert!(TrustfulVerifier.verify("anyone", "").is_ok());
    }

    #[test]
    fn static_accepts_known_token() {
        let verifier = StaticVerifier::new().with_user("alice", "secret");
        assert_eq!(verifier.verify("alice", "secret"), Ok(()));
        assert_eq!(verifier.user_count(), 1);
    }

    #[test]
    fn static_rejects_wrong_token() {
        let verifier = StaticVerifier::new().with_user("alice", "secret");
        let err = verifier.verify("alice", "guess").unwrap_err();
        assert!(matches!(err, AttachError::Rejected(reason) if reason.contains("alice")));
    }

    #[test]
    fn static_rejects_unknown_user() {
        let verifier = StaticVerifier::new();
        assert_eq!(
            verifier.verify("bob", "secret"),
            Err(AttachError::Rejected("unknown user bob".to_string()))
        );
    }
}
