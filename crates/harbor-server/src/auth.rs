//! Identity resolution for incoming connections.
//!
//! The hub never verifies credentials itself; it consumes an identity
//! resolved by an [`Authenticator`] the host wires in. Resolution is a
//! hard precondition of admission: the WebSocket upgrade is refused
//! outright when it fails, so no anonymous session ever reaches the
//! registry.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token was supplied.
    #[error("Missing credentials")]
    MissingCredentials,

    /// The supplied token did not resolve to an identity.
    #[error("Invalid token")]
    InvalidToken,
}

/// A resolved caller identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable user ID.
    pub user_id: String,
    /// Display name shown in rooms and user lists.
    pub username: String,
}

impl Identity {
    /// Create an identity.
    #[must_use]
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
        }
    }
}

/// Resolves request credentials to an identity.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve a bearer token to an identity.
    ///
    /// # Errors
    ///
    /// Returns an error when the token is absent or does not resolve.
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Token-table authenticator for tests and single-tenant deployments.
///
/// Production hosts plug in their own [`Authenticator`] (JWT
/// verification, session-store lookup, ...); the hub only consumes the
/// resolved identity.
#[derive(Debug, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenAuthenticator {
    /// Create an empty token table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for an identity.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}
