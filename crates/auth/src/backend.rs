//! Contract with the remote identity/data service.
//!
//! The client needs three capabilities from the backend:
//!
//! - credential sign-in / sign-up / sign-out / refresh ([`AuthProvider`])
//! - a notification stream of auth state changes ([`AuthProvider::subscribe`])
//! - a record lookup for role assignments ([`RoleDirectory`])
//!
//! No transport is assumed. `roadlink-client` provides the HTTP
//! implementation; [`crate::memory::InMemoryBackend`] is the one used in tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::broadcast;

use roadlink_core::UserId;

use crate::{BearerToken, Identity};

/// Email/password pair submitted by the user.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

/// Account as described by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteUser {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
    /// The full user object as received.
    #[serde(default)]
    pub raw: JsonValue,
}

impl RemoteUser {
    pub fn identity(&self) -> Identity {
        Identity::new(self.id.clone(), self.email.clone().unwrap_or_default())
            .with_raw(self.raw.clone())
    }
}

/// Authenticated session issued by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSession {
    pub user: RemoteUser,
    pub access_token: BearerToken,
    /// Long-lived credential exchanged for a new access token before
    /// `expires_at`.
    pub refresh_token: Option<BearerToken>,
    /// Expiry as issued by the backend; `None` if it did not say.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Result of a sign-up request.
#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    /// The backend signed the new account in immediately.
    SignedIn(RemoteSession),
    /// The account exists but must be confirmed (e.g. by email) first.
    ConfirmationRequired(RemoteUser),
}

/// Out-of-band auth state notification.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(RemoteSession),
    SignedOut,
    TokenRefreshed(RemoteSession),
}

impl AuthEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthEvent::SignedIn(_) => "signed_in",
            AuthEvent::SignedOut => "signed_out",
            AuthEvent::TokenRefreshed(_) => "token_refreshed",
        }
    }
}

/// Receiving end of the backend's auth notifications.
///
/// Delivery is ordered per receiver. A receiver that falls too far behind
/// observes `RecvError::Lagged` and skips ahead.
pub type AuthEvents = broadcast::Receiver<AuthEvent>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Unknown account or wrong password.
    #[error("invalid email or password")]
    InvalidCredentials,

    /// Sign-up for an email that already has an account.
    #[error("an account with this email already exists")]
    AccountExists,

    /// The presented token was rejected (expired, revoked, malformed).
    #[error("token rejected by backend")]
    Unauthorized,

    #[error("network error: {0}")]
    Network(String),

    #[error("backend error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("could not decode backend response: {0}")]
    Decode(String),

    #[error("backend call timed out")]
    Timeout,
}

/// Credential-based authentication against the backend.
#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in_with_password(
        &self,
        credentials: &Credentials,
    ) -> Result<RemoteSession, BackendError>;

    async fn sign_up(&self, credentials: &Credentials) -> Result<SignUpOutcome, BackendError>;

    /// Revoke `token` remotely.
    async fn sign_out(&self, token: &BearerToken) -> Result<(), BackendError>;

    /// Resolve the account a token belongs to (used to validate a persisted
    /// credential on startup).
    async fn user_for_token(&self, token: &BearerToken) -> Result<RemoteUser, BackendError>;

    /// Exchange a refresh token for a new session. Announced to subscribers
    /// as [`AuthEvent::TokenRefreshed`].
    ///
    /// A rejected refresh token is `Unauthorized`.
    async fn refresh_session(&self, refresh_token: &BearerToken)
    -> Result<RemoteSession, BackendError>;

    /// Subscribe to auth state notifications.
    fn subscribe(&self) -> AuthEvents;
}

/// Role-assignment lookup keyed by account id.
#[async_trait::async_trait]
pub trait RoleDirectory: Send + Sync {
    /// Raw role tag recorded for `user_id`, or `None` if there is no record.
    ///
    /// `token` authorizes the read; role rows are protected by backend
    /// access policies.
    async fn role_of(
        &self,
        user_id: &UserId,
        token: &BearerToken,
    ) -> Result<Option<String>, BackendError>;
}
