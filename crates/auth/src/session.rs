//! Locally known authentication state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use roadlink_core::UserId;

use crate::{BearerToken, Role};

/// Identity fields of a signed-in account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub email: String,
    /// Passthrough of the backend's user object (display/metadata only).
    #[serde(default)]
    pub raw: JsonValue,
}

impl Identity {
    pub fn new(user_id: UserId, email: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
            raw: JsonValue::Null,
        }
    }

    pub fn with_raw(mut self, raw: JsonValue) -> Self {
        self.raw = raw;
        self
    }
}

/// A fully established session: identity, role and credential together.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedSession {
    pub identity: Identity,
    pub role: Role,
    pub token: BearerToken,
    /// Credential used to renew `token`, if the backend issued one.
    pub refresh_token: Option<BearerToken>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// What the rest of the client sees.
///
/// There is no variant for "identity without token" or "token without
/// identity": a session is either complete or absent.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Session {
    #[default]
    Anonymous,
    Authenticated(AuthenticatedSession),
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Session::Authenticated(_))
    }

    pub fn authenticated(&self) -> Option<&AuthenticatedSession> {
        match self {
            Session::Authenticated(s) => Some(s),
            Session::Anonymous => None,
        }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.authenticated().map(|s| &s.identity.user_id)
    }

    pub fn email(&self) -> Option<&str> {
        self.authenticated().map(|s| s.identity.email.as_str())
    }

    pub fn role(&self) -> Option<Role> {
        self.authenticated().map(|s| s.role)
    }

    pub fn token(&self) -> Option<&BearerToken> {
        self.authenticated().map(|s| &s.token)
    }
}

/// Monotonic counter advanced every time the session is reset.
///
/// Asynchronous writers capture the generation when they start and the store
/// drops their write if it has moved on by the time they commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    pub fn value(&self) -> u64 {
        self.0
    }

    pub(crate) fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl core::fmt::Display for Generation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
