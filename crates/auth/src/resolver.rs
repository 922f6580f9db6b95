//! Maps an authenticated account to exactly one role tag.

use std::sync::Arc;
use std::time::Duration;

use roadlink_core::UserId;

use crate::{BackendError, BearerToken, Role, RoleDirectory};

/// Upper bound on a role lookup before the fallback is used.
pub const DEFAULT_ROLE_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Why the fallback role was used instead of an assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// No role row for the account (or the row was empty).
    NoRecord,
    /// A row exists but its tag is not one the client routes on.
    Unrecognized(String),
    /// The lookup failed.
    LookupFailed(BackendError),
    /// The lookup did not answer within the resolver's timeout.
    TimedOut,
}

/// Outcome of a role lookup. Always yields a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleResolution {
    Assigned(Role),
    Fallback(FallbackReason),
}

impl RoleResolution {
    pub fn role(&self) -> Role {
        match self {
            RoleResolution::Assigned(role) => *role,
            RoleResolution::Fallback(_) => Role::FALLBACK,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, RoleResolution::Fallback(_))
    }
}

/// Best-effort role lookup with a deterministic fallback.
///
/// Never fails: sign-in must not be blocked by this secondary query, so every
/// failure mode degrades to [`Role::FALLBACK`] and is logged.
#[derive(Clone)]
pub struct RoleResolver {
    directory: Arc<dyn RoleDirectory>,
    timeout: Duration,
}

impl RoleResolver {
    pub fn new(directory: Arc<dyn RoleDirectory>) -> Self {
        Self {
            directory,
            timeout: DEFAULT_ROLE_LOOKUP_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn resolve(&self, user_id: &UserId, token: &BearerToken) -> RoleResolution {
        let lookup = self.directory.role_of(user_id, token);

        let resolution = match tokio::time::timeout(self.timeout, lookup).await {
            Err(_elapsed) => RoleResolution::Fallback(FallbackReason::TimedOut),
            Ok(Err(BackendError::Timeout)) => RoleResolution::Fallback(FallbackReason::TimedOut),
            Ok(Err(e)) => RoleResolution::Fallback(FallbackReason::LookupFailed(e)),
            Ok(Ok(None)) => RoleResolution::Fallback(FallbackReason::NoRecord),
            Ok(Ok(Some(tag))) if tag.trim().is_empty() => {
                RoleResolution::Fallback(FallbackReason::NoRecord)
            }
            Ok(Ok(Some(tag))) => match Role::parse(&tag) {
                Some(role) => RoleResolution::Assigned(role),
                None => RoleResolution::Fallback(FallbackReason::Unrecognized(tag)),
            },
        };

        match &resolution {
            RoleResolution::Assigned(role) => {
                tracing::debug!(user_id = %user_id, role = %role, "role resolved");
            }
            RoleResolution::Fallback(FallbackReason::NoRecord) => {
                tracing::debug!(user_id = %user_id, "no role record; using fallback role");
            }
            RoleResolution::Fallback(reason) => {
                tracing::warn!(
                    user_id = %user_id,
                    reason = ?reason,
                    fallback = %Role::FALLBACK,
                    "role lookup degraded; using fallback role"
                );
            }
        }

        resolution
    }
}
