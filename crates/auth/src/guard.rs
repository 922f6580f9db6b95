//! Pre-navigation checks for protected routes.
//!
//! The guard is synchronous: it only reads the already-resolved session and
//! never calls the backend. It is a UX redirect, not a security boundary; the
//! backend enforces access on every request it serves.

use crate::{Session, SessionStore};

/// Query parameter carrying the post-sign-in destination.
pub const RETURN_PARAM: &str = "redirect";

/// Routing table the guard classifies paths against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    pub sign_in_path: String,
    /// Root of the area reserved for driver accounts.
    pub driver_area: String,
    /// Paths reachable without a session (matched on segment boundaries).
    pub public_paths: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            sign_in_path: "/sign-in".to_string(),
            driver_area: "/dashboard/driver".to_string(),
            public_paths: [
                "/sign-in",
                "/sign-in-2",
                "/sign-up",
                "/forgot-password",
                "/otp",
                "/create-driver-profile",
                "/401",
                "/403",
                "/404",
                "/500",
                "/503",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// How a navigation target is gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetClass {
    Public,
    /// Only driver accounts may enter.
    Driver,
    /// Any signed-in account except drivers.
    General,
}

/// Where to send the user instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub to: String,
    /// Path to come back to after signing in.
    pub return_to: Option<String>,
    /// Replace the current history entry rather than pushing a new one.
    pub replace: bool,
}

impl Redirect {
    /// Target with the return path encoded as a query parameter.
    pub fn location(&self) -> String {
        match &self.return_to {
            Some(back) => format!(
                "{}?{}={}",
                self.to,
                RETURN_PARAM,
                urlencoding::encode(back)
            ),
            None => self.to.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Redirect(Redirect),
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allow)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouteGuard {
    config: GuardConfig,
}

impl RouteGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn classify(&self, path: &str) -> TargetClass {
        let path = route_path(path);

        if under(path, &self.config.sign_in_path)
            || self.config.public_paths.iter().any(|p| under(path, p))
        {
            TargetClass::Public
        } else if under(path, &self.config.driver_area) {
            TargetClass::Driver
        } else {
            TargetClass::General
        }
    }

    /// Decide whether `session` may enter `path`.
    pub fn check(&self, path: &str, session: &Session) -> GuardDecision {
        let class = self.classify(path);
        if class == TargetClass::Public {
            return GuardDecision::Allow;
        }

        let Some(role) = session.role() else {
            tracing::debug!(path, "no session; redirecting to sign-in");
            return GuardDecision::Redirect(self.to_sign_in(Some(path)));
        };

        let allowed = match class {
            TargetClass::Driver => role.is_driver(),
            TargetClass::General => !role.is_driver(),
            TargetClass::Public => true,
        };

        if allowed {
            GuardDecision::Allow
        } else {
            tracing::debug!(path, role = %role, "role not permitted here; redirecting to sign-in");
            GuardDecision::Redirect(self.to_sign_in(None))
        }
    }

    /// [`check`](Self::check) against the store's current session.
    pub fn check_store(&self, path: &str, store: &SessionStore) -> GuardDecision {
        self.check(path, &store.snapshot())
    }

    fn to_sign_in(&self, return_to: Option<&str>) -> Redirect {
        Redirect {
            to: self.config.sign_in_path.clone(),
            return_to: return_to.map(String::from),
            replace: true,
        }
    }
}

/// Where to navigate after a successful sign-in.
///
/// Only local absolute paths are honoured; anything else (including
/// protocol-relative `//host` forms) falls back to `/`.
pub fn post_sign_in_target(return_to: Option<&str>) -> &str {
    match return_to {
        Some(p) if p.starts_with('/') && !p.starts_with("//") && !p.starts_with("/\\") => p,
        _ => "/",
    }
}

/// Path component without query string or fragment.
fn route_path(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    &path[..end]
}

/// `path` equals `prefix` or lies below it.
fn under(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
