//! Interactive auth flows: sign-in, sign-up, sign-out, startup restoration.
//!
//! Only primary-action failures are returned to the caller. Secondary lookups
//! (the role query) and background synchronization degrade to a safe state.

use std::sync::Arc;

use thiserror::Error;

use roadlink_core::{FieldErrors, SlotError};

use crate::listener::{AuthEventListener, ListenerHandle};
use crate::refresher::{RefresherHandle, TokenRefresher};
use crate::store::{CommitOutcome, Restoration, SessionUpdate};
use crate::{
    AuthProvider, AuthenticatedSession, BackendError, RemoteSession, RoleDirectory,
    RoleResolution, RoleResolver, SessionStore, SignInForm, SignUpForm, SignUpOutcome,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid form: {0}")]
    Validation(FieldErrors),

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error(transparent)]
    Backend(BackendError),

    /// The session was reset (e.g. signed out elsewhere) before this flow
    /// could complete.
    #[error("superseded by a newer session change")]
    Superseded,

    /// The session was cleared in memory but its persisted credential could
    /// not be deleted.
    #[error("credential storage failed: {0}")]
    Storage(SlotError),
}

impl From<BackendError> for AuthError {
    fn from(value: BackendError) -> Self {
        match value {
            BackendError::InvalidCredentials => AuthError::InvalidCredentials,
            other => AuthError::Backend(other),
        }
    }
}

/// A completed sign-in.
///
/// `role` records how the session's role was obtained: either read from the
/// backend or substituted because the lookup came back empty or failed.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedIn {
    pub session: AuthenticatedSession,
    pub role: RoleResolution,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignedUp {
    SignedIn(SignedIn),
    /// The account was created but must be confirmed before signing in.
    ConfirmationRequired { email: String },
}

/// Entry point for the UI layer.
#[derive(Clone)]
pub struct AuthService {
    auth: Arc<dyn AuthProvider>,
    resolver: RoleResolver,
    store: Arc<SessionStore>,
}

impl AuthService {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        directory: Arc<dyn RoleDirectory>,
        store: Arc<SessionStore>,
    ) -> Self {
        Self::with_resolver(auth, RoleResolver::new(directory), store)
    }

    pub fn with_resolver(
        auth: Arc<dyn AuthProvider>,
        resolver: RoleResolver,
        store: Arc<SessionStore>,
    ) -> Self {
        Self {
            auth,
            resolver,
            store,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn resolver(&self) -> &RoleResolver {
        &self.resolver
    }

    pub async fn sign_in(&self, form: &SignInForm) -> Result<SignedIn, AuthError> {
        let credentials = form.validate().map_err(AuthError::Validation)?;
        let update = self.store.begin();

        let remote = match self.auth.sign_in_with_password(&credentials).await {
            Ok(remote) => remote,
            Err(err) => {
                tracing::warn!(email = %credentials.email, "sign-in failed: {err}");
                return Err(err.into());
            }
        };

        let signed_in = self.establish(update, remote).await?;
        tracing::info!(
            user_id = %signed_in.session.identity.user_id,
            role = %signed_in.session.role,
            "signed in"
        );
        Ok(signed_in)
    }

    pub async fn sign_up(&self, form: &SignUpForm) -> Result<SignedUp, AuthError> {
        let credentials = form.validate().map_err(AuthError::Validation)?;
        let update = self.store.begin();

        match self.auth.sign_up(&credentials).await? {
            SignUpOutcome::SignedIn(remote) => {
                let signed_in = self.establish(update, remote).await?;
                tracing::info!(user_id = %signed_in.session.identity.user_id, "signed up");
                Ok(SignedUp::SignedIn(signed_in))
            }
            SignUpOutcome::ConfirmationRequired(user) => {
                tracing::info!(user_id = %user.id, "signed up; confirmation pending");
                Ok(SignedUp::ConfirmationRequired {
                    email: user.email.unwrap_or(credentials.email),
                })
            }
        }
    }

    /// Clear the local session, then revoke the token remotely.
    ///
    /// The local reset always happens and a failed remote revocation is only
    /// logged. An error means the persisted credential is still on disk.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let token = self.store.snapshot().token().cloned();
        let cleared = self.store.reset();

        if let Some(token) = token {
            if let Err(err) = self.auth.sign_out(&token).await {
                tracing::warn!("remote sign-out failed: {err}");
            }
        }
        cleared.map_err(AuthError::Storage)
    }

    /// Renew the active session's access token with its refresh token.
    ///
    /// Returns `Ok(false)` when there is nothing to renew (signed out, no
    /// refresh token, or the session changed while the call was in flight).
    /// A refresh token the backend rejects ends the session.
    pub async fn refresh(&self) -> Result<bool, AuthError> {
        let current = self.store.snapshot();
        let Some(session) = current.authenticated() else {
            return Ok(false);
        };
        let Some(refresh_token) = session.refresh_token.clone() else {
            return Ok(false);
        };

        match self.auth.refresh_session(&refresh_token).await {
            Ok(refreshed) => Ok(self.store.apply_refresh(&refreshed)),
            Err(BackendError::Unauthorized) => {
                tracing::warn!(user_id = %session.identity.user_id, "refresh token rejected; signing out");
                self.store
                    .invalidate(&session.token)
                    .map_err(AuthError::Storage)?;
                Err(AuthError::Backend(BackendError::Unauthorized))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Startup restoration from the persisted credential.
    pub async fn restore(&self) -> Restoration {
        self.store
            .restore_from_persisted(self.auth.as_ref(), &self.resolver)
            .await
    }

    pub fn listener(&self) -> AuthEventListener {
        AuthEventListener::new(self.store.clone(), self.resolver.clone(), self.auth.clone())
    }

    /// Subscribe to the backend's auth notifications and apply them for the
    /// rest of the process.
    pub fn start_listener(&self) -> ListenerHandle {
        self.listener().spawn(self.auth.subscribe())
    }

    /// Renew the access token shortly before it expires, for the rest of the
    /// process.
    pub fn start_refresher(&self) -> RefresherHandle {
        TokenRefresher::new(self.clone()).spawn()
    }

    async fn establish(
        &self,
        mut update: SessionUpdate,
        remote: RemoteSession,
    ) -> Result<SignedIn, AuthError> {
        let role = self
            .resolver
            .resolve(&remote.user.id, &remote.access_token)
            .await;

        let session = AuthenticatedSession {
            identity: remote.user.identity(),
            role: role.role(),
            token: remote.access_token.clone(),
            refresh_token: remote.refresh_token.clone(),
            expires_at: remote.expires_at,
        };

        update.set_session(remote).set_role(session.role);

        match self.store.commit(update) {
            CommitOutcome::Applied => Ok(SignedIn { session, role }),
            CommitOutcome::Stale { .. } => Err(AuthError::Superseded),
            CommitOutcome::Incomplete => unreachable!("identity, role and token are all staged"),
        }
    }
}
