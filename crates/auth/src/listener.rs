//! Keeps the session store in step with out-of-band backend notifications
//! (another tab signing out, a silent token refresh, an expired session).

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::store::CommitOutcome;
use crate::{
    AuthEvent, AuthEvents, AuthProvider, BackendError, RemoteSession, RoleResolver, SessionStore,
    validate_expiry,
};

/// Whether a listener is currently attached to the backend's event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// No subscription (never started, shut down, or the stream closed).
    Idle,
    /// Subscribed; the store reflects the last delivered event.
    Synced,
}

/// Applies auth events to a [`SessionStore`], one at a time, in delivery order.
#[derive(Clone)]
pub struct AuthEventListener {
    store: Arc<SessionStore>,
    resolver: RoleResolver,
    auth: Arc<dyn AuthProvider>,
}

impl AuthEventListener {
    pub fn new(store: Arc<SessionStore>, resolver: RoleResolver, auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            store,
            resolver,
            auth,
        }
    }

    /// Apply a single event.
    pub async fn handle(&self, event: AuthEvent) {
        tracing::debug!(event = event.kind(), "auth event received");

        if let AuthEvent::SignedIn(session) | AuthEvent::TokenRefreshed(session) = &event {
            if validate_expiry(session.expires_at, Utc::now()).is_err() {
                tracing::warn!(event = event.kind(), user_id = %session.user.id, "ignoring already-expired session");
                return;
            }
        }

        match event {
            AuthEvent::SignedIn(session) => self.signed_in(session).await,
            AuthEvent::SignedOut => {
                // The store logs a credential it could not delete.
                let _ = self.store.reset();
            }
            AuthEvent::TokenRefreshed(session) => {
                self.store.apply_refresh(&session);
            }
        }
    }

    /// Re-check the active session after events were skipped.
    ///
    /// A skipped sign-out must not leave the account signed in: the token is
    /// confirmed with the backend and the session cleared if it is rejected
    /// or now belongs to another account. When the backend cannot be reached
    /// the session is kept.
    pub async fn resync(&self) {
        let current = self.store.snapshot();
        let Some(session) = current.authenticated() else {
            return;
        };

        let revoked = match self.auth.user_for_token(&session.token).await {
            Ok(user) => user.id != session.identity.user_id,
            Err(BackendError::Unauthorized) => true,
            Err(err) => {
                tracing::warn!("could not re-check session after missed events: {err}");
                false
            }
        };

        if revoked && matches!(self.store.invalidate(&session.token), Ok(true)) {
            tracing::info!(user_id = %session.identity.user_id, "session revoked while events were missed");
        }
    }

    async fn signed_in(&self, session: RemoteSession) {
        let user_id = session.user.id.clone();
        let mut update = self.store.begin();
        let resolution = self
            .resolver
            .resolve(&session.user.id, &session.access_token)
            .await;

        update.set_session(session).set_role(resolution.role());

        match self.store.commit(update) {
            CommitOutcome::Applied => {}
            outcome => {
                tracing::debug!(?outcome, user_id = %user_id, "signed-in event not applied");
            }
        }
    }

    /// Run the listener on its own task until the stream closes or the
    /// returned handle is shut down.
    pub fn spawn(self, mut events: AuthEvents) -> ListenerHandle {
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => self.handle(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "auth listener lagged; re-checking session");
                        self.resync().await;
                    }
                    Err(RecvError::Closed) => {
                        tracing::debug!("auth event stream closed");
                        break;
                    }
                }
            }
        });

        ListenerHandle { task }
    }
}

/// Handle to a spawned [`AuthEventListener`].
#[derive(Debug)]
pub struct ListenerHandle {
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn state(&self) -> ListenerState {
        if self.task.is_finished() {
            ListenerState::Idle
        } else {
            ListenerState::Synced
        }
    }

    /// Stop listening. Events not yet applied are dropped.
    pub async fn shutdown(&mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}
