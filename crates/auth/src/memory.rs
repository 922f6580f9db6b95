//! In-memory backend for tests/dev.
//!
//! - No IO
//! - Tokens are random strings valid until revoked; refresh tokens are
//!   single-use
//! - Emits the same auth notifications a hosted backend would
//!
//! Failure injection (`fail_role_lookups`, `delay_role_lookups`) lets tests
//! exercise the degraded paths of role resolution.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast;
use uuid::Uuid;

use roadlink_core::UserId;

use crate::{
    AuthEvent, AuthEvents, AuthProvider, BackendError, BearerToken, Credentials, RemoteSession,
    RemoteUser, RoleDirectory, SignUpOutcome,
};

#[derive(Debug, Clone)]
struct Account {
    user: RemoteUser,
    password: String,
}

#[derive(Debug, Default)]
struct State {
    /// Keyed by lowercased email.
    accounts: HashMap<String, Account>,
    roles: HashMap<UserId, String>,
    tokens: HashMap<String, UserId>,
    refresh_tokens: HashMap<String, UserId>,
    role_failure: Option<BackendError>,
    role_delay: Duration,
    require_confirmation: bool,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    events: broadcast::Sender<AuthEvent>,
}

/// In-memory stand-in for the hosted auth/data service.
///
/// Clones share state.
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    inner: Arc<Inner>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                events,
            }),
        }
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create an account with a generated id.
    pub fn register(&self, email: &str, password: &str) -> UserId {
        self.register_with_id(&Uuid::now_v7().to_string(), email, password)
    }

    /// Create an account with a fixed id.
    ///
    /// Panics if `id` is blank.
    pub fn register_with_id(&self, id: &str, email: &str, password: &str) -> UserId {
        let user_id = UserId::new(id).expect("account id must not be blank");
        let user = RemoteUser {
            id: user_id.clone(),
            email: Some(email.to_string()),
            raw: json!({ "id": id, "email": email, "created_at": Utc::now() }),
        };
        self.state().accounts.insert(
            email.to_lowercase(),
            Account {
                user,
                password: password.to_string(),
            },
        );
        user_id
    }

    /// Record a role row. `tag` is stored verbatim, valid or not.
    pub fn assign_role(&self, user_id: &str, tag: &str) {
        if let Ok(id) = UserId::new(user_id) {
            self.state().roles.insert(id, tag.to_string());
        }
    }

    /// Make every role lookup fail with `error` (`None` to stop).
    pub fn fail_role_lookups(&self, error: Option<BackendError>) {
        self.state().role_failure = error;
    }

    /// Delay every role lookup by `delay`.
    pub fn delay_role_lookups(&self, delay: Duration) {
        self.state().role_delay = delay;
    }

    /// Require email confirmation before sign-up yields a session.
    pub fn require_confirmation(&self, required: bool) {
        self.state().require_confirmation = required;
    }

    /// Issue a token for an existing account without going through sign-in.
    pub fn issue_token(&self, user_id: &UserId) -> BearerToken {
        self.mint(user_id)
    }

    /// Invalidate an access token, as if it expired. Refresh tokens stay
    /// usable.
    pub fn revoke(&self, token: &BearerToken) {
        self.state().tokens.remove(token.expose());
    }

    /// Invalidate every access and refresh token of an account, as a sign-out
    /// on another device would.
    pub fn revoke_sessions(&self, user_id: &UserId) {
        let mut state = self.state();
        state.tokens.retain(|_, owner| owner != user_id);
        state.refresh_tokens.retain(|_, owner| owner != user_id);
    }

    pub fn is_live(&self, token: &BearerToken) -> bool {
        self.state().tokens.contains_key(token.expose())
    }

    /// Deliver an auth notification to all subscribers.
    pub fn emit(&self, event: AuthEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn mint(&self, user_id: &UserId) -> BearerToken {
        let raw = format!("tok-{}", Uuid::now_v7().simple());
        self.state().tokens.insert(raw.clone(), user_id.clone());
        BearerToken::new(raw).expect("minted token is non-empty")
    }

    fn mint_refresh(&self, user_id: &UserId) -> BearerToken {
        let raw = format!("ref-{}", Uuid::now_v7().simple());
        self.state().refresh_tokens.insert(raw.clone(), user_id.clone());
        BearerToken::new(raw).expect("minted token is non-empty")
    }

    fn session_for(&self, user: RemoteUser) -> RemoteSession {
        let access_token = self.mint(&user.id);
        let refresh_token = self.mint_refresh(&user.id);
        RemoteSession {
            user,
            access_token,
            refresh_token: Some(refresh_token),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        }
    }

    fn user_by_id(&self, user_id: &UserId) -> Option<RemoteUser> {
        self.state()
            .accounts
            .values()
            .find(|a| &a.user.id == user_id)
            .map(|a| a.user.clone())
    }
}

#[async_trait::async_trait]
impl AuthProvider for InMemoryBackend {
    async fn sign_in_with_password(
        &self,
        credentials: &Credentials,
    ) -> Result<RemoteSession, BackendError> {
        let account = self
            .state()
            .accounts
            .get(&credentials.email.to_lowercase())
            .cloned();

        let user = match account {
            Some(a) if a.password == credentials.password => a.user,
            _ => return Err(BackendError::InvalidCredentials),
        };

        let session = self.session_for(user);
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<SignUpOutcome, BackendError> {
        if self
            .state()
            .accounts
            .contains_key(&credentials.email.to_lowercase())
        {
            return Err(BackendError::AccountExists);
        }

        let id = self.register(&credentials.email, &credentials.password);
        let user = self
            .user_by_id(&id)
            .ok_or_else(|| BackendError::Decode("account vanished after sign-up".to_string()))?;

        if self.state().require_confirmation {
            return Ok(SignUpOutcome::ConfirmationRequired(user));
        }

        let session = self.session_for(user);
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(SignUpOutcome::SignedIn(session))
    }

    async fn sign_out(&self, token: &BearerToken) -> Result<(), BackendError> {
        let owner = self.state().tokens.get(token.expose()).cloned();
        match owner {
            Some(user_id) => self.revoke_sessions(&user_id),
            None => self.revoke(token),
        }
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    async fn user_for_token(&self, token: &BearerToken) -> Result<RemoteUser, BackendError> {
        let user_id = self
            .state()
            .tokens
            .get(token.expose())
            .cloned()
            .ok_or(BackendError::Unauthorized)?;
        self.user_by_id(&user_id).ok_or(BackendError::Unauthorized)
    }

    async fn refresh_session(
        &self,
        refresh_token: &BearerToken,
    ) -> Result<RemoteSession, BackendError> {
        let user_id = self
            .state()
            .refresh_tokens
            .remove(refresh_token.expose())
            .ok_or(BackendError::Unauthorized)?;
        let user = self.user_by_id(&user_id).ok_or(BackendError::Unauthorized)?;

        let session = self.session_for(user);
        self.emit(AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }

    fn subscribe(&self) -> AuthEvents {
        self.inner.events.subscribe()
    }
}

#[async_trait::async_trait]
impl RoleDirectory for InMemoryBackend {
    async fn role_of(
        &self,
        user_id: &UserId,
        _token: &BearerToken,
    ) -> Result<Option<String>, BackendError> {
        let (delay, failure) = {
            let state = self.state();
            (state.role_delay, state.role_failure.clone())
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = failure {
            return Err(err);
        }

        Ok(self.state().roles.get(user_id).cloned())
    }
}
