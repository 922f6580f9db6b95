//! The session store: single source of truth for who is signed in.
//!
//! Writes are staged in a [`SessionUpdate`] and applied by
//! [`SessionStore::commit`], which checks the update's generation, persists
//! the credentials, and only then publishes the new session. Readers therefore
//! see either the previous session or the complete new one.
//!
//! ```text
//!   begin() ──► set_identity / set_role / set_token ──► commit()
//!                                                       │
//!                     generation moved on? ── yes ──► Stale (dropped)
//!                                                       │ no
//!                         persist credentials ──► publish Session
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use roadlink_core::{SlotError, SlotStore, UserId};

use crate::{
    AuthProvider, AuthenticatedSession, BackendError, BearerToken, Generation, Identity,
    RemoteSession, RemoteUser, Role, RoleResolution, RoleResolver, Session,
};

/// Slot holding the persisted bearer credential.
pub const ACCESS_TOKEN_SLOT: &str = "roadlink_access_token";

/// Slot holding the refresh token and the access token's expiry.
pub const REFRESH_SLOT: &str = "roadlink_refresh";

/// Persisted form of [`REFRESH_SLOT`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Renewal {
    refresh_token: BearerToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

/// Staged session write.
///
/// Captures the store generation at [`SessionStore::begin`]; if the store is
/// reset before the update is committed, the commit is discarded.
#[derive(Debug, Clone)]
#[must_use = "a staged update does nothing until committed"]
pub struct SessionUpdate {
    generation: Generation,
    identity: Option<Identity>,
    role: Option<Role>,
    token: Option<BearerToken>,
    refresh_token: Option<BearerToken>,
    expires_at: Option<DateTime<Utc>>,
}

impl SessionUpdate {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn set_identity(&mut self, identity: Identity) -> &mut Self {
        self.identity = Some(identity);
        self
    }

    pub fn set_role(&mut self, role: Role) -> &mut Self {
        self.role = Some(role);
        self
    }

    pub fn set_token(&mut self, token: BearerToken) -> &mut Self {
        self.token = Some(token);
        self
    }

    pub fn set_refresh_token(&mut self, refresh_token: Option<BearerToken>) -> &mut Self {
        self.refresh_token = refresh_token;
        self
    }

    pub fn set_expires_at(&mut self, expires_at: Option<DateTime<Utc>>) -> &mut Self {
        self.expires_at = expires_at;
        self
    }

    /// Stage everything a backend session carries. The role is resolved
    /// separately.
    pub fn set_session(&mut self, remote: RemoteSession) -> &mut Self {
        self.set_identity(remote.user.identity())
            .set_token(remote.access_token)
            .set_refresh_token(remote.refresh_token)
            .set_expires_at(remote.expires_at)
    }
}

/// Result of [`SessionStore::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum CommitOutcome {
    Applied,
    /// The store was reset after the update began; nothing was written.
    Stale {
        started: Generation,
        current: Generation,
    },
    /// Identity, role or token was missing; nothing was written.
    Incomplete,
}

/// Result of [`SessionStore::restore_from_persisted`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restoration {
    /// No credential was persisted.
    NoCredential,
    /// The credential was accepted (or renewed) and the session
    /// re-established.
    Restored(RoleResolution),
    /// The backend rejected the credential or could not be reached; the
    /// credential was dropped and the session stays empty.
    Rejected(BackendError),
    /// The store was reset while restoration was in flight.
    Superseded,
}

/// Process-wide session state, shared by `Arc` between the UI layer and the
/// auth event listener.
pub struct SessionStore {
    slots: Arc<dyn SlotStore>,
    generation: Mutex<Generation>,
    session: watch::Sender<Session>,
}

impl SessionStore {
    /// Create an empty store persisting its credentials into `slots`.
    pub fn new(slots: Arc<dyn SlotStore>) -> Self {
        let (session, _) = watch::channel(Session::Anonymous);
        Self {
            slots,
            generation: Mutex::new(Generation::default()),
            session,
        }
    }

    /// Current session.
    pub fn snapshot(&self) -> Session {
        self.session.borrow().clone()
    }

    /// Receive a notification every time the session changes.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    pub fn generation(&self) -> Generation {
        *self.lock_generation()
    }

    /// Start staging a session write against the current generation.
    pub fn begin(&self) -> SessionUpdate {
        SessionUpdate {
            generation: self.generation(),
            identity: None,
            role: None,
            token: None,
            refresh_token: None,
            expires_at: None,
        }
    }

    /// Apply a staged update atomically.
    pub fn commit(&self, update: SessionUpdate) -> CommitOutcome {
        let generation = self.lock_generation();

        if update.generation != *generation {
            tracing::debug!(
                started = %update.generation,
                current = %*generation,
                "discarding stale session write"
            );
            return CommitOutcome::Stale {
                started: update.generation,
                current: *generation,
            };
        }

        let (Some(identity), Some(role), Some(token)) = (update.identity, update.role, update.token)
        else {
            tracing::debug!("discarding incomplete session write");
            return CommitOutcome::Incomplete;
        };

        let session = AuthenticatedSession {
            identity,
            role,
            token,
            refresh_token: update.refresh_token,
            expires_at: update.expires_at,
        };
        self.persist_credentials(&session);

        tracing::info!(user_id = %session.identity.user_id, role = %role, "session established");
        self.session.send_replace(Session::Authenticated(session));

        drop(generation);
        CommitOutcome::Applied
    }

    /// Replace the bearer credential of the active session.
    ///
    /// Only applies when `user_id` is the signed-in account; a token is never
    /// attached to an empty session. Returns whether the token was applied.
    pub fn set_token(&self, user_id: &UserId, token: BearerToken) -> bool {
        self.update_credentials(user_id, |session| session.token = token)
    }

    /// Apply a renewed backend session to the matching signed-in account.
    ///
    /// Identity and role are kept; only the credentials and expiry move.
    pub fn apply_refresh(&self, refreshed: &RemoteSession) -> bool {
        self.update_credentials(&refreshed.user.id, |session| {
            session.token = refreshed.access_token.clone();
            session.expires_at = refreshed.expires_at;
            if let Some(refresh_token) = &refreshed.refresh_token {
                session.refresh_token = Some(refresh_token.clone());
            }
        })
    }

    /// Clear the session and delete the persisted credentials.
    ///
    /// Advances the generation, so writes begun before the reset are dropped.
    /// Idempotent. The in-memory session is cleared even when the slots
    /// cannot be deleted; the error then means the next process would
    /// restore the old credential.
    pub fn reset(&self) -> Result<(), SlotError> {
        let mut generation = self.lock_generation();
        self.clear(&mut generation)
    }

    /// Reset only if `token` is still the active credential.
    ///
    /// Returns whether the session was cleared.
    pub fn invalidate(&self, token: &BearerToken) -> Result<bool, SlotError> {
        let mut generation = self.lock_generation();
        if self.session.borrow().token() != Some(token) {
            return Ok(false);
        }
        self.clear(&mut generation).map(|()| true)
    }

    /// Credential left behind by a previous process, if any.
    pub fn persisted_token(&self) -> Option<BearerToken> {
        match self.slots.get(ACCESS_TOKEN_SLOT) {
            Ok(value) => value.and_then(BearerToken::new),
            Err(err) => {
                tracing::warn!("failed to read persisted credential: {err}");
                None
            }
        }
    }

    /// Refresh token left behind by a previous process, if any.
    pub fn persisted_refresh_token(&self) -> Option<BearerToken> {
        self.persisted_renewal().map(|r| r.refresh_token)
    }

    /// Re-establish the session from the persisted credential.
    ///
    /// The credential is provisional until the backend confirms which account
    /// it belongs to. An access token the backend no longer accepts is
    /// renewed with the persisted refresh token. Any other failure leaves the
    /// session empty and drops the credentials; nothing is raised past this
    /// call.
    pub async fn restore_from_persisted(
        &self,
        auth: &dyn AuthProvider,
        resolver: &RoleResolver,
    ) -> Restoration {
        let mut update = self.begin();

        let Some(token) = self.persisted_token() else {
            tracing::debug!("no persisted credential; starting signed out");
            return Restoration::NoCredential;
        };
        let renewal = self.persisted_renewal();

        let confirmed = match auth.user_for_token(&token).await {
            Ok(user) => Ok(persisted_session(user, token.clone(), renewal)),
            Err(BackendError::Unauthorized) => match renewal {
                Some(renewal) => {
                    tracing::debug!("persisted access token rejected; renewing");
                    auth.refresh_session(&renewal.refresh_token).await
                }
                None => Err(BackendError::Unauthorized),
            },
            Err(err) => Err(err),
        };

        let remote = match confirmed {
            Ok(remote) => remote,
            Err(err) => {
                tracing::warn!("persisted credential rejected; starting signed out: {err}");
                self.drop_credential(update.generation, &token);
                return Restoration::Rejected(err);
            }
        };

        let resolution = resolver.resolve(&remote.user.id, &remote.access_token).await;
        update.set_session(remote).set_role(resolution.role());

        match self.commit(update) {
            CommitOutcome::Applied => Restoration::Restored(resolution),
            CommitOutcome::Stale { .. } | CommitOutcome::Incomplete => Restoration::Superseded,
        }
    }

    fn update_credentials(
        &self,
        user_id: &UserId,
        apply: impl FnOnce(&mut AuthenticatedSession),
    ) -> bool {
        let _generation = self.lock_generation();

        let current = self.session.borrow().clone();
        let Session::Authenticated(mut session) = current else {
            tracing::debug!(user_id = %user_id, "ignoring token for empty session");
            return false;
        };
        if &session.identity.user_id != user_id {
            tracing::debug!(
                user_id = %user_id,
                current = %session.identity.user_id,
                "ignoring token for a different account"
            );
            return false;
        }

        apply(&mut session);
        self.persist_credentials(&session);
        self.session.send_replace(Session::Authenticated(session));
        tracing::debug!(user_id = %user_id, "bearer token refreshed");
        true
    }

    fn clear(&self, generation: &mut MutexGuard<'_, Generation>) -> Result<(), SlotError> {
        **generation = generation.next();

        let removed = self.remove_slots();
        if let Err(err) = &removed {
            tracing::error!("failed to delete persisted credential; it survives a restart: {err}");
        }

        let was_authenticated = self.session.send_replace(Session::Anonymous).is_authenticated();
        if was_authenticated {
            tracing::info!(generation = %**generation, "session cleared");
        }
        removed
    }

    /// Delete `token` from its slot unless a newer write replaced it.
    fn drop_credential(&self, started: Generation, token: &BearerToken) {
        let generation = self.lock_generation();
        if *generation != started {
            return;
        }
        if self.persisted_token().as_ref() == Some(token) {
            if let Err(err) = self.remove_slots() {
                tracing::error!("failed to delete rejected credential: {err}");
            }
        }
    }

    fn remove_slots(&self) -> Result<(), SlotError> {
        let access = self.slots.remove(ACCESS_TOKEN_SLOT);
        let refresh = self.slots.remove(REFRESH_SLOT);
        access.and(refresh)
    }

    fn persisted_renewal(&self) -> Option<Renewal> {
        let raw = match self.slots.get(REFRESH_SLOT) {
            Ok(raw) => raw?,
            Err(err) => {
                tracing::warn!("failed to read persisted refresh token: {err}");
                return None;
            }
        };
        serde_json::from_str(&raw)
            .inspect_err(|err| tracing::warn!("ignoring unreadable refresh slot: {err}"))
            .ok()
    }

    fn persist_credentials(&self, session: &AuthenticatedSession) {
        // Expiry is the backend's business; the slots themselves never expire.
        if let Err(err) = self.slots.set(ACCESS_TOKEN_SLOT, session.token.expose(), None) {
            tracing::error!("failed to persist credential; session will not survive restart: {err}");
        }

        let written = match &session.refresh_token {
            Some(refresh_token) => {
                let renewal = Renewal {
                    refresh_token: refresh_token.clone(),
                    expires_at: session.expires_at,
                };
                serde_json::to_string(&renewal)
                    .map_err(|e| SlotError::Encoding(e.to_string()))
                    .and_then(|raw| self.slots.set(REFRESH_SLOT, &raw, None))
            }
            None => self.slots.remove(REFRESH_SLOT),
        };
        if let Err(err) = written {
            tracing::error!("failed to persist refresh token; session will not renew after restart: {err}");
        }
    }

    fn lock_generation(&self) -> MutexGuard<'_, Generation> {
        // The guarded value is a plain counter; a panic elsewhere cannot leave
        // it half-updated.
        self.generation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Session rebuilt from a persisted access token the backend just accepted.
fn persisted_session(user: RemoteUser, token: BearerToken, renewal: Option<Renewal>) -> RemoteSession {
    let (refresh_token, expires_at) = match renewal {
        Some(r) => (Some(r.refresh_token), r.expires_at),
        None => (None, None),
    };
    RemoteSession {
        user,
        access_token: token,
        refresh_token,
        expires_at,
    }
}

impl core::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionStore")
            .field("generation", &self.generation())
            .field("session", &*self.session.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use roadlink_core::MemorySlotStore;

    fn store() -> (SessionStore, MemorySlotStore) {
        let slots = MemorySlotStore::new();
        (SessionStore::new(Arc::new(slots.clone())), slots)
    }

    fn identity(id: &str) -> Identity {
        Identity::new(UserId::new(id).unwrap(), format!("{id}@example.com"))
    }

    fn token(v: &str) -> BearerToken {
        BearerToken::new(v).unwrap()
    }

    fn full_update(store: &SessionStore, id: &str, role: Role, tok: &str) -> SessionUpdate {
        let mut u = store.begin();
        u.set_identity(identity(id)).set_role(role).set_token(token(tok));
        u
    }

    #[test]
    fn commit_publishes_and_persists() {
        let (store, slots) = store();
        let u = full_update(&store, "u1", Role::Driver, "tok-1");
        assert_eq!(store.commit(u), CommitOutcome::Applied);

        let s = store.snapshot();
        assert_eq!(s.user_id().map(|u| u.as_str()), Some("u1"));
        assert_eq!(s.role(), Some(Role::Driver));
        assert_eq!(slots.get(ACCESS_TOKEN_SLOT).unwrap().as_deref(), Some("tok-1"));
    }

    #[test]
    fn incomplete_update_changes_nothing() {
        let (store, slots) = store();
        let mut u = store.begin();
        u.set_identity(identity("u1")).set_role(Role::Admin);
        assert_eq!(store.commit(u), CommitOutcome::Incomplete);
        assert_eq!(store.snapshot(), Session::Anonymous);
        assert!(slots.is_empty());
    }

    #[test]
    fn reset_is_idempotent() {
        let (store, slots) = store();
        let _ = store.commit(full_update(&store, "u1", Role::Admin, "tok"));

        store.reset().unwrap();
        let once = store.snapshot();
        store.reset().unwrap();
        let twice = store.snapshot();

        assert_eq!(once, Session::Anonymous);
        assert_eq!(once, twice);
        assert!(slots.get(ACCESS_TOKEN_SLOT).unwrap().is_none());
    }

    #[test]
    fn update_started_before_reset_is_discarded() {
        let (store, slots) = store();
        let u = full_update(&store, "u1", Role::Admin, "stale");

        store.reset().unwrap();

        assert!(matches!(store.commit(u), CommitOutcome::Stale { .. }));
        assert_eq!(store.snapshot(), Session::Anonymous);
        assert!(slots.is_empty());
    }

    #[test]
    fn set_token_requires_matching_session() {
        let (store, slots) = store();
        let uid = UserId::new("u1").unwrap();
        assert!(!store.set_token(&uid, token("orphan")));
        assert!(slots.is_empty());

        let _ = store.commit(full_update(&store, "u1", Role::Customer, "tok-1"));
        assert!(!store.set_token(&UserId::new("u2").unwrap(), token("other")));
        assert!(store.set_token(&uid, token("tok-2")));

        assert_eq!(store.snapshot().token().map(|t| t.expose()), Some("tok-2"));
        assert_eq!(slots.get(ACCESS_TOKEN_SLOT).unwrap().as_deref(), Some("tok-2"));
    }

    #[test]
    fn refresh_token_is_persisted_and_cleared_with_the_session() {
        let (store, slots) = store();
        let mut u = full_update(&store, "u1", Role::Driver, "tok-1");
        u.set_refresh_token(Some(token("ref-1")));
        assert_eq!(store.commit(u), CommitOutcome::Applied);
        assert_eq!(store.persisted_refresh_token(), Some(token("ref-1")));

        store.reset().unwrap();
        assert!(store.persisted_refresh_token().is_none());
        assert!(slots.is_empty());
    }

    #[test]
    fn apply_refresh_rotates_credentials_of_matching_account() {
        let (store, _) = store();
        let mut u = full_update(&store, "u1", Role::Manager, "tok-1");
        u.set_refresh_token(Some(token("ref-1")));
        let _ = store.commit(u);

        let expires_at = Utc::now() + chrono::Duration::hours(1);
        let refreshed = RemoteSession {
            user: RemoteUser {
                id: UserId::new("u1").unwrap(),
                email: None,
                raw: serde_json::Value::Null,
            },
            access_token: token("tok-2"),
            refresh_token: Some(token("ref-2")),
            expires_at: Some(expires_at),
        };
        assert!(store.apply_refresh(&refreshed));

        let s = store.snapshot();
        let session = s.authenticated().unwrap();
        assert_eq!(session.role, Role::Manager);
        assert_eq!(session.token, token("tok-2"));
        assert_eq!(session.expires_at, Some(expires_at));
        assert_eq!(store.persisted_token(), Some(token("tok-2")));
        assert_eq!(store.persisted_refresh_token(), Some(token("ref-2")));
    }

    #[test]
    fn invalidate_only_clears_the_checked_token() {
        let (store, _) = store();
        let _ = store.commit(full_update(&store, "u1", Role::Customer, "tok-1"));
        let _ = store.commit(full_update(&store, "u1", Role::Customer, "tok-2"));

        assert!(!store.invalidate(&token("tok-1")).unwrap());
        assert!(store.snapshot().is_authenticated());

        assert!(store.invalidate(&token("tok-2")).unwrap());
        assert_eq!(store.snapshot(), Session::Anonymous);
    }

    /// Slot store whose deletes always fail.
    struct StuckSlots(MemorySlotStore);

    impl SlotStore for StuckSlots {
        fn get(&self, key: &str) -> Result<Option<String>, SlotError> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &str, max_age: Option<chrono::Duration>) -> Result<(), SlotError> {
            self.0.set(key, value, max_age)
        }

        fn remove(&self, _key: &str) -> Result<(), SlotError> {
            Err(SlotError::Io("read-only file system".into()))
        }
    }

    #[test]
    fn reset_reports_credential_left_on_disk() {
        let slots = MemorySlotStore::new();
        let store = SessionStore::new(Arc::new(StuckSlots(slots.clone())));
        let _ = store.commit(full_update(&store, "u1", Role::Driver, "tok"));

        let err = store.reset().unwrap_err();
        assert!(matches!(err, SlotError::Io(_)));
        assert_eq!(store.snapshot(), Session::Anonymous);
        assert_eq!(slots.get(ACCESS_TOKEN_SLOT).unwrap().as_deref(), Some("tok"));
    }

    #[test]
    fn subscribers_see_changes() {
        let (store, _) = store();
        let mut rx = store.subscribe();
        let _ = store.commit(full_update(&store, "u1", Role::Driver, "tok"));
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_authenticated());

        store.reset().unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().is_authenticated());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Commit { user: u8, role: usize, token: u8 },
        CommitPartial { with_identity: bool, with_token: bool },
        CommitAfterReset { user: u8 },
        Refresh { user: u8, token: u8 },
        Reset,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..3, 0usize..5, 0u8..200).prop_map(|(user, role, token)| Op::Commit { user, role, token }),
            (any::<bool>(), any::<bool>())
                .prop_map(|(with_identity, with_token)| Op::CommitPartial { with_identity, with_token }),
            (0u8..3).prop_map(|user| Op::CommitAfterReset { user }),
            (0u8..3, 0u8..200).prop_map(|(user, token)| Op::Refresh { user, token }),
            Just(Op::Reset),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: after any sequence of operations, identity, role and
        /// token are either all present or all absent, and the persisted
        /// credential is exactly the published token.
        #[test]
        fn identity_role_and_token_move_together(ops in prop::collection::vec(op(), 1..40)) {
            let (store, slots) = store();

            for op in ops {
                match op {
                    Op::Commit { user, role, token: t } => {
                        let u = full_update(&store, &format!("u{user}"), Role::ALL[role], &format!("t{t}"));
                        let _ = store.commit(u);
                    }
                    Op::CommitPartial { with_identity, with_token } => {
                        let mut u = store.begin();
                        if with_identity { u.set_identity(identity("partial")); }
                        if with_token { u.set_token(token("partial")); }
                        let _ = store.commit(u);
                    }
                    Op::CommitAfterReset { user } => {
                        let u = full_update(&store, &format!("u{user}"), Role::Admin, "late");
                        store.reset().unwrap();
                        prop_assert!(
                            matches!(store.commit(u), CommitOutcome::Stale { .. }),
                            "stale write was not discarded"
                        );
                    }
                    Op::Refresh { user, token: t } => {
                        let _ = store.set_token(&UserId::new(format!("u{user}")).unwrap(), token(&format!("r{t}")));
                    }
                    Op::Reset => store.reset().unwrap(),
                }

                let s = store.snapshot();
                prop_assert_eq!(s.user_id().is_some(), s.token().is_some());
                prop_assert_eq!(s.role().is_some(), s.token().is_some());

                let persisted = slots.get(ACCESS_TOKEN_SLOT).unwrap();
                prop_assert_eq!(persisted.as_deref(), s.token().map(|t| t.expose()));
            }
        }
    }
}
