use std::sync::Arc;
use std::time::Duration;

use roadlink_auth::memory::InMemoryBackend;
use roadlink_auth::{
    ACCESS_TOKEN_SLOT, AuthError, AuthEvent, AuthService, BackendError, FallbackReason,
    GuardDecision, REFRESH_SLOT, Restoration, Role, RoleResolution, RoleResolver, RouteGuard,
    Session, SessionStore, SignInForm, SignUpForm, SignedUp, TokenRefresher,
};
use roadlink_core::{MemorySlotStore, SlotStore};

struct Harness {
    backend: InMemoryBackend,
    slots: MemorySlotStore,
    service: AuthService,
}

impl Harness {
    fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5))
    }

    fn with_timeout(timeout: Duration) -> Self {
        let backend = InMemoryBackend::new();
        let slots = MemorySlotStore::new();
        let service = service_over(&backend, &slots, timeout);
        Self {
            backend,
            slots,
            service,
        }
    }

    /// A fresh store and service over the same backend and persisted slots,
    /// as after a process restart.
    fn restart(&self) -> AuthService {
        service_over(&self.backend, &self.slots, Duration::from_secs(5))
    }

    fn store(&self) -> &SessionStore {
        self.service.store()
    }
}

fn service_over(backend: &InMemoryBackend, slots: &MemorySlotStore, timeout: Duration) -> AuthService {
    let store = Arc::new(SessionStore::new(Arc::new(slots.clone())));
    let resolver = RoleResolver::new(Arc::new(backend.clone())).with_timeout(timeout);
    AuthService::with_resolver(Arc::new(backend.clone()), resolver, store)
}

fn sign_in_form(email: &str, password: &str) -> SignInForm {
    SignInForm {
        email: email.to_string(),
        password: password.to_string(),
    }
}

#[tokio::test]
async fn driver_sign_in_reaches_driver_dashboard_only() {
    let h = Harness::new();
    let id = h.backend.register("driver@roadlink.sy", "pass1234");
    h.backend.assign_role(id.as_str(), "driver");
    let mut listener = h.service.start_listener();

    let signed_in = h
        .service
        .sign_in(&sign_in_form("driver@roadlink.sy", "pass1234"))
        .await
        .expect("sign-in should succeed");

    assert_eq!(signed_in.role, RoleResolution::Assigned(Role::Driver));
    assert_eq!(h.store().snapshot().role(), Some(Role::Driver));

    let persisted = h.slots.get(ACCESS_TOKEN_SLOT).unwrap();
    assert!(persisted.is_some_and(|t| !t.is_empty()));

    let guard = RouteGuard::default();
    assert_eq!(guard.check_store("/dashboard/driver", h.store()), GuardDecision::Allow);
    match guard.check_store("/invoices", h.store()) {
        GuardDecision::Redirect(r) => assert_eq!(r.to, "/sign-in"),
        GuardDecision::Allow => panic!("driver must not enter the general area"),
    }

    listener.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn role_lookup_timeout_falls_back_to_customer() {
    let h = Harness::with_timeout(Duration::from_millis(200));
    let id = h.backend.register("slow@roadlink.sy", "pass1234");
    h.backend.assign_role(id.as_str(), "admin");
    h.backend.delay_role_lookups(Duration::from_secs(30));

    let signed_in = h
        .service
        .sign_in(&sign_in_form("slow@roadlink.sy", "pass1234"))
        .await
        .expect("sign-in must not be blocked by the role lookup");

    assert_eq!(signed_in.role, RoleResolution::Fallback(FallbackReason::TimedOut));
    assert_eq!(h.store().snapshot().role(), Some(Role::Customer));
}

#[tokio::test]
async fn role_lookup_error_falls_back_to_customer() {
    let h = Harness::new();
    h.backend.register("flaky@roadlink.sy", "pass1234");
    h.backend
        .fail_role_lookups(Some(BackendError::Network("connection reset".into())));

    let signed_in = h
        .service
        .sign_in(&sign_in_form("flaky@roadlink.sy", "pass1234"))
        .await
        .unwrap();

    assert!(signed_in.role.is_fallback());
    assert_eq!(signed_in.session.role, Role::Customer);
}

#[tokio::test]
async fn external_sign_out_clears_session_and_guards_navigation() {
    let h = Harness::new();
    h.backend.register("ops@roadlink.sy", "pass1234");
    let mut changes = h.store().subscribe();
    let mut listener = h.service.start_listener();

    h.service
        .sign_in(&sign_in_form("ops@roadlink.sy", "pass1234"))
        .await
        .unwrap();
    assert!(h.store().snapshot().is_authenticated());
    changes.borrow_and_update();

    // Another tab signs out.
    h.backend.emit(AuthEvent::SignedOut);
    tokio::time::timeout(Duration::from_secs(1), async {
        while changes.borrow_and_update().is_authenticated() {
            changes.changed().await.unwrap();
        }
    })
    .await
    .expect("listener did not clear the session");

    assert_eq!(h.store().snapshot(), Session::Anonymous);
    assert!(h.slots.get(ACCESS_TOKEN_SLOT).unwrap().is_none());

    match RouteGuard::default().check_store("/shipments", h.store()) {
        GuardDecision::Redirect(r) => assert_eq!(r.return_to.as_deref(), Some("/shipments")),
        GuardDecision::Allow => panic!("signed-out session must be redirected"),
    }

    listener.shutdown().await;
}

#[tokio::test]
async fn persisted_token_survives_restart() {
    let h = Harness::new();
    let id = h.backend.register("mgr@roadlink.sy", "pass1234");
    h.backend.assign_role(id.as_str(), "manager");

    let first = h
        .service
        .sign_in(&sign_in_form("mgr@roadlink.sy", "pass1234"))
        .await
        .unwrap();

    let restarted = h.restart();
    assert_eq!(restarted.store().snapshot(), Session::Anonymous);

    let outcome = restarted.restore().await;
    assert_eq!(outcome, Restoration::Restored(RoleResolution::Assigned(Role::Manager)));

    let restored = restarted.store().snapshot();
    assert_eq!(restored.token(), Some(&first.session.token));
    assert_eq!(restored.user_id(), Some(&id));
}

#[tokio::test]
async fn rejected_credential_is_dropped_on_restore() {
    let h = Harness::new();
    h.backend.register("old@roadlink.sy", "pass1234");
    let signed_in = h
        .service
        .sign_in(&sign_in_form("old@roadlink.sy", "pass1234"))
        .await
        .unwrap();
    h.backend.revoke_sessions(&signed_in.session.identity.user_id);

    let restarted = h.restart();
    assert!(matches!(restarted.restore().await, Restoration::Rejected(_)));
    assert_eq!(restarted.store().snapshot(), Session::Anonymous);
    assert!(h.slots.get(ACCESS_TOKEN_SLOT).unwrap().is_none());
    assert!(h.slots.get(REFRESH_SLOT).unwrap().is_none());
}

#[tokio::test]
async fn expired_access_token_is_renewed_on_restore() {
    let h = Harness::new();
    let id = h.backend.register("night@roadlink.sy", "pass1234");
    h.backend.assign_role(id.as_str(), "driver");
    let signed_in = h
        .service
        .sign_in(&sign_in_form("night@roadlink.sy", "pass1234"))
        .await
        .unwrap();
    let old_refresh = signed_in.session.refresh_token.clone().unwrap();

    // The access token lapses while the process is down.
    h.backend.revoke(&signed_in.session.token);

    let restarted = h.restart();
    assert_eq!(
        restarted.restore().await,
        Restoration::Restored(RoleResolution::Assigned(Role::Driver))
    );

    let restored = restarted.store().snapshot();
    let token = restored.token().unwrap();
    assert_ne!(token, &signed_in.session.token);
    assert!(h.backend.is_live(token));
    assert_eq!(h.slots.get(ACCESS_TOKEN_SLOT).unwrap().as_deref(), Some(token.expose()));
    assert_ne!(restarted.store().persisted_refresh_token(), Some(old_refresh));
}

#[tokio::test(start_paused = true)]
async fn refresher_renews_the_token_before_it_expires() {
    let h = Harness::new();
    h.backend.register("long@roadlink.sy", "pass1234");
    let signed_in = h
        .service
        .sign_in(&sign_in_form("long@roadlink.sy", "pass1234"))
        .await
        .unwrap();
    let first = signed_in.session.token.clone();

    let mut changes = h.store().subscribe();
    changes.borrow_and_update();
    let mut refresher = TokenRefresher::new(h.service.clone()).spawn();

    tokio::time::timeout(Duration::from_secs(2 * 60 * 60), changes.changed())
        .await
        .expect("token was never renewed")
        .unwrap();

    let renewed = h.store().snapshot();
    assert_eq!(renewed.user_id(), Some(&signed_in.session.identity.user_id));
    assert_ne!(renewed.token(), Some(&first));
    assert!(h.backend.is_live(renewed.token().unwrap()));
    assert_eq!(
        h.slots.get(ACCESS_TOKEN_SLOT).unwrap().as_deref(),
        renewed.token().map(|t| t.expose())
    );

    refresher.shutdown().await;
    assert!(!refresher.is_running());
}

#[tokio::test]
async fn rejected_refresh_token_ends_the_session() {
    let h = Harness::new();
    h.backend.register("gone@roadlink.sy", "pass1234");
    let signed_in = h
        .service
        .sign_in(&sign_in_form("gone@roadlink.sy", "pass1234"))
        .await
        .unwrap();
    h.backend.revoke_sessions(&signed_in.session.identity.user_id);

    let err = h.service.refresh().await.unwrap_err();
    assert_eq!(err, AuthError::Backend(BackendError::Unauthorized));
    assert_eq!(h.store().snapshot(), Session::Anonymous);
    assert!(h.slots.get(ACCESS_TOKEN_SLOT).unwrap().is_none());
}

#[tokio::test]
async fn restore_without_credential_stays_signed_out() {
    let h = Harness::new();
    assert_eq!(h.service.restore().await, Restoration::NoCredential);
    assert_eq!(h.store().snapshot(), Session::Anonymous);
}

#[tokio::test]
async fn bad_password_leaves_session_untouched() {
    let h = Harness::new();
    h.backend.register("a@roadlink.sy", "right-pass");
    h.backend.register("b@roadlink.sy", "right-pass");

    h.service
        .sign_in(&sign_in_form("a@roadlink.sy", "right-pass"))
        .await
        .unwrap();
    let before = h.store().snapshot();

    let err = h
        .service
        .sign_in(&sign_in_form("b@roadlink.sy", "wrong-pass"))
        .await
        .unwrap_err();

    assert_eq!(err, AuthError::InvalidCredentials);
    assert_eq!(h.store().snapshot(), before);
}

#[tokio::test]
async fn invalid_form_never_reaches_backend() {
    let h = Harness::new();
    let err = h
        .service
        .sign_in(&sign_in_form("", ""))
        .await
        .unwrap_err();

    let AuthError::Validation(fields) = err else {
        panic!("expected validation error");
    };
    assert!(fields.has("email"));
    assert!(fields.has("password"));
    assert_eq!(h.store().snapshot(), Session::Anonymous);
}

#[tokio::test(start_paused = true)]
async fn sign_out_during_role_lookup_discards_late_write() {
    let h = Harness::new();
    h.backend.register("race@roadlink.sy", "pass1234");
    h.backend.delay_role_lookups(Duration::from_secs(2));

    let service = h.service.clone();
    let pending = tokio::spawn(async move {
        service
            .sign_in(&sign_in_form("race@roadlink.sy", "pass1234"))
            .await
    });

    // Let the sign-in reach the role lookup, then sign out.
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.service.sign_out().await.unwrap();

    let result = pending.await.unwrap();
    assert_eq!(result.unwrap_err(), AuthError::Superseded);
    assert_eq!(h.store().snapshot(), Session::Anonymous);
    assert!(h.slots.get(ACCESS_TOKEN_SLOT).unwrap().is_none());
}

#[tokio::test]
async fn sign_out_revokes_remotely() {
    let h = Harness::new();
    h.backend.register("bye@roadlink.sy", "pass1234");
    let signed_in = h
        .service
        .sign_in(&sign_in_form("bye@roadlink.sy", "pass1234"))
        .await
        .unwrap();
    assert!(h.backend.is_live(&signed_in.session.token));

    h.service.sign_out().await.unwrap();
    h.service.sign_out().await.unwrap();

    assert_eq!(h.store().snapshot(), Session::Anonymous);
    assert!(!h.backend.is_live(&signed_in.session.token));
}

#[tokio::test]
async fn sign_up_establishes_customer_session() {
    let h = Harness::new();
    let form = SignUpForm {
        email: "new@roadlink.sy".into(),
        password: "pass12345".into(),
        confirm_password: "pass12345".into(),
    };

    let SignedUp::SignedIn(signed_in) = h.service.sign_up(&form).await.unwrap() else {
        panic!("expected immediate sign-in");
    };
    assert_eq!(signed_in.role, RoleResolution::Fallback(FallbackReason::NoRecord));
    assert_eq!(h.store().snapshot().email(), Some("new@roadlink.sy"));

    let again = h.service.sign_up(&form).await.unwrap_err();
    assert_eq!(again, AuthError::Backend(BackendError::AccountExists));
}

#[tokio::test]
async fn sign_up_awaiting_confirmation_stays_signed_out() {
    let h = Harness::new();
    h.backend.require_confirmation(true);
    let form = SignUpForm {
        email: "pending@roadlink.sy".into(),
        password: "pass12345".into(),
        confirm_password: "pass12345".into(),
    };

    let outcome = h.service.sign_up(&form).await.unwrap();
    assert_eq!(
        outcome,
        SignedUp::ConfirmationRequired {
            email: "pending@roadlink.sy".into()
        }
    );
    assert_eq!(h.store().snapshot(), Session::Anonymous);
}
