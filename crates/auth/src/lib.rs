//! `roadlink-auth`: client-side session and role authorization.
//!
//! This crate is decoupled from any transport: the remote backend is reached
//! through the traits in [`backend`], and persistence through
//! [`roadlink_core::SlotStore`].

pub mod backend;
pub mod forms;
pub mod guard;
pub mod listener;
pub mod memory;
pub mod refresher;
pub mod resolver;
pub mod roles;
pub mod service;
pub mod session;
pub mod store;
pub mod token;

pub use backend::{
    AuthEvent, AuthEvents, AuthProvider, BackendError, Credentials, RemoteSession, RemoteUser,
    RoleDirectory, SignUpOutcome,
};
pub use forms::{SignInForm, SignUpForm};
pub use guard::{GuardConfig, GuardDecision, Redirect, RouteGuard, TargetClass, post_sign_in_target};
pub use listener::{AuthEventListener, ListenerHandle, ListenerState};
pub use refresher::{RefresherHandle, TokenRefresher};
pub use resolver::{FallbackReason, RoleResolution, RoleResolver};
pub use roles::Role;
pub use service::{AuthError, AuthService, SignedIn, SignedUp};
pub use session::{AuthenticatedSession, Generation, Identity, Session};
pub use store::{ACCESS_TOKEN_SLOT, CommitOutcome, REFRESH_SLOT, Restoration, SessionStore, SessionUpdate};
pub use token::{BearerToken, TokenValidationError, validate_expiry};
