//! Background renewal of the access token ahead of its expiry.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::{AuthError, AuthService, BackendError, Session};

/// How long before expiry the access token is renewed.
pub const DEFAULT_REFRESH_LEAD: Duration = Duration::from_secs(60);

/// Pause after a failed renewal before trying again.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Renews the active session's access token with its refresh token.
///
/// Follows the session store: a new sign-in reschedules, a sign-out parks the
/// task until the next session.
#[derive(Clone)]
pub struct TokenRefresher {
    auth: AuthService,
    lead: Duration,
    retry_delay: Duration,
}

impl TokenRefresher {
    pub fn new(auth: AuthService) -> Self {
        Self {
            auth,
            lead: DEFAULT_REFRESH_LEAD,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_lead(mut self, lead: Duration) -> Self {
        self.lead = lead;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Time left until `session` should be renewed.
    ///
    /// `None` when it cannot be: signed out, no refresh token, or no expiry.
    /// A token with less than `lead` to live is renewed halfway through what
    /// remains.
    pub fn due_in(&self, session: &Session) -> Option<Duration> {
        let session = session.authenticated()?;
        session.refresh_token.as_ref()?;
        let remaining = (session.expires_at? - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        Some(if remaining > self.lead {
            remaining - self.lead
        } else {
            remaining / 2
        })
    }

    /// Run on its own task until the store goes away or the handle is shut
    /// down.
    pub fn spawn(self) -> RefresherHandle {
        let task = tokio::spawn(async move {
            let mut changes = self.auth.store().subscribe();
            loop {
                let due = self.due_in(&changes.borrow_and_update());
                let Some(wait) = due else {
                    if changes.changed().await.is_err() {
                        break;
                    }
                    continue;
                };

                tracing::debug!(in_secs = wait.as_secs(), "access token renewal scheduled");
                tokio::select! {
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(wait) => self.renew().await,
                }
            }
        });

        RefresherHandle { task }
    }

    async fn renew(&self) {
        match self.auth.refresh().await {
            Ok(true) => tracing::debug!("access token renewed"),
            Ok(false) => {}
            // The session has been ended and the reason logged.
            Err(AuthError::Backend(BackendError::Unauthorized)) => {}
            Err(err) => {
                tracing::warn!(retry_in_secs = self.retry_delay.as_secs(), "token renewal failed: {err}");
                tokio::time::sleep(self.retry_delay).await;
            }
        }
    }
}

/// Handle to a spawned [`TokenRefresher`].
#[derive(Debug)]
pub struct RefresherHandle {
    task: JoinHandle<()>,
}

impl RefresherHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub async fn shutdown(&mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}
