//! Submitting a completed on-boarding form.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use thiserror::Error;

use roadlink_auth::{
    AuthError, AuthService, AuthenticatedSession, BackendError, SignInForm, SignUpForm, SignedUp,
};
use roadlink_core::FieldErrors;

use crate::{DriverProfileForm, DriverRecord, DriverRegistry, OnboardingStep};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OnboardingError {
    /// The form is incomplete; `step` is the earliest step with a failed field.
    #[error("invalid {step} details: {errors}")]
    Validation {
        step: OnboardingStep,
        errors: FieldErrors,
    },

    /// The account could not be created or signed in to; nothing was
    /// registered.
    #[error("account creation failed: {0}")]
    Account(AuthError),

    /// The account exists and is signed in, but the driver record was not
    /// stored.
    #[error("driver registration failed: {0}")]
    Registration(BackendError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Registered(DriverRecord),
    /// The account needs email confirmation before the record can be
    /// registered.
    AwaitingConfirmation { email: String },
}

enum Account {
    Ready(AuthenticatedSession),
    Unconfirmed(String),
}

/// Creates driver accounts and registers their records.
#[derive(Clone)]
pub struct DriverOnboarding {
    auth: AuthService,
    registry: Arc<dyn DriverRegistry>,
}

impl DriverOnboarding {
    pub fn new(auth: AuthService, registry: Arc<dyn DriverRegistry>) -> Self {
        Self { auth, registry }
    }

    /// Validate every step, sign the account up, then register the driver.
    ///
    /// Safe to call again after an `AwaitingConfirmation` or `Registration`
    /// outcome: the existing account is reused and the record replaced.
    pub async fn submit(
        &self,
        form: &DriverProfileForm,
        today: NaiveDate,
    ) -> Result<Submission, OnboardingError> {
        let profile = form.validate(today).map_err(|errors| OnboardingError::Validation {
            step: OnboardingStep::first_failing(&errors).unwrap_or(OnboardingStep::Personal),
            errors,
        })?;

        let session = match self.account_for(form).await? {
            Account::Ready(session) => session,
            Account::Unconfirmed(email) => return Ok(Submission::AwaitingConfirmation { email }),
        };

        let record = DriverRecord {
            user_id: session.identity.user_id.clone(),
            profile,
            registered_at: Utc::now(),
        };

        if let Err(err) = self.registry.register(&record, &session.token).await {
            tracing::error!(user_id = %record.user_id, "driver record not stored: {err}");
            return Err(OnboardingError::Registration(err));
        }

        tracing::info!(user_id = %record.user_id, "driver registered");
        Ok(Submission::Registered(record))
    }

    /// The signed-in account the record is registered under.
    ///
    /// A retried submission reuses the session of an earlier attempt, or
    /// signs in to the account an earlier attempt created.
    async fn account_for(&self, form: &DriverProfileForm) -> Result<Account, OnboardingError> {
        let email = form.email.trim();
        if let Some(session) = self.auth.store().snapshot().authenticated() {
            if session.identity.email.eq_ignore_ascii_case(email) {
                tracing::debug!(user_id = %session.identity.user_id, "resuming with the active session");
                return Ok(Account::Ready(session.clone()));
            }
        }

        let account = SignUpForm {
            email: form.email.clone(),
            password: form.password.clone(),
            confirm_password: form.confirm_password.clone(),
        };
        match self.auth.sign_up(&account).await {
            Ok(SignedUp::SignedIn(signed_in)) => Ok(Account::Ready(signed_in.session)),
            Ok(SignedUp::ConfirmationRequired { email }) => {
                tracing::info!(%email, "driver account awaiting confirmation");
                Ok(Account::Unconfirmed(email))
            }
            Err(AuthError::Backend(BackendError::AccountExists)) => {
                tracing::info!(%email, "driver account exists; signing in");
                let credentials = SignInForm {
                    email: form.email.clone(),
                    password: form.password.clone(),
                };
                match self.auth.sign_in(&credentials).await {
                    Ok(signed_in) => Ok(Account::Ready(signed_in.session)),
                    Err(err) => Err(OnboardingError::Account(err)),
                }
            }
            Err(err) => {
                tracing::warn!("driver sign-up failed: {err}");
                Err(OnboardingError::Account(err))
            }
        }
    }
}
