//! Step-by-step navigation through the on-boarding form.

use chrono::NaiveDate;

use roadlink_core::FieldErrors;

use crate::{DriverProfileForm, OnboardingStep};

/// On-boarding progress: the form being filled in, the step on screen and
/// the furthest step reached so far.
///
/// Moving forward requires the current step to validate; moving back never
/// does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Onboarding {
    form: DriverProfileForm,
    step: Option<OnboardingStep>,
    reached: Option<OnboardingStep>,
}

impl Onboarding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume with a partially filled form, at the first step.
    pub fn with_form(form: DriverProfileForm) -> Self {
        Self {
            form,
            step: None,
            reached: None,
        }
    }

    pub fn step(&self) -> OnboardingStep {
        self.step.unwrap_or(OnboardingStep::Personal)
    }

    /// Furthest step unlocked by [`Onboarding::advance`].
    pub fn reached(&self) -> OnboardingStep {
        self.reached.unwrap_or(OnboardingStep::Personal)
    }

    pub fn is_last_step(&self) -> bool {
        self.step().next().is_none()
    }

    pub fn form(&self) -> &DriverProfileForm {
        &self.form
    }

    pub fn form_mut(&mut self) -> &mut DriverProfileForm {
        &mut self.form
    }

    pub fn into_form(self) -> DriverProfileForm {
        self.form
    }

    /// Validate the current step and, if it passes, move to the next one.
    ///
    /// On the last step a successful validation leaves the step unchanged;
    /// the caller submits instead.
    pub fn advance(&mut self, today: NaiveDate) -> Result<OnboardingStep, FieldErrors> {
        let current = self.step();
        if let Err(errors) = self.form.validate_step(current, today) {
            tracing::debug!(step = %current, errors = errors.len(), "on-boarding step rejected");
            return Err(errors);
        }

        let next = current.next().unwrap_or(current);
        self.step = Some(next);
        self.reached = Some(self.reached().max(next));
        Ok(next)
    }

    pub fn back(&mut self) -> OnboardingStep {
        let previous = self.step().previous().unwrap_or(OnboardingStep::Personal);
        self.step = Some(previous);
        previous
    }

    /// Jump straight to `step` (e.g. to fix a field reported on submit).
    ///
    /// Only steps up to and including the furthest one reached are
    /// reachable, so going back does not lock the later ones again.
    pub fn go_to(&mut self, step: OnboardingStep) -> bool {
        if step > self.reached() {
            return false;
        }
        self.step = Some(step);
        true
    }
}
