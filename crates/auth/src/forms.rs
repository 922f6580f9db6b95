//! Sign-in and sign-up form validation.

use serde::{Deserialize, Serialize};

use roadlink_core::FieldErrors;

use crate::Credentials;

pub const SIGN_UP_PASSWORD_MIN: usize = 7;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInForm {
    pub email: String,
    pub password: String,
}

impl SignInForm {
    pub fn validate(&self) -> Result<Credentials, FieldErrors> {
        let mut errors = FieldErrors::new();
        errors
            .field("email", &self.email)
            .required("auth.emailRequired")
            .email("auth.emailInvalid");
        errors
            .field("password", &self.password)
            .required("auth.passwordRequired");

        errors.into_result()?;
        Ok(Credentials::new(self.email.trim(), self.password.clone()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpForm {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl SignUpForm {
    pub fn validate(&self) -> Result<Credentials, FieldErrors> {
        let mut errors = FieldErrors::new();
        errors
            .field("email", &self.email)
            .required("auth.emailRequired")
            .email("auth.emailInvalid");
        errors
            .field("password", &self.password)
            .required("auth.passwordRequired")
            .min_chars(SIGN_UP_PASSWORD_MIN, "auth.passwordMin");

        let confirm = errors
            .field("confirmPassword", &self.confirm_password)
            .required("auth.confirmPasswordRequired");
        if !confirm.failed() && self.password != self.confirm_password {
            errors.push("confirmPassword", "auth.passwordsDontMatch");
        }

        errors.into_result()?;
        Ok(Credentials::new(self.email.trim(), self.password.clone()))
    }
}
