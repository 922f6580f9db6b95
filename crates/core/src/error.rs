//! Errors raised while parsing or checking client-side values.

use thiserror::Error;

use crate::validation::FieldErrors;

/// A value coming from the user, the backend or local storage was rejected.
///
/// Transport and storage failures have their own error types at their
/// boundaries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// One or more form fields failed validation.
    #[error("validation failed: {0}")]
    Validation(FieldErrors),

    /// An identifier was blank or malformed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("unknown role '{0}'")]
    UnknownRole(String),

    #[error("unsupported language '{0}'")]
    UnsupportedLanguage(String),
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

impl From<FieldErrors> for DomainError {
    fn from(value: FieldErrors) -> Self {
        Self::Validation(value)
    }
}
