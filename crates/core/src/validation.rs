//! Field-level validation for user-submitted forms.
//!
//! Errors carry a *message key* (e.g. `auth.emailRequired`) rather than
//! rendered text; the UI layer owns the translation tables.
//!
//! Each field reports at most one error: the first rule that fails. Rules are
//! chained on a [`FieldCheck`] and short-circuit after the first failure.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_'+\-.]*[A-Za-z0-9_+\-]@([A-Za-z0-9][A-Za-z0-9\-]*\.)+[A-Za-z]{2,}$")
        .expect("email pattern is valid")
});

/// Returns true if `value` looks like a deliverable email address.
pub fn is_email(value: &str) -> bool {
    !value.starts_with('.') && !value.contains("..") && EMAIL.is_match(value)
}

/// A single failed field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Ordered collection of field errors (form order is preserved).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(Vec<FieldError>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Start checking one field.
    pub fn field<'a>(&'a mut self, name: &'a str, value: &'a str) -> FieldCheck<'a> {
        FieldCheck {
            errors: self,
            name,
            value,
            failed: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    /// Message key reported for `field`, if any.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }

    pub fn has(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn extend(&mut self, other: FieldErrors) {
        self.0.extend(other.0);
    }

    /// `Ok(())` when nothing failed, otherwise the collected errors.
    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl core::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", e.field, e.message)?;
        }
        Ok(())
    }
}

/// Rule chain for a single field value.
pub struct FieldCheck<'a> {
    errors: &'a mut FieldErrors,
    name: &'a str,
    value: &'a str,
    failed: bool,
}

impl FieldCheck<'_> {
    /// Fail with `message` unless `ok(value)` holds.
    pub fn check(mut self, ok: impl FnOnce(&str) -> bool, message: &str) -> Self {
        if !self.failed && !ok(self.value) {
            self.errors.push(self.name, message);
            self.failed = true;
        }
        self
    }

    pub fn required(self, message: &str) -> Self {
        self.check(|v| !v.is_empty(), message)
    }

    pub fn min_chars(self, min: usize, message: &str) -> Self {
        self.check(|v| v.chars().count() >= min, message)
    }

    pub fn max_chars(self, max: usize, message: &str) -> Self {
        self.check(|v| v.chars().count() <= max, message)
    }

    pub fn matches(self, pattern: &Regex, message: &str) -> Self {
        self.check(|v| pattern.is_match(v), message)
    }

    pub fn email(self, message: &str) -> Self {
        self.check(is_email, message)
    }

    /// Whether any rule on this field has failed so far.
    pub fn failed(&self) -> bool {
        self.failed
    }
}
