//! Interface language preference.

use std::sync::Arc;

use chrono::Duration;

use roadlink_core::{Direction, Language, SlotError, SlotStore};

pub const LANGUAGE_SLOT: &str = "lang";

/// How long a chosen language is remembered.
pub fn language_max_age() -> Duration {
    Duration::days(365)
}

/// Persisted language choice.
#[derive(Clone)]
pub struct LanguagePreference {
    slots: Arc<dyn SlotStore>,
}

impl LanguagePreference {
    pub fn new(slots: Arc<dyn SlotStore>) -> Self {
        Self { slots }
    }

    /// Stored language, or the default when unset or unreadable.
    pub fn load(&self) -> Language {
        match self.slots.get(LANGUAGE_SLOT) {
            Ok(Some(raw)) => raw.parse::<Language>().unwrap_or_else(|err| {
                tracing::warn!(value = %raw, "ignoring stored language: {err}");
                Language::default()
            }),
            Ok(None) => Language::default(),
            Err(err) => {
                tracing::warn!("failed to read language preference: {err}");
                Language::default()
            }
        }
    }

    pub fn direction(&self) -> Direction {
        self.load().direction()
    }

    pub fn set(&self, language: Language) -> Result<(), SlotError> {
        self.slots
            .set(LANGUAGE_SLOT, language.as_str(), Some(language_max_age()))
    }

    /// Forget the choice; subsequent loads return the default.
    pub fn reset(&self) -> Result<(), SlotError> {
        self.slots.remove(LANGUAGE_SLOT)
    }
}
