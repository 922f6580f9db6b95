//! `roadlink-core`: shared building blocks for the Roadlink client.
//!
//! This crate contains **pure** primitives (no network, no filesystem).
//! Persistence is expressed as the [`SlotStore`] trait; concrete stores live
//! in the client crate.

pub mod error;
pub mod id;
pub mod locale;
pub mod slot;
pub mod validation;

pub use error::DomainError;
pub use id::UserId;
pub use locale::{Direction, Language};
pub use slot::{MemorySlotStore, SlotEntry, SlotError, SlotStore};
pub use validation::{FieldError, FieldErrors};
