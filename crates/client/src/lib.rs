//! `roadlink-client`
//!
//! The concrete client shell around the auth and on-boarding crates:
//! environment configuration, file-backed slots, the language preference and
//! the HTTP backend.

pub mod app;
pub mod config;
pub mod http;
pub mod preferences;
pub mod storage;

pub use app::{Client, ClientError};
pub use config::{ClientConfig, ConfigError};
pub use http::HttpBackend;
pub use preferences::{LANGUAGE_SLOT, LanguagePreference};
pub use storage::FileSlotStore;
