//! Wiring of a ready-to-use client from configuration.

use std::sync::Arc;

use thiserror::Error;

use roadlink_auth::{AuthService, BackendError, RoleResolver, RouteGuard, SessionStore};
use roadlink_core::{SlotError, SlotStore};
use roadlink_onboarding::DriverOnboarding;

use crate::{ClientConfig, ConfigError, FileSlotStore, HttpBackend, LanguagePreference};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("credential storage unavailable: {0}")]
    Storage(#[from] SlotError),

    #[error("backend client unavailable: {0}")]
    Backend(#[from] BackendError),
}

/// Everything the UI layer talks to, sharing one session store.
#[derive(Clone)]
pub struct Client {
    pub config: ClientConfig,
    pub backend: HttpBackend,
    pub auth: AuthService,
    pub guard: RouteGuard,
    pub language: LanguagePreference,
    pub onboarding: DriverOnboarding,
}

impl Client {
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_config(ClientConfig::from_env()?)
    }

    pub fn from_config(config: ClientConfig) -> Result<Self, ClientError> {
        let slots: Arc<dyn SlotStore> = Arc::new(FileSlotStore::open(config.credentials_path.clone())?);
        let backend = HttpBackend::from_config(&config)?;

        let store = Arc::new(SessionStore::new(slots.clone()));
        let resolver =
            RoleResolver::new(Arc::new(backend.clone())).with_timeout(config.role_lookup_timeout);
        let auth = AuthService::with_resolver(Arc::new(backend.clone()), resolver, store);
        let onboarding = DriverOnboarding::new(auth.clone(), Arc::new(backend.clone()));

        tracing::debug!(
            backend = %config.backend_url,
            credentials = %config.credentials_path.display(),
            "client configured"
        );

        Ok(Self {
            guard: RouteGuard::new(config.guard.clone()),
            language: LanguagePreference::new(slots),
            config,
            backend,
            auth,
            onboarding,
        })
    }

    pub fn store(&self) -> &SessionStore {
        self.auth.store()
    }
}
