use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use roadlink_auth::{BackendError, BearerToken};
use roadlink_core::UserId;

use crate::DriverProfile;

/// Driver record as stored by the backend, keyed by the owning account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverRecord {
    pub user_id: UserId,
    #[serde(flatten)]
    pub profile: DriverProfile,
    pub registered_at: DateTime<Utc>,
}

/// Remote store of driver records.
///
/// Writes are authorized by the new account's bearer token. Registering the
/// same account again replaces its record.
#[async_trait::async_trait]
pub trait DriverRegistry: Send + Sync {
    async fn register(&self, record: &DriverRecord, token: &BearerToken) -> Result<(), BackendError>;
}

#[async_trait::async_trait]
impl<R> DriverRegistry for Arc<R>
where
    R: DriverRegistry + ?Sized,
{
    async fn register(&self, record: &DriverRecord, token: &BearerToken) -> Result<(), BackendError> {
        (**self).register(record, token).await
    }
}

/// In-memory registry for tests/dev.
///
/// Clones share state. One record per account.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDriverRegistry {
    records: Arc<Mutex<Vec<DriverRecord>>>,
    failure: Arc<Mutex<Option<BackendError>>>,
}

impl InMemoryDriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DriverRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn find(&self, user_id: &UserId) -> Option<DriverRecord> {
        self.records().into_iter().find(|r| &r.user_id == user_id)
    }

    /// Fail every registration with `failure` until cleared with `None`.
    pub fn fail_registrations(&self, failure: Option<BackendError>) {
        if let Ok(mut slot) = self.failure.lock() {
            *slot = failure;
        }
    }
}

#[async_trait::async_trait]
impl DriverRegistry for InMemoryDriverRegistry {
    async fn register(&self, record: &DriverRecord, _token: &BearerToken) -> Result<(), BackendError> {
        let poisoned = || BackendError::Network("driver registry lock poisoned".to_string());
        if let Some(err) = self.failure.lock().map_err(|_| poisoned())?.clone() {
            return Err(err);
        }

        let mut records = self.records.lock().map_err(|_| poisoned())?;
        match records.iter_mut().find(|r| r.user_id == record.user_id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }
}
