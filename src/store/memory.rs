//! In-memory credential storage implementation.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::RwLock;

use super::{CredentialStore, Credentials, StoreError, StoredCredentials};

/// In-memory credential store for testing and development.
///
/// This store is not persistent; the record is lost when the process exits.
///
/// # Thread Safety
///
/// This implementation uses interior mutability via `RwLock` and is
/// safe to share across threads.
pub struct MemoryCredentialStore {
    record: RwLock<Option<StoredCredentials>>,
}

impl MemoryCredentialStore {
    /// Create a new, logged-out memory store.
    pub fn new() -> Self {
        Self {
            record: RwLock::new(None),
        }
    }

    /// Create a memory store seeded with an existing record.
    pub fn with_record(record: StoredCredentials) -> Self {
        Self {
            record: RwLock::new(Some(record)),
        }
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let present = self.record.read().map(|r| r.is_some()).unwrap_or(false);
        f.debug_struct("MemoryCredentialStore")
            .field("logged_in", &present)
            .finish()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn read(&self) -> Result<Option<StoredCredentials>, StoreError> {
        let record = self.record.read().map_err(|e| StoreError::Backend {
            message: format!("lock poisoned: {}", e),
        })?;
        Ok(record.clone())
    }

    async fn save(&self, credentials: Credentials) -> Result<StoredCredentials, StoreError> {
        let stored = StoredCredentials::from_wire(credentials, Utc::now());
        let mut record = self.record.write().map_err(|e| StoreError::Backend {
            message: format!("lock poisoned: {}", e),
        })?;
        *record = Some(stored.clone());
        Ok(stored)
    }

    async fn delete(&self) -> Result<(), StoreError> {
        let mut record = self.record.write().map_err(|e| StoreError::Backend {
            message: format!("lock poisoned: {}", e),
        })?;
        *record = None;
        Ok(())
    }
}
