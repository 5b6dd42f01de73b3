//! OS keyring-backed credential storage implementation.

use async_trait::async_trait;
use chrono::Utc;
use keyring::Entry;

use super::{CredentialStore, Credentials, StoreError, StoredCredentials};

const KEYRING_USER: &str = "turnstile";

/// OS keyring-backed credential store.
///
/// This store uses the platform's native keyring service:
/// - macOS: Keychain
/// - Linux: Secret Service API (via libsecret)
/// - Windows: Credential Manager
///
/// The whole [`StoredCredentials`] record is serialized as JSON into a
/// single keyring entry under the caller-supplied store name, so one store
/// name corresponds to one logical session.
pub struct KeyringCredentialStore {
    store_name: String,
}

impl KeyringCredentialStore {
    /// Create a new keyring store for the given store name.
    ///
    /// # Panics
    ///
    /// Panics if the keyring backend is not available on this platform.
    /// Use [`try_new`](Self::try_new) for a non-panicking version.
    pub fn new(store_name: &str) -> Self {
        Self::try_new(store_name).expect("keyring backend not available")
    }

    /// Try to create a new keyring store.
    ///
    /// Returns an error if the keyring backend is not available on this platform.
    pub fn try_new(store_name: &str) -> Result<Self, StoreError> {
        match Entry::new(store_name, KEYRING_USER) {
            Ok(_) => Ok(Self {
                store_name: store_name.to_string(),
            }),
            Err(e) => Err(StoreError::KeyringUnavailable {
                message: format!("keyring backend not available: {}", e),
            }),
        }
    }

    fn entry(&self) -> Result<Entry, StoreError> {
        Entry::new(&self.store_name, KEYRING_USER).map_err(|e| StoreError::Backend {
            message: format!("failed to create keyring entry: {}", e),
        })
    }
}

impl std::fmt::Debug for KeyringCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringCredentialStore")
            .field("store_name", &self.store_name)
            .finish()
    }
}

#[async_trait]
impl CredentialStore for KeyringCredentialStore {
    async fn read(&self) -> Result<Option<StoredCredentials>, StoreError> {
        let entry = self.entry()?;

        match entry.get_password() {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(keyring::Error::Ambiguous(_)) => Err(StoreError::Backend {
                message: format!("ambiguous keyring entry for store: {}", self.store_name),
            }),
            Err(keyring::Error::PlatformFailure(e)) => Err(StoreError::Backend {
                message: format!("platform keyring failure: {}", e),
            }),
            Err(e) => Err(StoreError::Backend {
                message: format!("keyring error: {}", e),
            }),
        }
    }

    async fn save(&self, credentials: Credentials) -> Result<StoredCredentials, StoreError> {
        let stored = StoredCredentials::from_wire(credentials, Utc::now());
        let json = serde_json::to_string(&stored)?;

        let entry = self.entry()?;
        entry
            .set_password(&json)
            .map_err(|e| StoreError::Backend {
                message: format!("failed to write keyring entry: {}", e),
            })?;

        tracing::debug!(store = %self.store_name, "stored credentials in keyring");
        Ok(stored)
    }

    async fn delete(&self) -> Result<(), StoreError> {
        let entry = self.entry()?;

        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()), // Idempotent delete
            Err(e) => Err(StoreError::Backend {
                message: format!("failed to delete keyring entry: {}", e),
            }),
        }
    }
}
