//! Credential storage abstraction.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`Credentials`] - The wire shape returned by the token endpoint
//! - [`StoredCredentials`] - The persisted token pair with absolute expiry
//! - [`CredentialStore`] - Trait for storage backends
//! - [`MemoryCredentialStore`] - In-memory implementation for testing
//! - [`KeyringCredentialStore`] - OS keyring implementation (with `keyring-store` feature)
//!
//! Exactly one [`StoredCredentials`] record exists per store; its absence
//! means "logged out".

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;

pub use memory::MemoryCredentialStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringCredentialStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value.
#[derive(Clone, Serialize, Deserialize)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Consume the secret and return the inner value.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for credential store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    Backend { message: String },

    /// Serialization or deserialization of the stored record failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },
}

/// Token pair as returned by the token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

/// Persisted token pair with the absolute access-token expiry computed at
/// save time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub access_token: Secret,
    pub refresh_token: Secret,
    pub access_token_expires_at: DateTime<Utc>,
}

impl StoredCredentials {
    /// Turn a wire-shape token pair into its stored form, resolving the
    /// relative lifetime against `now`.
    ///
    /// An `expires_in` too large to represent as an absolute instant
    /// saturates at the representable bound instead of failing; the token
    /// is simply treated as never (or always) expired.
    pub fn from_wire(credentials: Credentials, now: DateTime<Utc>) -> Self {
        let expires_at = Duration::try_seconds(credentials.expires_in)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or(if credentials.expires_in >= 0 {
                DateTime::<Utc>::MAX_UTC
            } else {
                DateTime::<Utc>::MIN_UTC
            });
        Self {
            access_token: Secret::new(credentials.access_token),
            refresh_token: Secret::new(credentials.refresh_token),
            access_token_expires_at: expires_at,
        }
    }

    /// Whether the access token is still usable at `instant`, leaving
    /// `tolerance` as a safety margin against clock skew and in-flight
    /// latency.
    pub fn is_usable_at(&self, instant: DateTime<Utc>, tolerance: Duration) -> bool {
        self.access_token_expires_at > instant + tolerance
    }
}

/// Abstraction over credential storage backends.
///
/// Implementations include:
/// - [`MemoryCredentialStore`] - In-memory storage for testing
/// - [`KeyringCredentialStore`] (with `keyring-store` feature) - OS keyring
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Retrieve the stored record. `Ok(None)` means logged out.
    async fn read(&self) -> Result<Option<StoredCredentials>, StoreError>;

    /// Persist a freshly obtained token pair, overwriting any existing
    /// record, and return the stored form with its computed expiry.
    async fn save(&self, credentials: Credentials) -> Result<StoredCredentials, StoreError>;

    /// Delete the stored record. Deleting an absent record is not an error.
    async fn delete(&self) -> Result<(), StoreError>;
}
