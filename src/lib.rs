//! # Turnstile
//!
//! Authenticated HTTP access layer for client applications.
//!
//! This crate provides:
//! - Resource descriptors for data requests and streamed file downloads
//! - A request engine that classifies responses, tracks in-flight work by
//!   correlation id, and supports cancellation-by-identity
//! - A Keycloak-style token authority that injects bearer credentials and
//!   transparently refreshes them through the token endpoint before the
//!   original request proceeds
//! - Pluggable credential storage (in-memory, OS keyring)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use turnstile::{
//!     DataResource, HttpWebservice, KeycloakAuthorization, KeycloakConfig,
//!     MemoryCredentialStore, Method,
//! };
//!
//! # async fn example() -> Result<(), turnstile::Error> {
//! let webservice = Arc::new(HttpWebservice::new("downloads"));
//! let authority = Arc::new(KeycloakAuthorization::new(
//!     KeycloakConfig {
//!         base_url: "https://sso.example.com".into(),
//!         realm: "main".into(),
//!         client_id: "app".into(),
//!         redirect_url: "app://callback".into(),
//!         use_offline_token: false,
//!     },
//!     MemoryCredentialStore::new(),
//!     webservice.clone(),
//! ));
//! webservice.set_authorization(authority.clone());
//!
//! authority.login_with_password("user", "secret").await?;
//!
//! let resource = DataResource::<serde_json::Value>::json(
//!     "https://api.example.com/profile",
//!     Method::Get,
//!     None,
//! );
//! let profile = webservice.load(resource).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod downloads;
pub mod error;
pub mod jwt;
pub mod keycloak;
pub mod resource;
pub mod store;
pub mod tasks;
pub mod webservice;

// Re-export commonly used types at crate root
pub use cache::DecodedCache;
pub use downloads::DownloadedFiles;
pub use error::Error;
pub use jwt::Jwt;
pub use keycloak::{AuthError, KeycloakAuthorization, KeycloakConfig};
pub use resource::{mime, DataResource, DownloadResource, Headers, Method};
pub use store::{
    CredentialStore, Credentials, MemoryCredentialStore, Secret, StoreError, StoredCredentials,
};
pub use tasks::TaskRegistry;
pub use webservice::{Authorization, DownloadEvents, HttpWebservice, NetworkError};

#[cfg(feature = "keyring-store")]
pub use store::KeyringCredentialStore;
