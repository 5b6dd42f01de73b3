//! Top-level error type.

use thiserror::Error;

use crate::keycloak::AuthError;
use crate::store::StoreError;
use crate::webservice::NetworkError;

/// Top-level error type encompassing every failure the crate reports.
///
/// Errors are always returned as values; nothing is thrown across the
/// asynchronous boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// Classified network or transport failure.
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// Credential lifecycle failure.
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// Error from credential storage operations.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Filesystem failure while finalizing a download.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
