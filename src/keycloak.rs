//! The token authority.
//!
//! [`KeycloakAuthorization`] owns the credential lifecycle: it decides
//! whether the stored access token is still usable, refreshes it through
//! the token endpoint when it is not, and injects the bearer header into
//! pending requests. Login, refresh and logout are themselves plain,
//! non-authorized resources dispatched through the same request engine.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use thiserror::Error;
use uuid::Uuid;

use crate::error::Error;
use crate::jwt::Jwt;
use crate::resource::{mime, DataResource, Method};
use crate::store::{CredentialStore, Credentials, StoredCredentials};
use crate::webservice::{Authorization, HttpWebservice, NetworkError};

/// Safety margin subtracted from the access token's lifetime, guarding
/// against clock skew and in-flight latency.
pub const DEFAULT_EXPIRATION_TOLERANCE_SECS: i64 = 60;

/// Error type for the auth layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No credentials are stored; the user never logged in (or logged out).
    #[error("no credentials given")]
    MissingCredentials,

    /// The stored credentials could not be refreshed; a fresh login is
    /// required.
    #[error("login required")]
    LoginNeeded,

    /// Logout was requested while already logged out.
    #[error("tried to log out while already logged out")]
    AlreadyLoggedOut,
}

/// Endpoint and client configuration for a Keycloak realm.
#[derive(Debug, Clone)]
pub struct KeycloakConfig {
    /// Base URL of the Keycloak installation, without the realm path.
    pub base_url: String,
    pub realm: String,
    pub client_id: String,
    /// Redirect URL registered for the auth-code grant.
    pub redirect_url: String,
    /// Request `scope=offline_access` on login so the refresh token
    /// outlives the session.
    pub use_offline_token: bool,
}

/// Token authority against a Keycloak-style OpenID Connect realm.
pub struct KeycloakAuthorization<S> {
    config: KeycloakConfig,
    tolerance: Duration,
    store: S,
    webservice: Arc<HttpWebservice>,
}

impl<S: CredentialStore> KeycloakAuthorization<S> {
    pub fn new(config: KeycloakConfig, store: S, webservice: Arc<HttpWebservice>) -> Self {
        Self {
            config,
            tolerance: Duration::seconds(DEFAULT_EXPIRATION_TOLERANCE_SECS),
            store,
            webservice,
        }
    }

    /// Override the expiration tolerance.
    pub fn with_tolerance(mut self, seconds: i64) -> Self {
        self.tolerance = Duration::seconds(seconds);
        self
    }

    /// The credential store backing this authority.
    pub fn credential_store(&self) -> &S {
        &self.store
    }

    fn openid_connect_url(&self) -> String {
        format!(
            "{}/auth/realms/{}/protocol/openid-connect",
            self.config.base_url.trim_end_matches('/'),
            self.config.realm
        )
    }

    fn token_url(&self) -> String {
        format!("{}/token", self.openid_connect_url())
    }

    fn logout_url(&self) -> String {
        format!("{}/logout", self.openid_connect_url())
    }

    /// Whether a credentials record is currently stored.
    pub async fn is_logged_in(&self) -> Result<bool, Error> {
        Ok(self.store.read().await?.is_some())
    }

    /// Decoded payload of the stored access token, if any.
    pub async fn jwt(&self) -> Result<Option<Jwt>, Error> {
        let credentials = self.store.read().await?;
        Ok(credentials.and_then(|c| Jwt::parse(c.access_token.expose())))
    }

    /// Log in with the password grant and persist the obtained credentials.
    pub async fn login_with_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<StoredCredentials, Error> {
        tracing::info!(realm = %self.config.realm, "logging in with password grant");
        self.load_credentials(self.password_resource(username, password))
            .await
    }

    /// Log in with the authorization-code grant and persist the obtained
    /// credentials.
    pub async fn login_with_auth_code(&self, code: &str) -> Result<StoredCredentials, Error> {
        tracing::info!(realm = %self.config.realm, "logging in with authorization code grant");
        self.load_credentials(self.auth_code_resource(code)).await
    }

    /// Log out: delete the stored credentials, reset the engine, then tell
    /// the remote endpoint to revoke the session.
    ///
    /// The local record is deleted before the remote call so the session is
    /// never left authorized locally, even if the endpoint fails or hangs.
    pub async fn logout(&self) -> Result<(), Error> {
        let Some(current) = self.store.read().await? else {
            return Err(AuthError::AlreadyLoggedOut.into());
        };

        self.store.delete().await?;
        self.webservice.reset();
        tracing::info!(realm = %self.config.realm, "logged out locally, revoking remote session");

        let resource = self.logout_resource(current.refresh_token.expose());
        self.webservice.load(resource).await?;
        Ok(())
    }

    /// Return usable credentials, refreshing them through the token
    /// endpoint when the stored access token is expired or about to expire.
    async fn renew_or_current(&self, correlation_id: Uuid) -> Result<StoredCredentials, Error> {
        let Some(current) = self.store.read().await? else {
            return Err(AuthError::MissingCredentials.into());
        };

        if current.is_usable_at(Utc::now(), self.tolerance) {
            return Ok(current);
        }

        tracing::info!(realm = %self.config.realm, "access token expired, refreshing");
        // The refresh call runs under the identity of the request it
        // authorizes: cancelling that request cancels the refresh too.
        let resource = self
            .refresh_resource(current.refresh_token.expose())
            .with_correlation_id(correlation_id);
        self.load_credentials(resource).await
    }

    /// Dispatch a token-endpoint resource and persist the credentials it
    /// returns.
    ///
    /// `Unauthorized` and `NoInternetConnectivity` pass through unchanged so
    /// callers can tell "needs a fresh login" from "offline"; every other
    /// failure of the endpoint is normalized to [`AuthError::LoginNeeded`].
    async fn load_credentials(
        &self,
        resource: DataResource<Credentials>,
    ) -> Result<StoredCredentials, Error> {
        match self.webservice.load(resource).await {
            Ok(Some(credentials)) => Ok(self.store.save(credentials).await?),
            Ok(None) => Err(AuthError::MissingCredentials.into()),
            Err(Error::Network(NetworkError::Unauthorized)) => {
                Err(NetworkError::Unauthorized.into())
            }
            Err(Error::Network(NetworkError::NoInternetConnectivity)) => {
                Err(NetworkError::NoInternetConnectivity.into())
            }
            Err(error) => {
                tracing::warn!(%error, "token endpoint request failed, login needed");
                Err(AuthError::LoginNeeded.into())
            }
        }
    }

    fn password_resource(&self, username: &str, password: &str) -> DataResource<Credentials> {
        let mut pairs = vec![
            ("username", username),
            ("password", password),
            ("client_id", self.config.client_id.as_str()),
            ("grant_type", "password"),
        ];
        if self.config.use_offline_token {
            pairs.push(("scope", "offline_access"));
        }
        self.token_post(form_body(&pairs), self.token_url())
    }

    fn auth_code_resource(&self, code: &str) -> DataResource<Credentials> {
        let mut pairs = vec![
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_url.as_str()),
            ("grant_type", "authorization_code"),
        ];
        if self.config.use_offline_token {
            pairs.push(("scope", "offline_access"));
        }
        self.token_post(form_body(&pairs), self.token_url())
    }

    fn refresh_resource(&self, refresh_token: &str) -> DataResource<Credentials> {
        let pairs = [
            ("client_id", self.config.client_id.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        self.token_post(form_body(&pairs), self.token_url())
    }

    fn logout_resource(&self, refresh_token: &str) -> DataResource<()> {
        let pairs = [
            ("client_id", self.config.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];
        // The logout endpoint answers with an empty body; nothing to decode.
        let mut resource =
            DataResource::new(self.logout_url(), Method::Post, Some(form_body(&pairs)), |_| {
                Ok(())
            });
        resource.headers.content_type = Some(mime::URL_ENCODED.to_string());
        resource.authorization_needed = false;
        resource
    }

    fn token_post(&self, body: Vec<u8>, url: String) -> DataResource<Credentials> {
        let mut resource = DataResource::<Credentials>::json(url, Method::Post, Some(body));
        resource.headers.content_type = Some(mime::URL_ENCODED.to_string());
        // must stay false or authorizing this request would recurse into
        // another refresh
        resource.authorization_needed = false;
        resource
    }
}

#[async_trait]
impl<S: CredentialStore + 'static> Authorization for KeycloakAuthorization<S> {
    async fn authorize(
        &self,
        request: &mut reqwest::Request,
        correlation_id: Uuid,
    ) -> Result<(), Error> {
        let credentials = self.renew_or_current(correlation_id).await?;

        let header = format!("Bearer {}", credentials.access_token.expose());
        // a stored token that does not fit in a header cannot authorize
        // anything; treat it like any other unusable credential
        let mut value =
            HeaderValue::from_str(&header).map_err(|_| Error::from(AuthError::LoginNeeded))?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }
}

impl<S> std::fmt::Debug for KeycloakAuthorization<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeycloakAuthorization")
            .field("realm", &self.config.realm)
            .field("client_id", &self.config.client_id)
            .finish()
    }
}

/// Encode key/value pairs as an `application/x-www-form-urlencoded` body.
///
/// Every reserved delimiter of the body format (`&`, `+`, `=`, `?`) is
/// escaped inside values, whatever its validity elsewhere in a URL.
fn form_body(pairs: &[(&str, &str)]) -> Vec<u8> {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish().into_bytes()
}
