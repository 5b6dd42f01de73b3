//! Integration tests for the token authority's refresh path.
//!
//! These tests verify that KeycloakAuthorization correctly:
//! - Uses a still-valid access token without a refresh round-trip
//! - Refreshes an expired token exactly once before the retried request
//! - Shares the original correlation id with the refresh call
//! - Normalizes refresh failures without masking 401 / offline

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use turnstile::{
    AuthError, Credentials, CredentialStore, DataResource, Error, HttpWebservice,
    KeycloakAuthorization, KeycloakConfig, MemoryCredentialStore, Method, NetworkError,
};
use url::Url;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN_PATH: &str = "/auth/realms/main/protocol/openid-connect/token";

fn config(base_url: &str) -> KeycloakConfig {
    KeycloakConfig {
        base_url: base_url.to_string(),
        realm: "main".to_string(),
        client_id: "app".to_string(),
        redirect_url: "app://callback".to_string(),
        use_offline_token: false,
    }
}

struct Harness {
    webservice: Arc<HttpWebservice>,
    authority: Arc<KeycloakAuthorization<MemoryCredentialStore>>,
    _download_dir: tempfile::TempDir,
}

fn setup(base_url: &str) -> Harness {
    let download_dir = tempfile::tempdir().unwrap();
    let webservice = Arc::new(HttpWebservice::new(download_dir.path()));
    let authority = Arc::new(KeycloakAuthorization::new(
        config(base_url),
        MemoryCredentialStore::new(),
        webservice.clone(),
    ));
    webservice.set_authorization(authority.clone());
    Harness {
        webservice,
        authority,
        _download_dir: download_dir,
    }
}

async fn seed(harness: &Harness, access: &str, refresh: &str, expires_in: i64) {
    harness
        .authority
        .credential_store()
        .save(Credentials {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
            expires_in,
        })
        .await
        .unwrap();
}

fn token_response(access: &str, refresh: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "access_token": access,
        "refresh_token": refresh,
        "expires_in": 3600
    }))
}

#[tokio::test]
async fn valid_token_is_used_without_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(token_response("unused", "unused"))
        .expect(0)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/data"))
        .and(header("authorization", "Bearer A"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let harness = setup(&server.uri());
    seed(&harness, "A", "R", 3600).await;

    let resource = DataResource::<serde_json::Value>::json(
        format!("{}/api/data", server.uri()),
        Method::Get,
        None,
    );
    let value = harness.webservice.load(resource).await.unwrap().unwrap();
    assert_eq!(value["ok"], true);
}

#[tokio::test]
async fn expired_token_triggers_exactly_one_refresh_before_retry() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=R-old"))
        .and(body_string_contains("client_id=app"))
        .respond_with(token_response("A-new", "R-new"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/data"))
        .and(header("authorization", "Bearer A-new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let harness = setup(&server.uri());
    seed(&harness, "A-old", "R-old", -60).await;

    let before = Utc::now();
    let resource = DataResource::<serde_json::Value>::json(
        format!("{}/api/data", server.uri()),
        Method::Get,
        None,
    );
    harness.webservice.load(resource).await.unwrap().unwrap();

    // the refreshed pair was persisted with a recomputed absolute expiry
    let stored = harness
        .authority
        .credential_store()
        .read()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.access_token.expose(), "A-new");
    assert_eq!(stored.refresh_token.expose(), "R-new");
    assert!(stored.access_token_expires_at >= before + chrono::Duration::seconds(3600));
    assert!(stored.access_token_expires_at <= Utc::now() + chrono::Duration::seconds(3600));
}

#[tokio::test]
async fn cancelling_the_request_cancels_its_refresh() {
    let server = MockServer::start().await;

    // refresh that would take far longer than the test
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(token_response("A-new", "R-new").set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let harness = setup(&server.uri());
    seed(&harness, "A-old", "R-old", -60).await;

    let correlation_id = Uuid::new_v4();
    let resource = DataResource::<serde_json::Value>::json(
        format!("{}/api/data", server.uri()),
        Method::Get,
        None,
    )
    .with_correlation_id(correlation_id);

    let webservice = harness.webservice.clone();
    let request = tokio::spawn(async move { webservice.load(resource).await });

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(harness.webservice.is_task_active(correlation_id));
    // the in-flight refresh is visible under the token endpoint's URL
    let token_url = Url::parse(&format!("{}{}", server.uri(), TOKEN_PATH)).unwrap();
    assert!(harness.webservice.is_task_active_for_url(&token_url));

    harness.webservice.cancel_task(correlation_id);

    // the cancelled refresh surfaces as a normalized auth failure instead of
    // waiting out the mock's delay
    let result = tokio::time::timeout(Duration::from_secs(5), request)
        .await
        .expect("request should finish promptly after cancel")
        .unwrap();
    assert!(matches!(result, Err(Error::Auth(AuthError::LoginNeeded))));
    assert!(!harness.webservice.is_task_active(correlation_id));
}

#[tokio::test]
async fn refresh_failure_is_normalized_to_login_needed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let harness = setup(&server.uri());
    seed(&harness, "A", "R", -60).await;

    let resource = DataResource::<serde_json::Value>::json(
        format!("{}/api/data", server.uri()),
        Method::Get,
        None,
    );
    let result = harness.webservice.load(resource).await;
    assert!(matches!(result, Err(Error::Auth(AuthError::LoginNeeded))));
}

#[tokio::test]
async fn unauthorized_refresh_passes_through_unchanged() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let harness = setup(&server.uri());
    seed(&harness, "A", "R", -60).await;

    let resource = DataResource::<serde_json::Value>::json(
        format!("{}/api/data", server.uri()),
        Method::Get,
        None,
    );
    let result = harness.webservice.load(resource).await;
    assert!(matches!(
        result,
        Err(Error::Network(NetworkError::Unauthorized))
    ));
}

#[tokio::test]
async fn offline_refresh_passes_through_unchanged() {
    // nothing listens here, the transport reports a connect failure
    let harness = setup("http://127.0.0.1:9");
    seed(&harness, "A", "R", -60).await;

    let resource = DataResource::<serde_json::Value>::json(
        "http://127.0.0.1:9/api/data",
        Method::Get,
        None,
    );
    let result = harness.webservice.load(resource).await;
    assert!(matches!(
        result,
        Err(Error::Network(NetworkError::NoInternetConnectivity))
    ));
}

#[tokio::test]
async fn missing_credentials_fail_before_any_network_call() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(token_response("A", "R"))
        .expect(0)
        .mount(&server)
        .await;

    let harness = setup(&server.uri());

    let resource = DataResource::<serde_json::Value>::json(
        format!("{}/api/data", server.uri()),
        Method::Get,
        None,
    );
    let result = harness.webservice.load(resource).await;
    assert!(matches!(
        result,
        Err(Error::Auth(AuthError::MissingCredentials))
    ));
}
