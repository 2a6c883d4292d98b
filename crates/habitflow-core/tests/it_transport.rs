//! Integration tests for bearer token selection and retry-after-refresh

use std::sync::Arc;

use habitflow_core::api::ApiError;
use habitflow_core::auth::{AuthManager, CredentialStore, FileCredentialStore, TokenPair};
use habitflow_core::Config;
use mockito::{Matcher, Server};
use tempfile::TempDir;

fn manager(
    server_url: &str,
    stored: Option<TokenPair>,
    retry: bool,
) -> (AuthManager, Arc<FileCredentialStore>, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(FileCredentialStore::new(dir.path()));
    if let Some(pair) = stored {
        store.save(&pair).expect("seed tokens");
    }
    let config = Config {
        base_url: server_url.to_string(),
        request_timeout_secs: 5,
        retry_on_unauthorized: retry,
        ..Config::default()
    };
    let manager = AuthManager::new(&config, store.clone()).expect("manager");
    (manager, store, dir)
}

fn stored_pair() -> TokenPair {
    TokenPair::new("access-1", "refresh-1")
}

#[tokio::test]
async fn refresh_endpoint_gets_refresh_token() {
    //* Given
    let mut server = Server::new_async().await;
    let refresh_mock = server
        .mock("POST", "/auth/local/refresh")
        .match_header("authorization", "Bearer refresh-1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"accessToken": "access-2", "refreshToken": "refresh-2"}"#)
        .expect(1)
        .create_async()
        .await;
    let (manager, _store, _dir) = manager(&server.url(), Some(stored_pair()), false);

    //* When
    let outcome = manager.refresh().await;

    //* Then
    refresh_mock.assert_async().await;
    assert!(outcome.is_success());
}

#[tokio::test]
async fn other_endpoints_get_access_token() {
    //* Given
    let mut server = Server::new_async().await;
    let habits_mock = server
        .mock("GET", "/habit")
        .match_header("authorization", "Bearer access-1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"id": 1, "name": "Read"}]"#)
        .expect(1)
        .create_async()
        .await;
    let (manager, _store, _dir) = manager(&server.url(), Some(stored_pair()), false);

    //* When
    let habits: serde_json::Value = manager
        .transport()
        .get_json("/habit")
        .await
        .expect("habits");

    //* Then
    habits_mock.assert_async().await;
    assert_eq!(habits[0]["name"], "Read");
}

#[tokio::test]
async fn logout_endpoint_gets_access_token() {
    //* Given
    let mut server = Server::new_async().await;
    let logout_mock = server
        .mock("POST", "/auth/local/logout")
        .match_header("authorization", "Bearer access-1")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let (manager, _store, _dir) = manager(&server.url(), Some(stored_pair()), false);

    //* When
    manager.logout().await.expect("logout");

    //* Then
    logout_mock.assert_async().await;
}

#[tokio::test]
async fn missing_token_sends_unauthenticated() {
    //* Given
    let mut server = Server::new_async().await;
    let profile_mock = server
        .mock("GET", "/profile")
        .match_header("authorization", Matcher::Missing)
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let (manager, _store, _dir) = manager(&server.url(), None, false);

    //* When
    let result: Result<serde_json::Value, ApiError> =
        manager.transport().get_json("/profile").await;

    //* Then
    profile_mock.assert_async().await;
    assert!(matches!(result, Err(ApiError::Unauthorized)));
}

#[tokio::test]
async fn unauthorized_surfaced_without_retry_by_default() {
    //* Given
    let mut server = Server::new_async().await;
    let habits_mock = server
        .mock("GET", "/habit")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let refresh_mock = server
        .mock("POST", "/auth/local/refresh")
        .expect(0)
        .create_async()
        .await;
    let (manager, store, _dir) = manager(&server.url(), Some(stored_pair()), false);
    assert!(!manager.transport().retries_on_unauthorized());

    //* When
    let result: Result<serde_json::Value, ApiError> =
        manager.transport().get_json("/habit").await;

    //* Then
    habits_mock.assert_async().await;
    refresh_mock.assert_async().await;
    assert!(matches!(result, Err(ApiError::Unauthorized)));
    assert_eq!(store.load().unwrap(), Some(stored_pair()));
}

#[tokio::test]
async fn retry_mode_refreshes_and_replays_once() {
    //* Given
    let mut server = Server::new_async().await;
    let stale_mock = server
        .mock("GET", "/habit")
        .match_header("authorization", "Bearer access-1")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let refresh_mock = server
        .mock("POST", "/auth/local/refresh")
        .match_header("authorization", "Bearer refresh-1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"accessToken": "access-2", "refreshToken": "refresh-2"}"#)
        .expect(1)
        .create_async()
        .await;
    let fresh_mock = server
        .mock("GET", "/habit")
        .match_header("authorization", "Bearer access-2")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("[]")
        .expect(1)
        .create_async()
        .await;
    let (manager, store, _dir) = manager(&server.url(), Some(stored_pair()), true);
    assert!(manager.transport().retries_on_unauthorized());

    //* When
    let habits: serde_json::Value = manager
        .transport()
        .get_json("/habit")
        .await
        .expect("habits after refresh");

    //* Then
    stale_mock.assert_async().await;
    refresh_mock.assert_async().await;
    fresh_mock.assert_async().await;
    assert_eq!(habits, serde_json::json!([]));
    assert_eq!(
        store.load().unwrap(),
        Some(TokenPair::new("access-2", "refresh-2"))
    );
}

#[tokio::test]
async fn retry_mode_concurrent_unauthorized_share_one_refresh() {
    //* Given
    const CALLERS: usize = 6;
    let mut server = Server::new_async().await;
    let stale_mock = server
        .mock("GET", "/habit")
        .match_header("authorization", "Bearer access-1")
        .with_status(401)
        .expect_at_least(1)
        .create_async()
        .await;
    let refresh_mock = server
        .mock("POST", "/auth/local/refresh")
        .match_header("authorization", "Bearer refresh-1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"accessToken": "access-2", "refreshToken": "refresh-2"}"#)
        .expect(1)
        .create_async()
        .await;
    let fresh_mock = server
        .mock("GET", "/habit")
        .match_header("authorization", "Bearer access-2")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("[]")
        .expect(CALLERS)
        .create_async()
        .await;
    let (manager, store, _dir) = manager(&server.url(), Some(stored_pair()), true);

    //* When
    let calls = (0..CALLERS).map(|_| manager.transport().get_json::<serde_json::Value>("/habit"));
    let results = futures::future::join_all(calls).await;

    //* Then
    stale_mock.assert_async().await;
    refresh_mock.assert_async().await;
    fresh_mock.assert_async().await;
    for result in results {
        assert_eq!(result.expect("habits after refresh"), serde_json::json!([]));
    }
    assert_eq!(
        store.load().unwrap(),
        Some(TokenPair::new("access-2", "refresh-2"))
    );
}

#[tokio::test]
async fn retry_mode_returns_original_failure_when_refresh_rejected() {
    //* Given
    let mut server = Server::new_async().await;
    let habits_mock = server
        .mock("GET", "/habit")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let refresh_mock = server
        .mock("POST", "/auth/local/refresh")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let (manager, store, _dir) = manager(&server.url(), Some(stored_pair()), true);

    //* When
    let result: Result<serde_json::Value, ApiError> =
        manager.transport().get_json("/habit").await;

    //* Then
    habits_mock.assert_async().await;
    refresh_mock.assert_async().await;
    assert!(matches!(result, Err(ApiError::Unauthorized)));
    assert!(store.load().unwrap().is_none());
}

#[tokio::test]
async fn retry_mode_does_not_retry_refresh_endpoint() {
    //* Given
    let mut server = Server::new_async().await;
    let refresh_mock = server
        .mock("POST", "/auth/local/refresh")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let (manager, _store, _dir) = manager(&server.url(), Some(stored_pair()), true);

    //* When
    let response = manager
        .transport()
        .send(reqwest::Method::POST, "/auth/local/refresh", |b| b)
        .await
        .expect("response");

    //* Then
    refresh_mock.assert_async().await;
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
}
