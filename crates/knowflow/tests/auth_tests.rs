//! Token manager behavior against a mock token endpoint.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use knowflow::core::auth::{OAuthToken, TokenManager};
use knowflow::core::time::epoch_ms;
use knowflow::Error;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn expiring_token(endpoint: &str) -> OAuthToken {
    OAuthToken {
        access_token: "stale".into(),
        refresh_token: Some("rt-1".into()),
        client_id: "cid".into(),
        client_secret: "secret".into(),
        token_endpoint: format!("{endpoint}/oauth/token"),
        scopes: vec!["read".into()],
        // Inside the 20-minute refresh lead.
        expires_at: epoch_ms() + 60_000,
    }
}

#[tokio::test]
async fn expiry_triggers_exactly_one_refresh_for_concurrent_callers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "fresh",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let manager = Arc::new(TokenManager::new());
    manager.insert_token("inst", "user", expiring_token(&server.uri()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager.get_token("inst", "user").await.unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), "fresh");
    }
    // expect(1) on the mock asserts the single-flight refresh.
}

#[tokio::test]
async fn invalid_grant_deactivates_the_principal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "Token has been revoked.",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let manager = TokenManager::new();
    manager.insert_token("inst", "user", expiring_token(&server.uri()));

    let err = manager.get_token("inst", "user").await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)));

    // Further attempts fail fast without calling the endpoint again.
    let err = manager.get_token("inst", "user").await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)));
}

#[tokio::test]
async fn transient_endpoint_failures_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "fresh-after-retry",
            "expires_in": 3600,
        })))
        .mount(&server)
        .await;

    let manager = TokenManager::new().with_retry_policy(
        knowflow::core::retry::RetryPolicy::fixed(3, Duration::from_millis(1)),
    );
    manager.insert_token("inst", "user", expiring_token(&server.uri()));

    let token = manager.get_token("inst", "user").await.unwrap();
    assert_eq!(token, "fresh-after-retry");
}

#[tokio::test]
async fn fresh_tokens_never_touch_the_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let mut token = expiring_token(&server.uri());
    token.expires_at = epoch_ms() + 3_600_000;
    let manager = TokenManager::new();
    manager.insert_token("inst", "user", token);

    assert_eq!(manager.get_token("inst", "user").await.unwrap(), "stale");
}
