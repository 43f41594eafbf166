//! Integration tests for confidential client grants and code redemption.

mod common;

use common::*;
use credforge_core::{
    AuthorizationCodeClient, AuthorizationCodeRequest, AuthorizationUrlRequest,
    ClientCredentialClient, ClientCredentialRequest, OnBehalfOfClient, OnBehalfOfRequest,
    cache::CredentialFilter,
};
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, method, path},
};

fn app_token(access_token: &str, scope: &str) -> Value {
    json!({
        "token_type": "Bearer",
        "scope": scope,
        "expires_in": 3600,
        "ext_expires_in": 7200,
        "access_token": access_token
    })
}

#[tokio::test]
async fn test_client_credentials_are_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_secret=client-secret-value"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(app_token("app-at", "https://graph.contoso.com/.default")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let base = memory_client(confidential_config(&server));
    let client = ClientCredentialClient::new(base.clone());
    let request = ClientCredentialRequest {
        scopes: vec!["https://graph.contoso.com/.default".to_string()],
        ..Default::default()
    };

    let first = client.acquire_token(&request).await.unwrap();
    assert!(!first.from_cache);
    assert!(first.account.is_none());
    assert!(first.tenant_id.is_empty());

    let second = client.acquire_token(&request).await.unwrap();
    assert!(second.from_cache);
    assert_eq!(second.access_token.expose(), "app-at");

    // App tokens have no account
    let tokens = base
        .cache()
        .get_credentials_filtered_by(&CredentialFilter::default())
        .await
        .unwrap()
        .access_tokens;
    assert_eq!(tokens.len(), 1);
    assert!(tokens.values().all(|t| t.home_account_id.is_empty()));
    assert!(base.cache().get_all_accounts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_skip_cache_requests_a_new_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(app_token("fresh-at", "https://graph.contoso.com/.default")),
        )
        .expect(2)
        .mount(&server)
        .await;

    let client = ClientCredentialClient::new(memory_client(confidential_config(&server)));
    let request = ClientCredentialRequest {
        scopes: vec!["https://graph.contoso.com/.default".to_string()],
        skip_cache: true,
        ..Default::default()
    };
    client.acquire_token(&request).await.unwrap();
    let result = client.acquire_token(&request).await.unwrap();
    assert!(!result.from_cache);
}

#[tokio::test]
async fn test_public_client_cannot_use_client_credentials() {
    let server = MockServer::start().await;
    let client = ClientCredentialClient::new(memory_client(public_config(&server)));
    let request = ClientCredentialRequest {
        scopes: vec!["https://graph.contoso.com/.default".to_string()],
        ..Default::default()
    };
    let err = client.acquire_token(&request).await.unwrap_err();
    assert_eq!(err.error_code(), "missing_client_credential");
}

#[tokio::test]
async fn test_on_behalf_of_is_keyed_by_assertion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("assertion=assertion-one"))
        .and(body_string_contains("requested_token_use=on_behalf_of"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(app_token("obo-one", "https://api.contoso.com/read")),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("assertion=assertion-two"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(app_token("obo-two", "https://api.contoso.com/read")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = OnBehalfOfClient::new(memory_client(confidential_config(&server)));
    let request_for = |assertion: &str| OnBehalfOfRequest {
        scopes: vec!["https://api.contoso.com/read".to_string()],
        obo_assertion: assertion.to_string(),
        ..Default::default()
    };

    let one = client.acquire_token(&request_for("assertion-one")).await.unwrap();
    assert_eq!(one.access_token.expose(), "obo-one");

    let two = client.acquire_token(&request_for("assertion-two")).await.unwrap();
    assert_eq!(two.access_token.expose(), "obo-two");

    let cached = client.acquire_token(&request_for("assertion-one")).await.unwrap();
    assert!(cached.from_cache);
    assert_eq!(cached.access_token.expose(), "obo-one");
}

#[tokio::test]
async fn test_state_mismatch_stops_before_redemption() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let base = memory_client(public_config(&server));
    let client = AuthorizationCodeClient::new(base.clone());

    let auth_url = client
        .get_auth_code_url(&AuthorizationUrlRequest::new(vec!["User.Read".to_string()]))
        .await
        .unwrap();
    assert!(auth_url.url.contains(&format!("state={}", auth_url.state)));

    let err = client
        .handle_fragment_response("#code=authorization-code&state=forged-state", &auth_url.state)
        .unwrap_err();
    assert_eq!(err.error_code(), "state_mismatch");
    assert!(base.cache().get_all_accounts().await.unwrap().is_empty());

    let fragment = format!("#code=authorization-code&state={}", auth_url.state);
    let code = client.handle_fragment_response(&fragment, &auth_url.state).unwrap();
    assert_eq!(code, "authorization-code");
}

#[tokio::test]
async fn test_nonce_mismatch_is_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(user_token_response("nonce-at", 3600, false)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let base = memory_client(public_config(&server));
    let client = AuthorizationCodeClient::new(base.clone());
    let request = AuthorizationCodeRequest {
        scopes: vec!["User.Read".to_string()],
        code: "authorization-code".to_string(),
        nonce: Some("expected-nonce".to_string()),
        ..Default::default()
    };

    let err = client.acquire_token(&request).await.unwrap_err();
    assert_eq!(err.error_code(), "nonce_mismatch");
    assert!(base.cache().get_all_accounts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_matching_nonce_is_accepted() {
    let server = MockServer::start().await;
    let mut body = user_token_response("nonce-at", 3600, false);
    body["id_token"] = json!(id_token(Some("expected-nonce")));
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("code_verifier=verifier"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(&server)
        .await;

    let client = AuthorizationCodeClient::new(memory_client(public_config(&server)));
    let request = AuthorizationCodeRequest {
        scopes: vec!["User.Read".to_string()],
        code: "authorization-code".to_string(),
        code_verifier: Some("verifier".to_string()),
        nonce: Some("expected-nonce".to_string()),
        ..Default::default()
    };

    let result = client.acquire_token(&request).await.unwrap();
    assert_eq!(result.unique_id, UID);
    assert_eq!(result.tenant_id, UTID);
}
