//! Shared fixtures for the integration tests.
//!
//! Every client talks to a `wiremock` server through the real
//! `ReqwestNetworkModule`. The authority itself stays on https; its
//! endpoints are supplied as an OpenID configuration document pointing at
//! the mock server.

#![allow(dead_code)]

use std::sync::Arc;

use credforge_core::{
    AuthorizationCodeClient, AuthorizationCodeRequest, BaseClient, CacheStorage,
    ClientConfiguration, CryptoProvider, DefaultCrypto, MemoryStore,
};
use serde_json::{Value, json};
use wiremock::MockServer;

pub const CLIENT_ID: &str = "11111111-2222-3333-4444-555555555555";
pub const AUTHORITY: &str = "https://login.contoso.com/contoso-tenant";
pub const ENVIRONMENT: &str = "login.contoso.com";
pub const TOKEN_PATH: &str = "/contoso-tenant/oauth2/v2.0/token";
pub const DEVICE_CODE_PATH: &str = "/contoso-tenant/oauth2/v2.0/devicecode";
pub const REDIRECT_URI: &str = "http://localhost:8400/callback";

pub const UID: &str = "user-oid";
pub const UTID: &str = "home-tenant";
pub const HOME_ACCOUNT_ID: &str = "user-oid.home-tenant";

pub fn authority_metadata(server: &MockServer) -> String {
    json!({
        "authorization_endpoint": format!("{}/contoso-tenant/oauth2/v2.0/authorize", server.uri()),
        "token_endpoint": format!("{}{}", server.uri(), TOKEN_PATH),
        "device_authorization_endpoint": format!("{}{}", server.uri(), DEVICE_CODE_PATH),
        "end_session_endpoint": format!("{}/contoso-tenant/oauth2/v2.0/logout", server.uri()),
        "issuer": "https://login.contoso.com/contoso-tenant/v2.0"
    })
    .to_string()
}

pub fn public_config(server: &MockServer) -> ClientConfiguration {
    ClientConfiguration::new(CLIENT_ID)
        .with_authority(AUTHORITY)
        .with_redirect_uri(REDIRECT_URI)
        .with_authority_metadata(authority_metadata(server))
}

pub fn confidential_config(server: &MockServer) -> ClientConfiguration {
    public_config(server).with_client_secret("client-secret-value")
}

pub fn base_client(config: ClientConfiguration, storage: Arc<dyn CacheStorage>) -> BaseClient {
    BaseClient::with_storage(config, storage).expect("client context")
}

pub fn memory_client(config: ClientConfiguration) -> BaseClient {
    base_client(config, Arc::new(MemoryStore::new()))
}

pub fn id_token(nonce: Option<&str>) -> String {
    let crypto = DefaultCrypto;
    let mut claims = json!({
        "iss": "https://login.contoso.com/home-tenant/v2.0",
        "oid": UID,
        "sub": "user-sub",
        "tid": UTID,
        "preferred_username": "user@contoso.com",
        "name": "Test User",
        "ver": "2.0"
    });
    if let Some(nonce) = nonce {
        claims["nonce"] = json!(nonce);
    }
    format!(
        "{}.{}.signature",
        crypto.base64_encode(r#"{"alg":"RS256","typ":"JWT"}"#),
        crypto.base64_encode(&claims.to_string())
    )
}

pub fn client_info() -> String {
    DefaultCrypto.base64_encode(&json!({"uid": UID, "utid": UTID}).to_string())
}

/// A full user token response.
pub fn user_token_response(access_token: &str, expires_in: i64, foci: bool) -> Value {
    let mut body = json!({
        "token_type": "Bearer",
        "scope": "User.Read openid profile offline_access",
        "expires_in": expires_in,
        "ext_expires_in": expires_in,
        "access_token": access_token,
        "refresh_token": format!("{}-refresh", access_token),
        "id_token": id_token(None),
        "client_info": client_info()
    });
    if foci {
        body["foci"] = json!("1");
    }
    body
}

pub fn error_response(error: &str, description: &str, suberror: Option<&str>) -> Value {
    let mut body = json!({
        "error": error,
        "error_description": description,
        "error_codes": [50000],
        "timestamp": "2024-05-01 12:00:00Z",
        "trace_id": "trace-id",
        "correlation_id": "correlation-id"
    });
    if let Some(suberror) = suberror {
        body["suberror"] = json!(suberror);
    }
    body
}

/// Redeem a code against the mock token endpoint to seed the cache.
pub async fn sign_in(base: &BaseClient) -> credforge_core::AuthenticationResult {
    let client = AuthorizationCodeClient::new(base.clone());
    let request = AuthorizationCodeRequest {
        scopes: vec!["User.Read".to_string()],
        code: "authorization-code".to_string(),
        code_verifier: Some("verifier".to_string()),
        ..Default::default()
    };
    client.acquire_token(&request).await.expect("sign in")
}
