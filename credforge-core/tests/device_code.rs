//! Integration tests for the device code flow.

mod common;

use std::sync::{Arc, Mutex};

use common::*;
use credforge_core::{DeviceCodeClient, DeviceCodeRequest};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, method, path},
};

fn device_code_body(expires_in: i64, interval: u64) -> Value {
    json!({
        "user_code": "ABCD-EFGH",
        "device_code": "device-code-value",
        "verification_uri": "https://login.contoso.com/device",
        "expires_in": expires_in,
        "interval": interval,
        "message": "To sign in, enter ABCD-EFGH at https://login.contoso.com/device"
    })
}

async fn mount_device_code(server: &MockServer, expires_in: i64, interval: u64) {
    Mock::given(method("POST"))
        .and(path(DEVICE_CODE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_code_body(expires_in, interval)))
        .expect(1)
        .mount(server)
        .await;
}

fn pending() -> ResponseTemplate {
    ResponseTemplate::new(400).set_body_json(json!({
        "error": "authorization_pending",
        "error_description": "user has not completed sign-in"
    }))
}

fn request() -> DeviceCodeRequest {
    DeviceCodeRequest {
        scopes: vec!["User.Read".to_string()],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_polls_until_user_completes_sign_in() {
    let server = MockServer::start().await;
    mount_device_code(&server, 900, 0).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("device_code=device-code-value"))
        .respond_with(pending())
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Adevice_code"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(user_token_response("device-at", 3600, false)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let base = memory_client(public_config(&server));
    let client = DeviceCodeClient::new(base.clone());

    let shown = Arc::new(Mutex::new(None));
    let sink = shown.clone();
    let result = client
        .acquire_token(&request(), move |code| {
            *sink.lock().unwrap() = Some(code.user_code.clone());
        })
        .await
        .unwrap();

    assert_eq!(shown.lock().unwrap().as_deref(), Some("ABCD-EFGH"));
    assert_eq!(result.access_token.expose(), "device-at");
    assert_eq!(result.account.unwrap().home_account_id, HOME_ACCOUNT_ID);
    assert_eq!(base.cache().get_all_accounts().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_expired_device_code_stops_polling() {
    let server = MockServer::start().await;
    mount_device_code(&server, 0, 1).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(pending())
        .mount(&server)
        .await;

    let client = DeviceCodeClient::new(memory_client(public_config(&server)));
    let err = client.acquire_token(&request(), |_| {}).await.unwrap_err();
    assert_eq!(err.error_code(), "device_code_expired");
}

#[tokio::test]
async fn test_caller_timeout_stops_polling() {
    let server = MockServer::start().await;
    mount_device_code(&server, 900, 1).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(pending())
        .mount(&server)
        .await;

    let client = DeviceCodeClient::new(memory_client(public_config(&server)));
    let request = DeviceCodeRequest {
        timeout_seconds: Some(0),
        ..request()
    };
    let err = client.acquire_token(&request, |_| {}).await.unwrap_err();
    assert_eq!(err.error_code(), "user_timeout_reached");
}

#[tokio::test]
async fn test_zero_interval_still_waits_between_polls() {
    let server = MockServer::start().await;
    mount_device_code(&server, 2, 0).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(pending())
        .expect(1..=5)
        .mount(&server)
        .await;

    let client = DeviceCodeClient::new(memory_client(public_config(&server)));
    let err = client.acquire_token(&request(), |_| {}).await.unwrap_err();
    assert_eq!(err.error_code(), "device_code_expired");
}

#[tokio::test]
async fn test_huge_timeout_does_not_wrap() {
    let server = MockServer::start().await;
    mount_device_code(&server, 0, 1).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(pending())
        .mount(&server)
        .await;

    let client = DeviceCodeClient::new(memory_client(public_config(&server)));
    let request = DeviceCodeRequest {
        timeout_seconds: Some(u64::MAX),
        ..request()
    };
    let err = client.acquire_token(&request, |_| {}).await.unwrap_err();
    assert_eq!(err.error_code(), "device_code_expired");
}

#[tokio::test]
async fn test_cancellation_before_first_poll() {
    let server = MockServer::start().await;
    mount_device_code(&server, 900, 5).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(pending())
        .expect(0)
        .mount(&server)
        .await;

    let cancellation = CancellationToken::new();
    let request = DeviceCodeRequest {
        cancellation: cancellation.clone(),
        ..request()
    };

    let client = DeviceCodeClient::new(memory_client(public_config(&server)));
    let err = client
        .acquire_token(&request, move |_| cancellation.cancel())
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "device_code_polling_cancelled");
}

#[tokio::test]
async fn test_cancellation_during_wait() {
    let server = MockServer::start().await;
    mount_device_code(&server, 900, 30).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(pending())
        .expect(1)
        .mount(&server)
        .await;

    let cancellation = CancellationToken::new();
    let request = DeviceCodeRequest {
        cancellation: cancellation.clone(),
        ..request()
    };
    let trigger = cancellation.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let client = DeviceCodeClient::new(memory_client(public_config(&server)));
    let err = client.acquire_token(&request, |_| {}).await.unwrap_err();
    assert_eq!(err.error_code(), "device_code_polling_cancelled");
}

#[tokio::test]
async fn test_device_code_endpoint_error_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DEVICE_CODE_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(error_response(
            "invalid_scope",
            "AADSTS70011: the provided scope is not valid",
            None,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let client = DeviceCodeClient::new(memory_client(public_config(&server)));
    let err = client
        .acquire_token(&request(), |_| panic!("no code was issued"))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "invalid_scope");
}
