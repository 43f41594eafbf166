//! Device Authorization Grant (RFC 8628).
//!
//! # Flow Overview
//!
//! 1. Request device and user codes from the device code endpoint
//! 2. Hand the user code and verification URI to the caller's callback
//! 3. Poll the token endpoint at the server's interval
//! 4. Stop on success, code expiry, caller timeout or cancellation
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example(client: credforge_core::DeviceCodeClient) -> Result<(), credforge_core::AuthError> {
//! use credforge_core::DeviceCodeRequest;
//!
//! let request = DeviceCodeRequest {
//!     scopes: vec!["User.Read".to_string()],
//!     ..Default::default()
//! };
//! let result = client
//!     .acquire_token(&request, |code| println!("{}", code.message))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

use super::BaseClient;
use crate::error::{AuthError, ClientAuthError};
use crate::network::RequestOptions;
use crate::request::{DeviceCodeRequest, GrantType, RequestParameterBuilder};
use crate::response::{AuthenticationResult, ResponseContext, ResponseHandler, ServerTokenResponse};
use crate::scope::ScopeSet;
use crate::telemetry::{ApiId, ServerTelemetryManager};
use crate::token::now_seconds;

const AUTHORIZATION_PENDING: &str = "authorization_pending";
const SLOW_DOWN: &str = "slow_down";

/// Seconds added to the polling interval on `slow_down`.
const SLOW_DOWN_INCREMENT_SECONDS: u64 = 5;

const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 5;

/// Shortest wait between polls, whatever the server asks for.
const MIN_POLL_INTERVAL_SECONDS: u64 = 1;

/// Codes returned by the device code endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCodeResponse {
    pub user_code: String,
    /// Keep this secret; it is redeemed for tokens.
    #[serde(skip_serializing)]
    pub device_code: String,
    #[serde(alias = "verification_url")]
    pub verification_uri: String,
    /// Seconds until the device code expires.
    pub expires_in: i64,
    /// Minimum seconds between polls.
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Instructions to show the user.
    #[serde(default)]
    pub message: String,
}

fn default_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECONDS
}

#[derive(Clone)]
pub struct DeviceCodeClient {
    base: BaseClient,
}

impl DeviceCodeClient {
    pub fn new(base: BaseClient) -> Self {
        Self { base }
    }

    /// Fetch a device code, pass it to `callback`, then poll until the user
    /// completes sign-in.
    pub async fn acquire_token<F>(
        &self,
        request: &DeviceCodeRequest,
        callback: F,
    ) -> Result<AuthenticationResult, AuthError>
    where
        F: FnOnce(&DeviceCodeResponse) + Send,
    {
        let correlation_id = self.base.correlation_id(request.correlation_id.as_deref());
        let telemetry = self
            .base
            .create_telemetry(ApiId::AcquireTokenByDeviceCode, &correlation_id, false);

        let result = self
            .acquire(request, callback, &correlation_id, &telemetry)
            .await;
        self.base.record_failure(&telemetry, result).await
    }

    async fn acquire<F>(
        &self,
        request: &DeviceCodeRequest,
        callback: F,
        correlation_id: &str,
        telemetry: &ServerTelemetryManager,
    ) -> Result<AuthenticationResult, AuthError>
    where
        F: FnOnce(&DeviceCodeResponse) + Send,
    {
        let scopes = ScopeSet::new(&request.scopes)?;
        self.base.resolve_authority().await?;

        let device_code = self
            .get_device_code(&scopes, request, correlation_id, telemetry)
            .await?;
        let issued_at = now_seconds();

        info!(
            verification_uri = %device_code.verification_uri,
            expires_in = device_code.expires_in,
            "Device code issued"
        );
        callback(&device_code);

        self.poll_for_token(request, &device_code, scopes, issued_at, correlation_id, telemetry)
            .await
    }

    async fn get_device_code(
        &self,
        scopes: &ScopeSet,
        request: &DeviceCodeRequest,
        correlation_id: &str,
        telemetry: &ServerTelemetryManager,
    ) -> Result<DeviceCodeResponse, AuthError> {
        let config = self.base.config();

        let mut parameters = RequestParameterBuilder::new();
        parameters.add_client_id(self.base.client_id());
        parameters.add_scopes(scopes, true);
        parameters.add_library_info(&config.library);
        parameters.add_correlation_id(correlation_id);
        parameters.add_claims(request.claims.as_deref(), &config.auth.client_capabilities)?;

        let endpoint = self.base.authority().device_code_endpoint()?;
        let options = RequestOptions {
            headers: self.base.create_token_request_headers(telemetry).await?,
            body: Some(parameters.create_query_string()),
        };
        let response = self
            .base
            .network()
            .network()
            .send_post_request(&endpoint, &options)
            .await?;

        let body = response.body;
        let server_response = ServerTokenResponse::from_value(body.clone())?;
        ResponseHandler::validate_token_response(&server_response)?;

        serde_json::from_value(body).map_err(|e| {
            ClientAuthError::TokenParsing {
                message: format!("device code response is not valid: {}", e),
            }
            .into()
        })
    }

    async fn poll_for_token(
        &self,
        request: &DeviceCodeRequest,
        device_code: &DeviceCodeResponse,
        scopes: ScopeSet,
        issued_at: i64,
        correlation_id: &str,
        telemetry: &ServerTelemetryManager,
    ) -> Result<AuthenticationResult, AuthError> {
        let config = self.base.config();
        let authority = self.base.authority();
        let endpoint = authority.token_endpoint()?;
        let thumbprint = self.base.thumbprint(&scopes, None);

        let mut parameters = RequestParameterBuilder::new();
        parameters.add_client_id(self.base.client_id());
        parameters.add_scopes(&scopes, true);
        parameters.add_grant_type(GrantType::DeviceCode);
        parameters.add_device_code(&device_code.device_code);
        parameters.add_client_info();
        parameters.add_library_info(&config.library);
        parameters.add_correlation_id(correlation_id);
        parameters.add_claims(request.claims.as_deref(), &config.auth.client_capabilities)?;
        let body = parameters.create_query_string();

        let deadline = issued_at.saturating_add(device_code.expires_in);
        let user_deadline = request
            .timeout_seconds
            .map(|timeout| issued_at.saturating_add(i64::try_from(timeout).unwrap_or(i64::MAX)));
        let mut interval = device_code.interval.max(MIN_POLL_INTERVAL_SECONDS);

        loop {
            if request.cancellation.is_cancelled() {
                return Err(ClientAuthError::DeviceCodePollingCancelled.into());
            }
            let now = now_seconds();
            if user_deadline.is_some_and(|limit| now > limit) {
                return Err(ClientAuthError::UserTimeoutReached.into());
            }
            if now > deadline {
                return Err(ClientAuthError::DeviceCodeExpired.into());
            }

            let request_timestamp = now_seconds();
            let response = self
                .base
                .execute_post_to_token_endpoint(&endpoint, body.clone(), &thumbprint, telemetry)
                .await?;
            let server_response = ServerTokenResponse::from_value(response.body)?;

            match server_response.error.as_deref() {
                Some(AUTHORIZATION_PENDING) => {
                    debug!("Authorization pending, polling again");
                }
                Some(SLOW_DOWN) => {
                    interval = next_interval(interval, SLOW_DOWN);
                    debug!(interval = interval, "Server asked to slow down");
                }
                _ => {
                    let context = ResponseContext {
                        scopes,
                        correlation_id: correlation_id.to_string(),
                        nonce: None,
                        state: None,
                        obo_assertion: None,
                        request_timestamp,
                    };
                    let result = self
                        .base
                        .response_handler()
                        .handle_server_token_response(server_response, authority, &context)
                        .await?;
                    info!(correlation_id = %correlation_id, "Device code sign-in completed");
                    return Ok(result);
                }
            }

            tokio::select! {
                _ = request.cancellation.cancelled() => {
                    return Err(ClientAuthError::DeviceCodePollingCancelled.into());
                }
                _ = sleep(Duration::from_secs(interval)) => {}
            }
        }
    }
}

/// Polling interval after a pending response carrying `error`.
fn next_interval(current: u64, error: &str) -> u64 {
    if error == SLOW_DOWN {
        current + SLOW_DOWN_INCREMENT_SECONDS
    } else {
        current
    }
}
