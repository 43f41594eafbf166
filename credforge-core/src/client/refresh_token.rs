//! Refresh token grant.
//!
//! Applications that belong to the family of client ids first try the
//! shared family refresh token and fall back to their own one when the
//! server rejects it for this client, or when no family token is cached.

use tracing::{debug, info};

use super::BaseClient;
use crate::error::{AuthError, ClientAuthError};
use crate::model::AccountInfo;
use crate::request::{CommonRefreshRequest, GrantType, RefreshTokenRequest, RequestParameterBuilder};
use crate::response::{AuthenticationResult, ResponseContext, ServerTokenResponse};
use crate::scope::ScopeSet;
use crate::telemetry::{ApiId, ServerTelemetryManager};
use crate::token::now_seconds;

#[derive(Clone)]
pub struct RefreshTokenClient {
    base: BaseClient,
}

/// One refresh request on the wire.
struct RefreshCall<'a> {
    scopes: &'a ScopeSet,
    refresh_token: &'a str,
    redirect_uri: Option<&'a str>,
    claims: Option<&'a str>,
    home_account_id: Option<&'a str>,
    correlation_id: &'a str,
}

impl RefreshTokenClient {
    pub fn new(base: BaseClient) -> Self {
        Self { base }
    }

    /// Exchange a caller-supplied refresh token.
    ///
    /// The account it belongs to is written to the cache.
    pub async fn acquire_token(
        &self,
        request: &RefreshTokenRequest,
    ) -> Result<AuthenticationResult, AuthError> {
        let correlation_id = self.base.correlation_id(request.correlation_id.as_deref());
        let telemetry = self
            .base
            .create_telemetry(ApiId::AcquireTokenByRefreshToken, &correlation_id, false);

        let result = self.redeem_refresh_token(request, &correlation_id, &telemetry).await;
        self.base.record_failure(&telemetry, result).await
    }

    async fn redeem_refresh_token(
        &self,
        request: &RefreshTokenRequest,
        correlation_id: &str,
        telemetry: &ServerTelemetryManager,
    ) -> Result<AuthenticationResult, AuthError> {
        if request.refresh_token.trim().is_empty() {
            return Err(ClientAuthError::TokenRequestCannotBeMade {
                message: "refresh token is empty".to_string(),
            }
            .into());
        }
        let scopes = ScopeSet::new(&request.scopes)?;
        self.base.resolve_authority().await?;

        let call = RefreshCall {
            scopes: &scopes,
            refresh_token: &request.refresh_token,
            redirect_uri: request.redirect_uri.as_deref(),
            claims: request.claims.as_deref(),
            home_account_id: None,
            correlation_id,
        };
        let (response, context) = self.execute_refresh(&call, telemetry).await?;
        self.base
            .response_handler()
            .handle_server_token_response(response, self.base.authority(), &context)
            .await
    }

    /// Refresh for a cached account.
    ///
    /// Returns `None` when the account was removed while the request was in
    /// flight; nothing is written in that case.
    pub async fn acquire_token_by_refresh_token(
        &self,
        request: &CommonRefreshRequest,
    ) -> Result<Option<AuthenticationResult>, AuthError> {
        let correlation_id = self.base.correlation_id(request.correlation_id.as_deref());
        let telemetry = self
            .base
            .create_telemetry(ApiId::AcquireTokenByRefreshToken, &correlation_id, false);

        let result = self
            .refresh_for_account(request, &correlation_id, &telemetry)
            .await;
        self.base.record_failure(&telemetry, result).await
    }

    /// Refresh for a cached account under the caller's telemetry.
    pub(crate) async fn refresh_for_account(
        &self,
        request: &CommonRefreshRequest,
        correlation_id: &str,
        telemetry: &ServerTelemetryManager,
    ) -> Result<Option<AuthenticationResult>, AuthError> {
        let scopes = ScopeSet::new(&request.scopes)?;
        self.base.resolve_authority().await?;

        let is_foci = self
            .base
            .cache()
            .is_app_metadata_foci(&request.account.environment, self.base.client_id())
            .await?;

        if is_foci {
            match self
                .refresh_with_cached_token(request, &scopes, true, correlation_id, telemetry)
                .await
            {
                Ok(result) => return Ok(result),
                Err(e) if e.is_no_tokens_found() || e.is_client_mismatch() => {
                    debug!(
                        error = %e.error_code(),
                        "Family refresh token not usable, falling back to the client refresh token"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        self.refresh_with_cached_token(request, &scopes, false, correlation_id, telemetry)
            .await
    }

    async fn refresh_with_cached_token(
        &self,
        request: &CommonRefreshRequest,
        scopes: &ScopeSet,
        family: bool,
        correlation_id: &str,
        telemetry: &ServerTelemetryManager,
    ) -> Result<Option<AuthenticationResult>, AuthError> {
        let account: &AccountInfo = &request.account;
        let refresh_token = self
            .base
            .cache()
            .read_refresh_token_from_cache(self.base.client_id(), account, family)
            .await?
            .ok_or(ClientAuthError::NoTokensFound)?;

        debug!(family = family, "Refreshing with cached refresh token");

        let call = RefreshCall {
            scopes,
            refresh_token: refresh_token.secret.expose(),
            redirect_uri: None,
            claims: request.claims.as_deref(),
            home_account_id: Some(&account.home_account_id),
            correlation_id,
        };
        let (response, context) = self.execute_refresh(&call, telemetry).await?;
        let result = self
            .base
            .response_handler()
            .handle_refresh_token_response(response, self.base.authority(), &context)
            .await?;

        if result.is_some() {
            info!(correlation_id = %correlation_id, family = family, "Refreshed access token");
        }
        Ok(result)
    }

    async fn execute_refresh(
        &self,
        call: &RefreshCall<'_>,
        telemetry: &ServerTelemetryManager,
    ) -> Result<(ServerTokenResponse, ResponseContext), AuthError> {
        let config = self.base.config();

        let mut parameters = RequestParameterBuilder::new();
        parameters.add_client_id(self.base.client_id());
        parameters.add_scopes(call.scopes, true);
        if let Some(redirect_uri) = call.redirect_uri {
            parameters.add_redirect_uri(redirect_uri)?;
        }
        parameters.add_grant_type(GrantType::RefreshToken);
        parameters.add_client_info();
        parameters.add_library_info(&config.library);
        parameters.add_correlation_id(call.correlation_id);
        parameters.add_refresh_token(call.refresh_token);
        parameters.add_claims(call.claims, &config.auth.client_capabilities)?;
        self.base.add_client_credentials(&mut parameters);

        let endpoint = self.base.authority().token_endpoint()?;
        let thumbprint = self.base.thumbprint(call.scopes, call.home_account_id);
        let request_timestamp = now_seconds();

        let response = self
            .base
            .execute_post_to_token_endpoint(
                &endpoint,
                parameters.create_query_string(),
                &thumbprint,
                telemetry,
            )
            .await?;

        let context = ResponseContext {
            scopes: call.scopes.clone(),
            correlation_id: call.correlation_id.to_string(),
            nonce: None,
            state: None,
            obo_assertion: None,
            request_timestamp,
        };
        Ok((ServerTokenResponse::from_value(response.body)?, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfiguration;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn client() -> RefreshTokenClient {
        let config = ClientConfiguration::new("app")
            .with_authority("https://login.contoso.com/tenant")
            .with_authority_metadata(
                r#"{"authorization_endpoint": "https://login.contoso.com/tenant/oauth2/v2.0/authorize",
                    "token_endpoint": "https://login.contoso.com/tenant/oauth2/v2.0/token",
                    "issuer": "https://login.contoso.com/tenant/v2.0"}"#,
            );
        RefreshTokenClient::new(BaseClient::with_storage(config, Arc::new(MemoryStore::new())).unwrap())
    }

    fn account() -> AccountInfo {
        AccountInfo {
            home_account_id: "uid.utid".to_string(),
            environment: "login.contoso.com".to_string(),
            tenant_id: "utid".to_string(),
            username: "user@contoso.com".to_string(),
            local_account_id: "uid".to_string(),
            name: None,
            id_token_claims: None,
        }
    }

    #[tokio::test]
    async fn test_no_cached_refresh_token() {
        let request = CommonRefreshRequest {
            scopes: vec!["User.Read".to_string()],
            account: account(),
            claims: None,
            correlation_id: None,
        };
        let err = client()
            .acquire_token_by_refresh_token(&request)
            .await
            .unwrap_err();
        assert!(err.is_no_tokens_found());
    }

    #[tokio::test]
    async fn test_empty_refresh_token_rejected() {
        let request = RefreshTokenRequest {
            scopes: vec!["User.Read".to_string()],
            ..Default::default()
        };
        let err = client().acquire_token(&request).await.unwrap_err();
        assert_eq!(err.error_code(), "token_request_cannot_be_made");
    }
}
