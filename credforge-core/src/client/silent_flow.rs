//! Silent token acquisition for a cached account.
//!
//! [`SilentFlowClient::acquire_cached_token`] only reads the cache and never
//! touches the network. When the cached token cannot be used it fails with
//! the refresh-required signal, which [`SilentFlowClient::acquire_token`]
//! turns into a refresh token request.

use tracing::debug;

use super::{BaseClient, RefreshTokenClient};
use crate::cache::AccessTokenEntity;
use crate::error::{AuthError, ClientAuthError};
use crate::request::{CommonRefreshRequest, SilentFlowRequest};
use crate::response::{AuthenticationResult, ResponseContext, ResponseHandler};
use crate::scope::ScopeSet;
use crate::telemetry::{ApiId, ServerTelemetryManager};
use crate::token::{AuthToken, now_seconds};

#[derive(Clone)]
pub struct SilentFlowClient {
    base: BaseClient,
}

impl SilentFlowClient {
    pub fn new(base: BaseClient) -> Self {
        Self { base }
    }

    /// Return a cached token, refreshing it when it cannot be used.
    pub async fn acquire_token(
        &self,
        request: &SilentFlowRequest,
    ) -> Result<AuthenticationResult, AuthError> {
        let correlation_id = self.base.correlation_id(request.correlation_id.as_deref());
        let telemetry = self.base.create_telemetry(
            ApiId::AcquireTokenSilent,
            &correlation_id,
            request.force_refresh,
        );

        match self.read_cached_token(request, &correlation_id, &telemetry).await {
            Ok(result) => Ok(result),
            Err(e) if e.is_refresh_required() => {
                debug!("Cached token cannot be used, refreshing");
                let result = self.refresh(request, &correlation_id, &telemetry).await;
                self.base.record_failure(&telemetry, result).await
            }
            Err(e) => self.base.record_failure(&telemetry, Err(e)).await,
        }
    }

    /// Return the cached token for the request.
    ///
    /// Fails with [`ClientAuthError::TokenRefreshRequired`] when a refresh
    /// is forced, claims are requested, or no usable access token is cached.
    pub async fn acquire_cached_token(
        &self,
        request: &SilentFlowRequest,
    ) -> Result<AuthenticationResult, AuthError> {
        let correlation_id = self.base.correlation_id(request.correlation_id.as_deref());
        let telemetry = self.base.create_telemetry(
            ApiId::AcquireTokenSilent,
            &correlation_id,
            request.force_refresh,
        );
        self.read_cached_token(request, &correlation_id, &telemetry)
            .await
    }

    /// Returns true when the cached access token must not be served.
    pub fn is_refresh_required(
        force_refresh: bool,
        claims: Option<&str>,
        access_token: Option<&AccessTokenEntity>,
        offset_seconds: i64,
        now: i64,
    ) -> bool {
        if force_refresh || claims.is_some_and(|c| !c.trim().is_empty()) {
            return true;
        }
        match access_token {
            None => true,
            Some(token) => token.is_expired(offset_seconds, now),
        }
    }

    async fn read_cached_token(
        &self,
        request: &SilentFlowRequest,
        correlation_id: &str,
        telemetry: &ServerTelemetryManager,
    ) -> Result<AuthenticationResult, AuthError> {
        let scopes = ScopeSet::new(&request.scopes)?;

        if request.force_refresh || request.claims.as_deref().is_some_and(|c| !c.trim().is_empty()) {
            return Err(ClientAuthError::TokenRefreshRequired.into());
        }

        let account = &request.account;
        let record = self
            .base
            .cache()
            .read_cache_record(account, self.base.client_id(), &scopes, &account.environment)
            .await?;

        let offset = self.base.config().system.token_renewal_offset_seconds;
        if Self::is_refresh_required(
            request.force_refresh,
            request.claims.as_deref(),
            record.access_token.as_ref(),
            offset,
            now_seconds(),
        ) {
            return Err(ClientAuthError::TokenRefreshRequired.into());
        }

        self.base.record_cache_hit(telemetry).await;

        let id_token = record
            .id_token
            .as_ref()
            .map(|token| AuthToken::parse(token.secret.expose(), self.base.crypto().as_ref()))
            .transpose()?;

        let context = ResponseContext {
            scopes,
            correlation_id: correlation_id.to_string(),
            nonce: None,
            state: None,
            obo_assertion: None,
            request_timestamp: now_seconds(),
        };

        debug!(correlation_id = %correlation_id, "Serving access token from cache");
        Ok(ResponseHandler::generate_authentication_result(
            &record,
            id_token.as_ref(),
            true,
            &self.base.authority().canonical_authority(),
            &context,
        ))
    }

    async fn refresh(
        &self,
        request: &SilentFlowRequest,
        correlation_id: &str,
        telemetry: &ServerTelemetryManager,
    ) -> Result<AuthenticationResult, AuthError> {
        let refresh_request = CommonRefreshRequest::from(request.clone());
        let refresher = RefreshTokenClient::new(self.base.clone());

        refresher
            .refresh_for_account(&refresh_request, correlation_id, telemetry)
            .await?
            .ok_or_else(|| {
                ClientAuthError::NoAccountFound {
                    key: request.account.cache_key(),
                }
                .into()
            })
    }
}
