//! Client credentials grant for app-only tokens.

use tracing::{debug, info};

use super::BaseClient;
use crate::cache::{CacheRecord, CredentialFilter};
use crate::error::AuthError;
use crate::model::CredentialType;
use crate::request::{ClientCredentialRequest, GrantType, RequestParameterBuilder};
use crate::response::{AuthenticationResult, ResponseContext, ResponseHandler, ServerTokenResponse};
use crate::scope::ScopeSet;
use crate::telemetry::{ApiId, ServerTelemetryManager};
use crate::token::now_seconds;

#[derive(Clone)]
pub struct ClientCredentialClient {
    base: BaseClient,
}

impl ClientCredentialClient {
    pub fn new(base: BaseClient) -> Self {
        Self { base }
    }

    /// Return a cached app token, or request a new one.
    pub async fn acquire_token(
        &self,
        request: &ClientCredentialRequest,
    ) -> Result<AuthenticationResult, AuthError> {
        let correlation_id = self.base.correlation_id(request.correlation_id.as_deref());
        let telemetry = self.base.create_telemetry(
            ApiId::AcquireTokenByClientCredential,
            &correlation_id,
            request.skip_cache,
        );

        let result = self.acquire(request, &correlation_id, &telemetry).await;
        self.base.record_failure(&telemetry, result).await
    }

    async fn acquire(
        &self,
        request: &ClientCredentialRequest,
        correlation_id: &str,
        telemetry: &ServerTelemetryManager,
    ) -> Result<AuthenticationResult, AuthError> {
        self.base.require_confidential()?;
        let scopes = ScopeSet::new(&request.scopes)?;
        self.base.resolve_authority().await?;

        let context = ResponseContext {
            scopes,
            correlation_id: correlation_id.to_string(),
            nonce: None,
            state: None,
            obo_assertion: None,
            request_timestamp: now_seconds(),
        };

        if !request.skip_cache && request.claims.is_none() {
            if let Some(result) = self.cached_result(&context, telemetry).await? {
                return Ok(result);
            }
        }

        self.execute_token_request(request, context, telemetry).await
    }

    async fn cached_result(
        &self,
        context: &ResponseContext,
        telemetry: &ServerTelemetryManager,
    ) -> Result<Option<AuthenticationResult>, AuthError> {
        let authority = self.base.authority();
        let filter = CredentialFilter {
            home_account_id: Some(String::new()),
            environment: Some(authority.preferred_cache()?),
            credential_type: Some(CredentialType::AccessToken),
            client_id: Some(self.base.client_id().to_string()),
            realm: Some(authority.tenant().to_string()),
            target: Some(context.scopes.clone()),
            ..Default::default()
        };

        let Some(access_token) = self.base.cache().read_access_token_by_filter(&filter).await?
        else {
            return Ok(None);
        };
        let offset = self.base.config().system.token_renewal_offset_seconds;
        if access_token.is_expired(offset, now_seconds()) {
            debug!("Cached app token is expired");
            return Ok(None);
        }

        self.base.record_cache_hit(telemetry).await;
        let record = CacheRecord {
            access_token: Some(access_token),
            ..Default::default()
        };
        Ok(Some(ResponseHandler::generate_authentication_result(
            &record,
            None,
            true,
            &authority.canonical_authority(),
            context,
        )))
    }

    async fn execute_token_request(
        &self,
        request: &ClientCredentialRequest,
        context: ResponseContext,
        telemetry: &ServerTelemetryManager,
    ) -> Result<AuthenticationResult, AuthError> {
        let config = self.base.config();

        let mut parameters = RequestParameterBuilder::new();
        parameters.add_client_id(self.base.client_id());
        parameters.add_scopes(&context.scopes, false);
        parameters.add_grant_type(GrantType::ClientCredentials);
        parameters.add_library_info(&config.library);
        parameters.add_correlation_id(&context.correlation_id);
        parameters.add_claims(request.claims.as_deref(), &config.auth.client_capabilities)?;
        self.base.add_client_credentials(&mut parameters);

        let authority = self.base.authority();
        let endpoint = authority.token_endpoint()?;
        let thumbprint = self.base.thumbprint(&context.scopes, None);

        let response = self
            .base
            .execute_post_to_token_endpoint(
                &endpoint,
                parameters.create_query_string(),
                &thumbprint,
                telemetry,
            )
            .await?;

        let result = self
            .base
            .response_handler()
            .handle_server_token_response(
                ServerTokenResponse::from_value(response.body)?,
                authority,
                &context,
            )
            .await?;

        info!(correlation_id = %context.correlation_id, "Acquired app token");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfiguration;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_requires_client_credential() {
        let config = ClientConfiguration::new("app");
        let client =
            ClientCredentialClient::new(BaseClient::with_storage(config, Arc::new(MemoryStore::new())).unwrap());
        let request = ClientCredentialRequest {
            scopes: vec!["https://graph.microsoft.com/.default".to_string()],
            ..Default::default()
        };
        let err = client.acquire_token(&request).await.unwrap_err();
        assert_eq!(err.error_code(), "missing_client_credential");
    }
}
