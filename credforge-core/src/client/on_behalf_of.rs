//! On-behalf-of grant.
//!
//! A middle-tier service exchanges the user assertion it received for a
//! token to a downstream API. Cached entities are keyed on the assertion so
//! one user's token is never served for another user's assertion.

use tracing::{debug, info};

use super::BaseClient;
use crate::cache::{AccountFilter, CacheRecord, CredentialFilter};
use crate::error::{AuthError, ClientAuthError};
use crate::model::CredentialType;
use crate::request::{GrantType, OnBehalfOfRequest, RequestParameterBuilder};
use crate::response::{AuthenticationResult, ResponseContext, ResponseHandler, ServerTokenResponse};
use crate::scope::ScopeSet;
use crate::telemetry::{ApiId, ServerTelemetryManager};
use crate::token::{AuthToken, now_seconds};

const REQUESTED_TOKEN_USE_OBO: &str = "on_behalf_of";

#[derive(Clone)]
pub struct OnBehalfOfClient {
    base: BaseClient,
}

impl OnBehalfOfClient {
    pub fn new(base: BaseClient) -> Self {
        Self { base }
    }

    pub async fn acquire_token(
        &self,
        request: &OnBehalfOfRequest,
    ) -> Result<AuthenticationResult, AuthError> {
        let correlation_id = self.base.correlation_id(request.correlation_id.as_deref());
        let telemetry = self.base.create_telemetry(
            ApiId::AcquireTokenOnBehalfOf,
            &correlation_id,
            request.skip_cache,
        );

        let result = self.acquire(request, &correlation_id, &telemetry).await;
        self.base.record_failure(&telemetry, result).await
    }

    async fn acquire(
        &self,
        request: &OnBehalfOfRequest,
        correlation_id: &str,
        telemetry: &ServerTelemetryManager,
    ) -> Result<AuthenticationResult, AuthError> {
        self.base.require_confidential()?;
        if request.obo_assertion.trim().is_empty() {
            return Err(ClientAuthError::TokenRequestCannotBeMade {
                message: "on-behalf-of assertion is empty".to_string(),
            }
            .into());
        }
        let scopes = ScopeSet::new(&request.scopes)?;
        self.base.resolve_authority().await?;

        let context = ResponseContext {
            scopes,
            correlation_id: correlation_id.to_string(),
            nonce: None,
            state: None,
            obo_assertion: Some(request.obo_assertion.clone()),
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
        let environment = authority.preferred_cache()?;
        let cache = self.base.cache();

        let access_filter = CredentialFilter {
            environment: Some(environment.clone()),
            credential_type: Some(CredentialType::AccessToken),
            client_id: Some(self.base.client_id().to_string()),
            realm: Some(authority.tenant().to_string()),
            target: Some(context.scopes.clone()),
            obo_assertion: context.obo_assertion.clone(),
            ..Default::default()
        };
        let Some(access_token) = cache.read_access_token_by_filter(&access_filter).await? else {
            return Ok(None);
        };
        let offset = self.base.config().system.token_renewal_offset_seconds;
        if access_token.is_expired(offset, now_seconds()) {
            debug!("Cached on-behalf-of token is expired");
            return Ok(None);
        }

        let id_filter = CredentialFilter {
            environment: Some(environment.clone()),
            credential_type: Some(CredentialType::IdToken),
            client_id: Some(self.base.client_id().to_string()),
            obo_assertion: context.obo_assertion.clone(),
            ..Default::default()
        };
        let mut id_tokens: Vec<_> = cache
            .get_credentials_filtered_by(&id_filter)
            .await?
            .id_tokens
            .into_iter()
            .collect();
        id_tokens.sort_by(|a, b| a.0.cmp(&b.0));
        let id_token_entity = id_tokens.into_iter().next().map(|(_, token)| token);

        let id_token = id_token_entity
            .as_ref()
            .map(|token| AuthToken::parse(token.secret.expose(), self.base.crypto().as_ref()))
            .transpose()?;

        let account = if access_token.home_account_id.is_empty() {
            None
        } else {
            let filter = AccountFilter {
                home_account_id: Some(access_token.home_account_id.clone()),
                environment: Some(environment),
                realm: id_token_entity.as_ref().map(|t| t.realm.clone()),
            };
            let mut accounts: Vec<_> = cache.get_accounts_filtered_by(&filter).await?.into_iter().collect();
            accounts.sort_by(|a, b| a.0.cmp(&b.0));
            accounts.into_iter().next().map(|(_, account)| account)
        };

        self.base.record_cache_hit(telemetry).await;
        let record = CacheRecord {
            account,
            id_token: id_token_entity,
            access_token: Some(access_token),
            ..Default::default()
        };
        Ok(Some(ResponseHandler::generate_authentication_result(
            &record,
            id_token.as_ref(),
            true,
            &authority.canonical_authority(),
            context,
        )))
    }

    async fn execute_token_request(
        &self,
        request: &OnBehalfOfRequest,
        context: ResponseContext,
        telemetry: &ServerTelemetryManager,
    ) -> Result<AuthenticationResult, AuthError> {
        let config = self.base.config();

        let mut parameters = RequestParameterBuilder::new();
        parameters.add_client_id(self.base.client_id());
        parameters.add_scopes(&context.scopes, true);
        parameters.add_grant_type(GrantType::JwtBearer);
        parameters.add_client_info();
        parameters.add_library_info(&config.library);
        parameters.add_correlation_id(&context.correlation_id);
        parameters.add_requested_token_use(REQUESTED_TOKEN_USE_OBO);
        parameters.add_obo_assertion(&request.obo_assertion);
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

        info!(correlation_id = %context.correlation_id, "Acquired on-behalf-of token");
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
    async fn test_empty_assertion_rejected() {
        let config = ClientConfiguration::new("app").with_client_secret("secret");
        let client =
            OnBehalfOfClient::new(BaseClient::with_storage(config, Arc::new(MemoryStore::new())).unwrap());
        let request = OnBehalfOfRequest {
            scopes: vec!["api://downstream/.default".to_string()],
            ..Default::default()
        };
        let err = client.acquire_token(&request).await.unwrap_err();
        assert_eq!(err.error_code(), "token_request_cannot_be_made");
    }
}
