//! Authorization code grant with PKCE.
//!
//! The client builds the `/authorize` URL, validates what the server sends
//! back to the redirect URI, and redeems the code at the token endpoint. It
//! also builds the logout URL.

use tracing::{debug, info};

use super::BaseClient;
use crate::error::{AuthError, ClientAuthError, ConfigurationError};
use crate::request::{
    AuthorizationCodeRequest, AuthorizationUrlRequest, EndSessionRequest, GrantType,
    RequestParameterBuilder,
};
use crate::response::{
    AuthenticationResult, ResponseContext, ResponseHandler, ServerAuthorizationCodeResponse,
    ServerTokenResponse,
};
use crate::scope::ScopeSet;
use crate::telemetry::{ApiId, ServerTelemetryManager};
use crate::token::now_seconds;

const STATE_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 32;

/// An `/authorize` URL together with the values to cache until the
/// redirect comes back.
#[derive(Debug, Clone)]
pub struct AuthorizationUrl {
    pub url: String,
    pub state: String,
    pub nonce: String,
}

#[derive(Clone)]
pub struct AuthorizationCodeClient {
    base: BaseClient,
}

impl AuthorizationCodeClient {
    pub fn new(base: BaseClient) -> Self {
        Self { base }
    }

    /// Build the `/authorize` redirect URL. No network call is made once
    /// the authority is resolved.
    pub async fn get_auth_code_url(
        &self,
        request: &AuthorizationUrlRequest,
    ) -> Result<AuthorizationUrl, AuthError> {
        let scopes = ScopeSet::new(&request.scopes)?;
        self.base.resolve_authority().await?;

        let config = self.base.config();
        let correlation_id = self.base.correlation_id(request.correlation_id.as_deref());
        let state = request
            .state
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.base.crypto().generate_random_string(STATE_LENGTH));
        let nonce = request
            .nonce
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.base.crypto().generate_random_string(NONCE_LENGTH));

        let mut parameters = RequestParameterBuilder::new();
        parameters.add_client_id(self.base.client_id());
        parameters.add_scopes(&scopes, true);
        parameters.add_redirect_uri(self.redirect_uri(request.redirect_uri.as_deref())?)?;
        parameters.add_correlation_id(&correlation_id);
        parameters.add_response_mode(request.response_mode);
        parameters.add_response_type_code();
        parameters.add_library_info(&config.library);
        parameters.add_client_info();
        parameters.add_code_challenge_params(
            request.code_challenge.as_deref(),
            request.code_challenge_method.as_deref(),
        )?;

        if let Some(prompt) = request.prompt.as_deref() {
            parameters.add_prompt(prompt)?;
        }
        if let Some(domain_hint) = request.domain_hint.as_deref() {
            parameters.add_domain_hint(domain_hint);
        }
        if request.prompt.as_deref() == Some("none") {
            if let Some(sid) = request.sid.as_deref() {
                parameters.add_sid(sid);
            }
        }
        if let Some(login_hint) = request.login_hint.as_deref() {
            parameters.add_login_hint(login_hint);
        }

        parameters.add_state(&state);
        parameters.add_nonce(&nonce);
        parameters.add_claims(request.claims.as_deref(), &config.auth.client_capabilities)?;
        parameters.add_extra_query_parameters(&request.extra_query_parameters);

        let endpoint = self.base.authority().authorization_endpoint()?;
        let separator = if endpoint.contains('?') { '&' } else { '?' };
        let url = format!("{}{}{}", endpoint, separator, parameters.create_query_string());

        debug!(correlation_id = %correlation_id, "Built authorization URL");
        Ok(AuthorizationUrl { url, state, nonce })
    }

    /// Validate the fragment or query the server redirected to and return
    /// the authorization code.
    pub fn handle_fragment_response(
        &self,
        response: &str,
        cached_state: &str,
    ) -> Result<String, AuthError> {
        let parsed = ServerAuthorizationCodeResponse::from_query(response);
        ResponseHandler::validate_server_authorization_code_response(&parsed, Some(cached_state))
    }

    /// Redeem an authorization code.
    pub async fn acquire_token(
        &self,
        request: &AuthorizationCodeRequest,
    ) -> Result<AuthenticationResult, AuthError> {
        let correlation_id = self.base.correlation_id(request.correlation_id.as_deref());
        let telemetry = self
            .base
            .create_telemetry(ApiId::AcquireTokenByCode, &correlation_id, false);

        let result = self.redeem_code(request, &correlation_id, &telemetry).await;
        self.base.record_failure(&telemetry, result).await
    }

    async fn redeem_code(
        &self,
        request: &AuthorizationCodeRequest,
        correlation_id: &str,
        telemetry: &ServerTelemetryManager,
    ) -> Result<AuthenticationResult, AuthError> {
        if request.code.trim().is_empty() {
            return Err(ClientAuthError::TokenRequestCannotBeMade {
                message: "authorization code is empty".to_string(),
            }
            .into());
        }
        let scopes = ScopeSet::new(&request.scopes)?;
        let redirect_uri = self.redirect_uri(request.redirect_uri.as_deref())?;
        self.base.resolve_authority().await?;

        let mut parameters = RequestParameterBuilder::new();
        parameters.add_client_id(self.base.client_id());
        parameters.add_redirect_uri(redirect_uri)?;
        parameters.add_scopes(&scopes, true);
        parameters.add_authorization_code(&request.code);
        parameters.add_library_info(&self.base.config().library);
        parameters.add_correlation_id(correlation_id);
        if let Some(verifier) = request.code_verifier.as_deref() {
            parameters.add_code_verifier(verifier);
        }
        parameters.add_grant_type(GrantType::AuthorizationCode);
        parameters.add_client_info();
        parameters.add_claims(
            request.claims.as_deref(),
            &self.base.config().auth.client_capabilities,
        )?;
        self.base.add_client_credentials(&mut parameters);

        let authority = self.base.authority();
        let endpoint = authority.token_endpoint()?;
        let thumbprint = self.base.thumbprint(&scopes, None);
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
            scopes,
            correlation_id: correlation_id.to_string(),
            nonce: request.nonce.clone(),
            state: request.state.clone(),
            obo_assertion: None,
            request_timestamp,
        };
        let result = self
            .base
            .response_handler()
            .handle_server_token_response(
                ServerTokenResponse::from_value(response.body)?,
                authority,
                &context,
            )
            .await?;

        info!(correlation_id = %correlation_id, "Redeemed authorization code");
        Ok(result)
    }

    /// Build the logout URL and remove the signed-out account from the
    /// cache, or every account when none is given.
    pub async fn get_logout_uri(&self, request: &EndSessionRequest) -> Result<String, AuthError> {
        self.base.resolve_authority().await?;

        match &request.account {
            Some(account) => match self.base.cache().remove_account(&account.cache_key()).await {
                Ok(()) => {}
                Err(AuthError::Client(ClientAuthError::NoAccountFound { key })) => {
                    debug!(key = %key, "Account already removed");
                }
                Err(e) => return Err(e),
            },
            None => self.base.cache().remove_all_accounts().await?,
        }

        let endpoint = self
            .base
            .authority()
            .end_session_endpoint()?
            .ok_or_else(|| ClientAuthError::EndpointResolution {
                message: "authority has no end_session_endpoint".to_string(),
            })?;

        let correlation_id = self.base.correlation_id(request.correlation_id.as_deref());
        let mut parameters = RequestParameterBuilder::new();
        if let Some(uri) = request.post_logout_redirect_uri.as_deref() {
            parameters.add_post_logout_redirect_uri(uri)?;
        }
        parameters.add_correlation_id(&correlation_id);
        if let Some(hint) = request.id_token_hint.as_deref() {
            parameters.add_id_token_hint(hint);
        }

        let separator = if endpoint.contains('?') { '&' } else { '?' };
        Ok(format!("{}{}{}", endpoint, separator, parameters.create_query_string()))
    }

    fn redirect_uri<'a>(&'a self, requested: Option<&'a str>) -> Result<&'a str, ConfigurationError> {
        requested
            .or(self.base.config().auth.redirect_uri.as_deref())
            .filter(|uri| !uri.trim().is_empty())
            .ok_or(ConfigurationError::EmptyRedirectUri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfiguration;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    const METADATA: &str = r#"{
        "authorization_endpoint": "https://login.contoso.com/tenant/oauth2/v2.0/authorize",
        "token_endpoint": "https://login.contoso.com/tenant/oauth2/v2.0/token",
        "end_session_endpoint": "https://login.contoso.com/tenant/oauth2/v2.0/logout",
        "issuer": "https://login.contoso.com/tenant/v2.0"
    }"#;

    fn client() -> AuthorizationCodeClient {
        let config = ClientConfiguration::new("app")
            .with_authority("https://login.contoso.com/tenant")
            .with_redirect_uri("http://localhost:8400/callback")
            .with_authority_metadata(METADATA);
        AuthorizationCodeClient::new(
            BaseClient::with_storage(config, Arc::new(MemoryStore::new())).unwrap(),
        )
    }

    fn query_pairs(url: &str) -> Vec<(String, String)> {
        url::Url::parse(url)
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    fn param<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
        pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[tokio::test]
    async fn test_auth_code_url() {
        let client = client();
        let request = AuthorizationUrlRequest {
            code_challenge: Some("challenge".to_string()),
            code_challenge_method: Some("S256".to_string()),
            prompt: Some("select_account".to_string()),
            sid: Some("ignored-without-prompt-none".to_string()),
            state: Some("my-state".to_string()),
            extra_query_parameters: vec![
                ("dc".to_string(), "ESTS-PUB".to_string()),
                ("client_id".to_string(), "override".to_string()),
            ],
            ..AuthorizationUrlRequest::new(vec!["User.Read".to_string()])
        };

        let auth_url = client.get_auth_code_url(&request).await.unwrap();
        assert!(auth_url
            .url
            .starts_with("https://login.contoso.com/tenant/oauth2/v2.0/authorize?"));
        assert_eq!(auth_url.state, "my-state");
        assert!(!auth_url.nonce.is_empty());

        let pairs = query_pairs(&auth_url.url);
        assert_eq!(param(&pairs, "client_id"), Some("app"));
        assert_eq!(param(&pairs, "scope"), Some("User.Read openid profile offline_access"));
        assert_eq!(param(&pairs, "redirect_uri"), Some("http://localhost:8400/callback"));
        assert_eq!(param(&pairs, "response_type"), Some("code"));
        assert_eq!(param(&pairs, "response_mode"), Some("query"));
        assert_eq!(param(&pairs, "code_challenge_method"), Some("S256"));
        assert_eq!(param(&pairs, "prompt"), Some("select_account"));
        assert_eq!(param(&pairs, "state"), Some("my-state"));
        assert_eq!(param(&pairs, "nonce"), Some(auth_url.nonce.as_str()));
        assert_eq!(param(&pairs, "dc"), Some("ESTS-PUB"));
        assert_eq!(param(&pairs, "sid"), None);
    }

    #[tokio::test]
    async fn test_auth_code_url_rejects_bad_prompt() {
        let request = AuthorizationUrlRequest {
            prompt: Some("always".to_string()),
            ..AuthorizationUrlRequest::new(vec!["User.Read".to_string()])
        };
        let err = client().get_auth_code_url(&request).await.unwrap_err();
        assert_eq!(err.error_code(), "invalid_prompt_value");
    }

    #[tokio::test]
    async fn test_empty_code_fails_before_network() {
        let request = AuthorizationCodeRequest {
            scopes: vec!["User.Read".to_string()],
            ..Default::default()
        };
        let err = client().acquire_token(&request).await.unwrap_err();
        assert_eq!(err.error_code(), "token_request_cannot_be_made");
    }

    #[test]
    fn test_handle_fragment_response() {
        let client = client();
        assert_eq!(
            client
                .handle_fragment_response("#code=the-code&state=s1", "s1")
                .unwrap(),
            "the-code"
        );
        let err = client
            .handle_fragment_response("#code=the-code&state=s1", "s2")
            .unwrap_err();
        assert_eq!(err.error_code(), "state_mismatch");
    }

    #[tokio::test]
    async fn test_logout_uri() {
        let client = client();
        let request = EndSessionRequest {
            post_logout_redirect_uri: Some("http://localhost/signed-out".to_string()),
            id_token_hint: Some("hint".to_string()),
            correlation_id: Some("corr".to_string()),
            ..Default::default()
        };
        let uri = client.get_logout_uri(&request).await.unwrap();
        assert_eq!(
            uri,
            "https://login.contoso.com/tenant/oauth2/v2.0/logout?post_logout_redirect_uri=http%3A%2F%2Flocalhost%2Fsigned-out&client-request-id=corr&id_token_hint=hint"
        );
    }
}
