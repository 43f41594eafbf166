//! Token endpoint responses and the results built from them.
//!
//! [`ResponseHandler`] validates server responses, turns a successful token
//! response into a [`CacheRecord`], persists it and produces the
//! caller-facing [`AuthenticationResult`].

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::authority::{Authority, AuthorityType};
use crate::cache::{
    AccessTokenEntity, AccountEntity, AppMetadataEntity, CacheManager, CacheRecord, IdTokenEntity,
    RefreshTokenEntity,
};
use crate::crypto::CryptoProvider;
use crate::error::{AuthError, ClientAuthError};
use crate::model::{AccountAuthorityType, AccountInfo};
use crate::scope::ScopeSet;
use crate::store::Secret;
use crate::token::{AuthToken, ClientInfo, IdTokenClaims};

/// Tenant id of Microsoft personal accounts.
pub const CONSUMER_TENANT_ID: &str = "9188040d-6c67-4c5b-b112-36a304b66dad";

/// Body of a token endpoint response, successful or not.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerTokenResponse {
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default, deserialize_with = "number_or_string")]
    pub expires_in: Option<i64>,
    #[serde(default, deserialize_with = "number_or_string")]
    pub ext_expires_in: Option<i64>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub client_info: Option<String>,
    #[serde(default)]
    pub foci: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub error_codes: Option<Vec<Value>>,
    #[serde(default)]
    pub suberror: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl ServerTokenResponse {
    /// Parse a response body. Unknown or mistyped fields are ignored.
    pub fn from_value(body: Value) -> Result<Self, ClientAuthError> {
        if body.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(body).map_err(|e| ClientAuthError::TokenParsing {
            message: format!("token response is not valid: {}", e),
        })
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some() || self.error_description.is_some() || self.suberror.is_some()
    }

    fn error_codes_string(&self) -> String {
        self.error_codes
            .as_ref()
            .map(|codes| {
                codes
                    .iter()
                    .map(|c| match c {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_default()
    }
}

fn number_or_string<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Parameters returned to the redirect URI by the authorize endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerAuthorizationCodeResponse {
    pub code: Option<String>,
    pub state: Option<String>,
    pub client_info: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub suberror: Option<String>,
}

impl ServerAuthorizationCodeResponse {
    /// Parse a query string or URL fragment, with or without its leading
    /// `?` or `#`.
    pub fn from_query(query: &str) -> Self {
        let query = query.trim_start_matches(['#', '?']);
        let mut response = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "code" => response.code = value,
                "state" => response.state = value,
                "client_info" => response.client_info = value,
                "error" => response.error = value,
                "error_description" => response.error_description = value,
                "suberror" => response.suberror = value,
                _ => {}
            }
        }
        response
    }
}

/// Result of a successful token acquisition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResult {
    pub authority: String,
    pub unique_id: String,
    pub tenant_id: String,
    pub scopes: Vec<String>,
    pub account: Option<AccountInfo>,
    pub id_token: String,
    pub id_token_claims: Option<IdTokenClaims>,
    #[serde(skip_serializing)]
    pub access_token: Secret,
    pub from_cache: bool,
    pub expires_on: Option<DateTime<Utc>>,
    pub ext_expires_on: Option<DateTime<Utc>>,
    pub family_id: Option<String>,
    pub token_type: String,
    pub state: Option<String>,
    pub correlation_id: String,
}

/// Request-side values the handler needs.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub scopes: ScopeSet,
    pub correlation_id: String,
    /// Nonce that the ID token must echo.
    pub nonce: Option<String>,
    pub state: Option<String>,
    pub obo_assertion: Option<String>,
    /// Unix seconds at which the request was sent.
    pub request_timestamp: i64,
}

/// Validates responses and writes their entities to the cache.
#[derive(Clone)]
pub struct ResponseHandler {
    client_id: String,
    cache: CacheManager,
    crypto: Arc<dyn CryptoProvider>,
}

impl ResponseHandler {
    pub fn new(client_id: impl Into<String>, cache: CacheManager, crypto: Arc<dyn CryptoProvider>) -> Self {
        Self {
            client_id: client_id.into(),
            cache,
            crypto,
        }
    }

    /// Check the state echoed to the redirect URI, then surface any error.
    pub fn validate_server_authorization_code_response(
        response: &ServerAuthorizationCodeResponse,
        cached_state: Option<&str>,
    ) -> Result<String, AuthError> {
        let returned = response.state.as_deref().ok_or_else(|| ClientAuthError::StateNotFound {
            message: "server response has no state".to_string(),
        })?;
        let cached = cached_state.ok_or_else(|| ClientAuthError::StateNotFound {
            message: "no state was cached for the request".to_string(),
        })?;

        if percent_decode(returned) != percent_decode(cached) {
            return Err(ClientAuthError::StateMismatch.into());
        }

        if response.error.is_some() || response.error_description.is_some() || response.suberror.is_some() {
            return Err(AuthError::from_server(
                response.error.clone().unwrap_or_default(),
                response.error_description.clone().unwrap_or_default(),
                response.suberror.clone(),
            ));
        }

        response
            .code
            .clone()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ClientAuthError::AuthorizationCodeMissing.into())
    }

    /// Turn an `error` in a token response into an [`AuthError`].
    pub fn validate_token_response(response: &ServerTokenResponse) -> Result<(), AuthError> {
        if !response.is_error() {
            return Ok(());
        }

        let message = format!(
            "{} - [{}]: {} - Correlation ID: {} - Trace ID: {}",
            response.error_codes_string(),
            response.timestamp.as_deref().unwrap_or_default(),
            response.error_description.as_deref().unwrap_or_default(),
            response.correlation_id.as_deref().unwrap_or_default(),
            response.trace_id.as_deref().unwrap_or_default(),
        );
        Err(AuthError::from_server(
            response.error.clone().unwrap_or_default(),
            message,
            response.suberror.clone(),
        ))
    }

    /// Persist a token response and build the result.
    pub async fn handle_server_token_response(
        &self,
        response: ServerTokenResponse,
        authority: &Authority,
        context: &ResponseContext,
    ) -> Result<AuthenticationResult, AuthError> {
        let (record, id_token) = self.prepare_cache_record(&response, authority, context)?;
        self.cache.save_cache_record(&record).await?;
        Ok(Self::generate_authentication_result(
            &record,
            id_token.as_ref(),
            false,
            &authority.canonical_authority(),
            context,
        ))
    }

    /// Like [`handle_server_token_response`](Self::handle_server_token_response),
    /// but returns `None` without writing anything when the account has been
    /// removed while the refresh was in flight.
    pub async fn handle_refresh_token_response(
        &self,
        response: ServerTokenResponse,
        authority: &Authority,
        context: &ResponseContext,
    ) -> Result<Option<AuthenticationResult>, AuthError> {
        let (record, id_token) = self.prepare_cache_record(&response, authority, context)?;

        if let Some(account) = &record.account {
            if self.cache.get_account(&account.cache_key()).await?.is_none() {
                warn!("Account was removed during refresh, discarding response");
                return Ok(None);
            }
        }

        self.cache.save_cache_record(&record).await?;
        Ok(Some(Self::generate_authentication_result(
            &record,
            id_token.as_ref(),
            false,
            &authority.canonical_authority(),
            context,
        )))
    }

    fn prepare_cache_record(
        &self,
        response: &ServerTokenResponse,
        authority: &Authority,
        context: &ResponseContext,
    ) -> Result<(CacheRecord, Option<AuthToken>), AuthError> {
        Self::validate_token_response(response)?;

        let id_token = response
            .id_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(|raw| AuthToken::parse(raw, self.crypto.as_ref()))
            .transpose()?;

        if let (Some(expected), Some(token)) = (&context.nonce, &id_token) {
            if token.claims.nonce.as_deref() != Some(expected.as_str()) {
                return Err(ClientAuthError::NonceMismatch.into());
            }
        }

        let environment = authority.preferred_cache()?;
        if environment.is_empty() {
            return Err(ClientAuthError::InvalidCacheEnvironment.into());
        }

        let record = self.generate_cache_record(
            response,
            authority,
            &environment,
            id_token.as_ref(),
            context,
        );
        Ok((record, id_token))
    }

    /// Build every entity a token response produces.
    pub fn generate_cache_record(
        &self,
        response: &ServerTokenResponse,
        authority: &Authority,
        environment: &str,
        id_token: Option<&AuthToken>,
        context: &ResponseContext,
    ) -> CacheRecord {
        let client_info = response.client_info.as_deref().filter(|c| !c.is_empty());
        let home_account_id = generate_home_account_id(
            client_info,
            authority.authority_type(),
            id_token,
            self.crypto.as_ref(),
        );
        let realm = id_token
            .and_then(|t| t.claims.tid.clone())
            .unwrap_or_else(|| authority.tenant().to_string());

        let mut record = CacheRecord::default();

        if let Some(id_token) = id_token {
            record.id_token = Some(IdTokenEntity::new(
                home_account_id.clone(),
                environment,
                id_token.raw_token.clone(),
                self.client_id.clone(),
                realm.clone(),
                context.obo_assertion.clone(),
            ));
            let authority_type = account_authority_type(authority, client_info, id_token);
            record.account = Some(AccountEntity::from_id_token(
                home_account_id.clone(),
                environment,
                id_token,
                authority_type,
                client_info.map(str::to_string),
            ));
        }

        if let Some(access_token) = response.access_token.as_deref() {
            let scopes = response
                .scope
                .as_deref()
                .and_then(|s| ScopeSet::from_scope_string(s).ok())
                .unwrap_or_else(|| context.scopes.clone());
            let expires_on = context.request_timestamp + response.expires_in.unwrap_or(0);
            let extended_expires_on = response
                .ext_expires_in
                .map(|ext| context.request_timestamp + ext)
                .unwrap_or(expires_on);

            record.access_token = Some(AccessTokenEntity::new(
                home_account_id.clone(),
                environment,
                access_token,
                self.client_id.clone(),
                realm.clone(),
                scopes.print_scopes(),
                context.request_timestamp,
                expires_on,
                extended_expires_on,
                response.token_type.clone(),
                context.obo_assertion.clone(),
            ));
        }

        if let Some(refresh_token) = response.refresh_token.as_deref() {
            record.refresh_token = Some(RefreshTokenEntity::new(
                home_account_id.clone(),
                environment,
                refresh_token,
                self.client_id.clone(),
                response.foci.clone(),
                context.obo_assertion.clone(),
            ));
        }

        if let Some(foci) = response.foci.as_deref().filter(|f| !f.is_empty()) {
            record.app_metadata = Some(AppMetadataEntity {
                client_id: self.client_id.clone(),
                environment: environment.to_string(),
                family_id: Some(foci.to_string()),
            });
        }

        debug!(
            account = record.account.is_some(),
            access_token = record.access_token.is_some(),
            refresh_token = record.refresh_token.is_some(),
            "Generated cache record"
        );
        record
    }

    /// Build the caller-facing result from cached or fresh entities.
    pub fn generate_authentication_result(
        record: &CacheRecord,
        id_token: Option<&AuthToken>,
        from_cache: bool,
        authority: &str,
        context: &ResponseContext,
    ) -> AuthenticationResult {
        let claims = id_token.map(|t| t.claims.clone());
        let access_token = record.access_token.as_ref();

        let scopes = access_token
            .and_then(|at| at.target.as_deref())
            .map(|target| target.split(' ').filter(|s| !s.is_empty()).map(str::to_string).collect())
            .unwrap_or_else(|| context.scopes.as_vec());

        AuthenticationResult {
            authority: authority.to_string(),
            unique_id: claims
                .as_ref()
                .and_then(|c| c.local_account_id().map(str::to_string))
                .unwrap_or_default(),
            tenant_id: claims
                .as_ref()
                .and_then(|c| c.tid.clone())
                .unwrap_or_default(),
            scopes,
            account: record
                .account
                .as_ref()
                .map(|a| a.account_info_with_claims(claims.clone())),
            id_token: id_token.map(|t| t.raw_token.clone()).unwrap_or_default(),
            id_token_claims: claims,
            access_token: access_token
                .map(|at| at.secret.clone())
                .unwrap_or_else(|| Secret::new("")),
            from_cache,
            expires_on: access_token.and_then(|at| timestamp(at.expires_on)),
            ext_expires_on: access_token.and_then(|at| timestamp(at.extended_expires_on)),
            family_id: record
                .refresh_token
                .as_ref()
                .and_then(|rt| rt.family_id.clone()),
            token_type: access_token
                .map(|at| at.token_type.clone())
                .unwrap_or_default(),
            state: context.state.clone(),
            correlation_id: context.correlation_id.clone(),
        }
    }
}

/// `uid.utid` from client_info, `sub` for ADFS or when client_info is unusable.
pub fn generate_home_account_id(
    client_info: Option<&str>,
    authority_type: AuthorityType,
    id_token: Option<&AuthToken>,
    crypto: &dyn CryptoProvider,
) -> String {
    let sub = || {
        id_token
            .and_then(|t| t.claims.sub.clone())
            .unwrap_or_default()
    };

    if authority_type == AuthorityType::Adfs {
        return sub();
    }

    if let Some(raw) = client_info {
        match ClientInfo::decode(raw, crypto) {
            Ok(info) => return info.home_account_id(),
            Err(e) => warn!(error = %e, "Ignoring undecodable client_info"),
        }
    }

    sub()
}

fn account_authority_type(
    authority: &Authority,
    client_info: Option<&str>,
    id_token: &AuthToken,
) -> AccountAuthorityType {
    if authority.authority_type() == AuthorityType::Adfs {
        AccountAuthorityType::Adfs
    } else if id_token.claims.tid.as_deref() == Some(CONSUMER_TENANT_ID) {
        AccountAuthorityType::Msa
    } else if client_info.is_some() {
        AccountAuthorityType::Mssts
    } else {
        AccountAuthorityType::Generic
    }
}

fn timestamp(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single()
}

fn percent_decode(value: &str) -> String {
    url::form_urlencoded::parse(format!("v={}", value).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::TrustedHostRegistry;
    use crate::crypto::DefaultCrypto;
    use crate::model::AccountInfo;
    use crate::network::{NetworkModule, NetworkResponse, RequestOptions};
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct NoNetwork;

    #[async_trait]
    impl NetworkModule for NoNetwork {
        async fn send_get_request(
            &self,
            url: &str,
            _options: &RequestOptions,
        ) -> Result<NetworkResponse, ClientAuthError> {
            Err(ClientAuthError::Network {
                endpoint: url.to_string(),
                message: "offline".to_string(),
            })
        }

        async fn send_post_request(
            &self,
            url: &str,
            options: &RequestOptions,
        ) -> Result<NetworkResponse, ClientAuthError> {
            self.send_get_request(url, options).await
        }
    }

    const METADATA: &str = r#"{
        "authorization_endpoint": "https://login.microsoftonline.com/contoso/oauth2/v2.0/authorize",
        "token_endpoint": "https://login.microsoftonline.com/contoso/oauth2/v2.0/token",
        "issuer": "https://login.microsoftonline.com/contoso/v2.0"
    }"#;

    async fn setup() -> (ResponseHandler, CacheManager, Authority) {
        let registry = Arc::new(TrustedHostRegistry::new());
        let cache = CacheManager::new(Arc::new(MemoryStore::new()), registry.clone());
        let authority = Authority::new("https://login.microsoftonline.com/contoso", registry)
            .unwrap()
            .with_metadata_document(Some(METADATA.to_string()));
        authority.resolve_endpoints(&NoNetwork, &cache, "app").await.unwrap();
        let handler = ResponseHandler::new("app", cache.clone(), Arc::new(DefaultCrypto));
        (handler, cache, authority)
    }

    fn id_token(claims: Value) -> String {
        let crypto = DefaultCrypto;
        format!(
            "{}.{}.sig",
            crypto.base64_encode(r#"{"alg":"none"}"#),
            crypto.base64_encode(&claims.to_string())
        )
    }

    fn client_info() -> String {
        DefaultCrypto.base64_encode(r#"{"uid":"uid","utid":"utid"}"#)
    }

    fn context(nonce: Option<&str>) -> ResponseContext {
        ResponseContext {
            scopes: ScopeSet::from_scope_string("User.Read").unwrap(),
            correlation_id: "corr".to_string(),
            nonce: nonce.map(str::to_string),
            state: Some("state".to_string()),
            obo_assertion: None,
            request_timestamp: 1_000,
        }
    }

    fn token_response() -> ServerTokenResponse {
        ServerTokenResponse::from_value(serde_json::json!({
            "token_type": "Bearer",
            "scope": "User.Read openid profile",
            "expires_in": "3600",
            "ext_expires_in": 7200,
            "access_token": "at",
            "refresh_token": "rt",
            "id_token": id_token(serde_json::json!({
                "oid": "oid", "sub": "sub", "tid": "contoso-tid",
                "preferred_username": "user@contoso.com", "nonce": "n-1"
            })),
            "client_info": client_info(),
            "foci": "1"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_handle_token_response_saves_record() {
        let (handler, cache, authority) = setup().await;
        let result = handler
            .handle_server_token_response(token_response(), &authority, &context(Some("n-1")))
            .await
            .unwrap();

        assert_eq!(result.access_token.expose(), "at");
        assert_eq!(result.unique_id, "oid");
        assert_eq!(result.tenant_id, "contoso-tid");
        assert_eq!(result.family_id.as_deref(), Some("1"));
        assert_eq!(result.expires_on.unwrap().timestamp(), 4_600);
        assert_eq!(result.ext_expires_on.unwrap().timestamp(), 8_200);
        assert_eq!(result.scopes, vec!["User.Read", "openid", "profile"]);
        assert!(!result.from_cache);

        let account = result.account.unwrap();
        assert_eq!(account.home_account_id, "uid.utid");
        assert_eq!(account.environment, "login.microsoftonline.com");

        let entity = cache.get_account(&account.cache_key()).await.unwrap().unwrap();
        assert_eq!(entity.authority_type, AccountAuthorityType::Mssts);
        assert!(cache.is_app_metadata_foci("login.microsoftonline.com", "app").await.unwrap());
        let rt = cache
            .read_refresh_token_from_cache("other-app", &account, true)
            .await
            .unwrap();
        assert!(rt.is_some());
    }

    #[tokio::test]
    async fn test_nonce_mismatch() {
        let (handler, cache, authority) = setup().await;
        let err = handler
            .handle_server_token_response(token_response(), &authority, &context(Some("other")))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "nonce_mismatch");
        assert!(cache.get_keys().await.unwrap().iter().all(|k| k.starts_with("authority-metadata")));
    }

    #[tokio::test]
    async fn test_refresh_response_for_removed_account_is_discarded() {
        let (handler, cache, authority) = setup().await;
        let result = handler
            .handle_refresh_token_response(token_response(), &authority, &context(None))
            .await
            .unwrap();
        assert!(result.is_none());

        let accounts: Vec<AccountInfo> = cache.get_all_accounts().await.unwrap();
        assert!(accounts.is_empty());
    }

    #[tokio::test]
    async fn test_app_only_response_uses_authority_tenant() {
        let (handler, _cache, authority) = setup().await;
        let response = ServerTokenResponse::from_value(serde_json::json!({
            "token_type": "Bearer",
            "expires_in": 3599,
            "access_token": "app-token"
        }))
        .unwrap();

        let record = handler.generate_cache_record(
            &response,
            &authority,
            "login.microsoftonline.com",
            None,
            &context(None),
        );
        let at = record.access_token.unwrap();
        assert_eq!(at.home_account_id, "");
        assert_eq!(at.realm, "contoso");
        assert_eq!(at.target.as_deref(), Some("User.Read"));
        assert_eq!(at.extended_expires_on, at.expires_on);
        assert!(record.account.is_none());
    }

    #[test]
    fn test_validate_token_error_response() {
        let response = ServerTokenResponse::from_value(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "AADSTS70000: grant expired",
            "error_codes": [70000],
            "timestamp": "2024-01-01 00:00:00Z",
            "trace_id": "trace",
            "correlation_id": "corr",
            "suberror": "bad_token"
        }))
        .unwrap();

        let err = ResponseHandler::validate_token_response(&response).unwrap_err();
        assert_eq!(err.error_code(), "invalid_grant");
        assert_eq!(err.sub_error(), Some("bad_token"));
        assert!(err.to_string().contains(
            "70000 - [2024-01-01 00:00:00Z]: AADSTS70000: grant expired - Correlation ID: corr - Trace ID: trace"
        ));
    }

    #[test]
    fn test_interaction_required_response() {
        let response = ServerTokenResponse::from_value(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "user must sign in",
            "suberror": "basic_action"
        }))
        .unwrap();
        let err = ResponseHandler::validate_token_response(&response).unwrap_err();
        assert!(matches!(err, AuthError::InteractionRequired(_)));
    }

    #[test]
    fn test_authorization_code_response_validation() {
        let response = ServerAuthorizationCodeResponse::from_query("#code=abc&state=a%20b&client_info=xyz");
        assert_eq!(
            ResponseHandler::validate_server_authorization_code_response(&response, Some("a b")).unwrap(),
            "abc"
        );

        let err = ResponseHandler::validate_server_authorization_code_response(&response, Some("other"))
            .unwrap_err();
        assert_eq!(err.error_code(), "state_mismatch");

        let err = ResponseHandler::validate_server_authorization_code_response(&response, None).unwrap_err();
        assert_eq!(err.error_code(), "state_not_found");

        let missing_code = ServerAuthorizationCodeResponse::from_query("?state=s");
        let err = ResponseHandler::validate_server_authorization_code_response(&missing_code, Some("s"))
            .unwrap_err();
        assert_eq!(err.error_code(), "authorization_code_missing_from_server_response");

        let error = ServerAuthorizationCodeResponse::from_query("state=s&error=access_denied&error_description=denied");
        let err = ResponseHandler::validate_server_authorization_code_response(&error, Some("s")).unwrap_err();
        assert_eq!(err.error_code(), "access_denied");
    }

    #[test]
    fn test_home_account_id_rules() {
        let crypto = DefaultCrypto;
        let token = AuthToken::parse(&id_token(serde_json::json!({"sub": "the-sub"})), &crypto).unwrap();
        let info = client_info();

        assert_eq!(
            generate_home_account_id(Some(&info), AuthorityType::Default, Some(&token), &crypto),
            "uid.utid"
        );
        assert_eq!(
            generate_home_account_id(Some(&info), AuthorityType::Adfs, Some(&token), &crypto),
            "the-sub"
        );
        assert_eq!(
            generate_home_account_id(Some("%%%"), AuthorityType::Default, Some(&token), &crypto),
            "the-sub"
        );
        assert_eq!(
            generate_home_account_id(None, AuthorityType::Default, None, &crypto),
            ""
        );
    }
}
