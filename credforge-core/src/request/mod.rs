//! Request types for each public operation.
//!
//! Every request states its defaults explicitly; `Default` implementations
//! produce a request that only lacks caller-specific values such as scopes.

use tokio_util::sync::CancellationToken;

use crate::model::AccountInfo;

mod params;

pub use params::{
    CLIENT_ASSERTION_TYPE_JWT_BEARER, GrantType, RequestParameterBuilder, VALID_CODE_CHALLENGE_METHODS,
    VALID_PROMPTS,
};

/// How the authorization server returns the code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseMode {
    #[default]
    Query,
    Fragment,
    FormPost,
}

impl ResponseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Fragment => "fragment",
            Self::FormPost => "form_post",
        }
    }
}

/// Parameters of the `/authorize` redirect URL.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationUrlRequest {
    pub scopes: Vec<String>,
    /// Falls back to the configured redirect URI.
    pub redirect_uri: Option<String>,
    pub response_mode: ResponseMode,
    /// Generated when absent.
    pub state: Option<String>,
    /// Generated when absent.
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub prompt: Option<String>,
    pub login_hint: Option<String>,
    pub domain_hint: Option<String>,
    /// Only sent with `prompt=none`.
    pub sid: Option<String>,
    pub claims: Option<String>,
    pub extra_query_parameters: Vec<(String, String)>,
    pub correlation_id: Option<String>,
}

impl AuthorizationUrlRequest {
    pub fn new(scopes: Vec<String>) -> Self {
        Self {
            scopes,
            ..Default::default()
        }
    }
}

/// Redeem an authorization code.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationCodeRequest {
    pub scopes: Vec<String>,
    pub code: String,
    /// Falls back to the configured redirect URI.
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub claims: Option<String>,
    /// Nonce sent in the authorize request, checked against the ID token.
    pub nonce: Option<String>,
    /// State sent in the authorize request, echoed in the result.
    pub state: Option<String>,
    pub correlation_id: Option<String>,
}

/// Exchange a refresh token.
#[derive(Debug, Clone, Default)]
pub struct RefreshTokenRequest {
    pub scopes: Vec<String>,
    pub refresh_token: String,
    pub redirect_uri: Option<String>,
    pub claims: Option<String>,
    pub correlation_id: Option<String>,
}

/// Get a token for a cached account, refreshing when needed.
#[derive(Debug, Clone)]
pub struct SilentFlowRequest {
    pub scopes: Vec<String>,
    pub account: AccountInfo,
    pub force_refresh: bool,
    pub claims: Option<String>,
    pub correlation_id: Option<String>,
}

impl SilentFlowRequest {
    pub fn new(scopes: Vec<String>, account: AccountInfo) -> Self {
        Self {
            scopes,
            account,
            force_refresh: false,
            claims: None,
            correlation_id: None,
        }
    }
}

/// Refresh for a cached account, preferring the family refresh token.
#[derive(Debug, Clone)]
pub struct CommonRefreshRequest {
    pub scopes: Vec<String>,
    pub account: AccountInfo,
    pub claims: Option<String>,
    pub correlation_id: Option<String>,
}

impl From<SilentFlowRequest> for CommonRefreshRequest {
    fn from(request: SilentFlowRequest) -> Self {
        Self {
            scopes: request.scopes,
            account: request.account,
            claims: request.claims,
            correlation_id: request.correlation_id,
        }
    }
}

/// App-only token.
#[derive(Debug, Clone, Default)]
pub struct ClientCredentialRequest {
    pub scopes: Vec<String>,
    pub skip_cache: bool,
    pub claims: Option<String>,
    pub correlation_id: Option<String>,
}

/// Exchange an incoming user assertion for a downstream token.
#[derive(Debug, Clone, Default)]
pub struct OnBehalfOfRequest {
    pub scopes: Vec<String>,
    pub obo_assertion: String,
    pub skip_cache: bool,
    pub claims: Option<String>,
    pub correlation_id: Option<String>,
}

/// Device code sign-in.
#[derive(Debug, Clone, Default)]
pub struct DeviceCodeRequest {
    pub scopes: Vec<String>,
    /// Stop polling after this many seconds even if the code is still valid.
    pub timeout_seconds: Option<u64>,
    /// Cancel to stop polling at the next tick.
    pub cancellation: CancellationToken,
    pub claims: Option<String>,
    pub correlation_id: Option<String>,
}

/// Build a logout URL and forget the account.
#[derive(Debug, Clone, Default)]
pub struct EndSessionRequest {
    /// Removed from the cache; every account is removed when absent.
    pub account: Option<AccountInfo>,
    pub post_logout_redirect_uri: Option<String>,
    pub id_token_hint: Option<String>,
    pub correlation_id: Option<String>,
}
