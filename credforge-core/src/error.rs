//! Error taxonomy for the engine.
//!
//! Errors are grouped by kind rather than by call site:
//! - [`ConfigurationError`] - invalid caller input, raised before any network call
//! - [`ClientAuthError`] - engine-side failures and control-flow signals
//! - [`ServerError`] / [`InteractionRequiredError`] - errors returned by the token endpoint
//! - [`StoreError`](crate::store::StoreError) - failures of the cache storage backend
//!
//! [`AuthError`] wraps all of them and exposes a machine-readable
//! [`error_code`](AuthError::error_code) so fallback decisions can match on
//! codes instead of message text.

use thiserror::Error;

use crate::store::StoreError;

/// Error codes the token endpoint uses when the user must sign in again.
pub const INTERACTION_REQUIRED_ERROR_CODES: [&str; 3] =
    ["interaction_required", "consent_required", "login_required"];

/// Sub-errors that also require interactive sign-in.
pub const INTERACTION_REQUIRED_SUB_ERRORS: [&str; 5] = [
    "message_only",
    "additional_action",
    "basic_action",
    "user_password_expired",
    "consent_required",
];

/// Server error code for a rejected grant.
pub const INVALID_GRANT_ERROR: &str = "invalid_grant";

/// Sub-error returned when a family refresh token is not usable by this client.
pub const CLIENT_MISMATCH_ERROR: &str = "client_mismatch";

/// Invalid caller-supplied configuration or request parameters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("scopes cannot be empty")]
    EmptyScopes,

    #[error("redirect URI cannot be empty")]
    EmptyRedirectUri,

    #[error("invalid prompt value: {prompt}")]
    InvalidPrompt { prompt: String },

    #[error("claims request is not valid JSON: {message}")]
    InvalidClaims { message: String },

    #[error("code_challenge and code_challenge_method must be supplied together")]
    MissingPkceParams,

    #[error("invalid code_challenge_method: {method}")]
    InvalidCodeChallengeMethod { method: String },

    #[error("invalid authority {authority}: {message}")]
    InvalidAuthority { authority: String, message: String },

    #[error("authority must use https: {authority}")]
    InsecureAuthority { authority: String },

    #[error("invalid cloud discovery metadata: {message}")]
    InvalidCloudDiscoveryMetadata { message: String },

    #[error("confidential flow requires a client secret or client assertion")]
    MissingClientCredential,

    #[error("client_id cannot be empty")]
    MissingClientId,
}

impl ConfigurationError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyScopes => "empty_input_scopes_error",
            Self::EmptyRedirectUri => "redirect_uri_empty",
            Self::InvalidPrompt { .. } => "invalid_prompt_value",
            Self::InvalidClaims { .. } => "invalid_claims",
            Self::MissingPkceParams => "pkce_params_missing",
            Self::InvalidCodeChallengeMethod { .. } => "invalid_code_challenge_method",
            Self::InvalidAuthority { .. } => "url_parse_error",
            Self::InsecureAuthority { .. } => "authority_uri_insecure",
            Self::InvalidCloudDiscoveryMetadata { .. } => "invalid_cloud_discovery_metadata",
            Self::MissingClientCredential => "missing_client_credential",
            Self::MissingClientId => "client_id_missing",
        }
    }
}

/// Engine-side failures, including signals consumed internally.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientAuthError {
    #[error("state returned by the server does not match the cached state")]
    StateMismatch,

    #[error("state not found: {message}")]
    StateNotFound { message: String },

    #[error("nonce in the id token does not match the cached nonce")]
    NonceMismatch,

    #[error("no tokens found in cache")]
    NoTokensFound,

    #[error("multiple {kind} entries matched the request")]
    MultipleMatchingTokens { kind: String },

    #[error("authority host {host} is not in the trusted host list")]
    UntrustedAuthority { host: String },

    #[error("cached token cannot be used, a refresh is required")]
    TokenRefreshRequired,

    #[error("endpoint discovery incomplete: {message}")]
    EndpointResolution { message: String },

    #[error("no account found in cache for key {key}")]
    NoAccountFound { key: String },

    #[error("silent request requires an account")]
    NoAccountInSilentRequest,

    #[error("server response did not contain an authorization code")]
    AuthorizationCodeMissing,

    #[error("token request cannot be made: {message}")]
    TokenRequestCannotBeMade { message: String },

    #[error("device code polling was cancelled")]
    DeviceCodePollingCancelled,

    #[error("device code expired before the user completed sign-in")]
    DeviceCodeExpired,

    #[error("caller timeout reached while polling for the device code")]
    UserTimeoutReached,

    #[error("authority has no preferred cache environment")]
    InvalidCacheEnvironment,

    #[error("failed to parse token: {message}")]
    TokenParsing { message: String },

    #[error("failed to decode client_info: {message}")]
    ClientInfoDecoding { message: String },

    #[error("network request to {endpoint} failed: {message}")]
    Network { endpoint: String, message: String },
}

impl ClientAuthError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::StateMismatch => "state_mismatch",
            Self::StateNotFound { .. } => "state_not_found",
            Self::NonceMismatch => "nonce_mismatch",
            Self::NoTokensFound => "no_tokens_found",
            Self::MultipleMatchingTokens { .. } => "multiple_matching_tokens",
            Self::UntrustedAuthority { .. } => "untrusted_authority",
            Self::TokenRefreshRequired => "token_refresh_required",
            Self::EndpointResolution { .. } => "endpoints_resolution_error",
            Self::NoAccountFound { .. } => "no_account_found",
            Self::NoAccountInSilentRequest => "no_account_in_silent_request",
            Self::AuthorizationCodeMissing => "authorization_code_missing_from_server_response",
            Self::TokenRequestCannotBeMade { .. } => "token_request_cannot_be_made",
            Self::DeviceCodePollingCancelled => "device_code_polling_cancelled",
            Self::DeviceCodeExpired => "device_code_expired",
            Self::UserTimeoutReached => "user_timeout_reached",
            Self::InvalidCacheEnvironment => "invalid_cache_environment",
            Self::TokenParsing { .. } => "token_parsing_error",
            Self::ClientInfoDecoding { .. } => "client_info_decoding_error",
            Self::Network { .. } => "network_error",
        }
    }
}

/// An `error` returned by the authorization server.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{error_code}: {error_message}")]
pub struct ServerError {
    pub error_code: String,
    pub error_message: String,
    pub sub_error: Option<String>,
}

impl ServerError {
    pub fn new(
        error_code: impl Into<String>,
        error_message: impl Into<String>,
        sub_error: Option<String>,
    ) -> Self {
        Self {
            error_code: error_code.into(),
            error_message: error_message.into(),
            sub_error: sub_error.filter(|s| !s.is_empty()),
        }
    }
}

/// A server error that can only be resolved by interactive sign-in.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("interaction required: {0}")]
pub struct InteractionRequiredError(pub ServerError);

/// Returns true when a server error requires the user to sign in again.
///
/// The description is scanned as well because some endpoints only put the
/// code there.
pub fn is_interaction_required(
    error_code: Option<&str>,
    error_description: Option<&str>,
    sub_error: Option<&str>,
) -> bool {
    let code_match = error_code
        .map(|code| INTERACTION_REQUIRED_ERROR_CODES.contains(&code))
        .unwrap_or(false);
    let sub_error_match = sub_error
        .map(|sub| INTERACTION_REQUIRED_SUB_ERRORS.contains(&sub))
        .unwrap_or(false);
    let description_match = error_description
        .map(|desc| {
            INTERACTION_REQUIRED_ERROR_CODES
                .iter()
                .any(|code| desc.contains(code))
        })
        .unwrap_or(false);

    code_match || sub_error_match || description_match
}

/// Top-level error type returned by every engine operation.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("client error: {0}")]
    Client(#[from] ClientAuthError),

    #[error("server error: {0}")]
    Server(#[from] ServerError),

    #[error(transparent)]
    InteractionRequired(#[from] InteractionRequiredError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl AuthError {
    /// Build a server error, classifying it as interaction-required when the
    /// code, description or sub-error call for it.
    pub fn from_server(
        error_code: impl Into<String>,
        error_message: impl Into<String>,
        sub_error: Option<String>,
    ) -> Self {
        let error = ServerError::new(error_code, error_message, sub_error);
        if is_interaction_required(
            Some(&error.error_code),
            Some(&error.error_message),
            error.sub_error.as_deref(),
        ) {
            Self::InteractionRequired(InteractionRequiredError(error))
        } else {
            Self::Server(error)
        }
    }

    /// Machine-readable error code.
    pub fn error_code(&self) -> &str {
        match self {
            Self::Configuration(e) => e.code(),
            Self::Client(e) => e.code(),
            Self::Server(e) => &e.error_code,
            Self::InteractionRequired(e) => &e.0.error_code,
            Self::Storage(_) => "storage_error",
        }
    }

    /// Server sub-error, if any.
    pub fn sub_error(&self) -> Option<&str> {
        match self {
            Self::Server(e) => e.sub_error.as_deref(),
            Self::InteractionRequired(e) => e.0.sub_error.as_deref(),
            _ => None,
        }
    }

    /// True for the internal "refresh required" signal raised by the silent flow.
    pub fn is_refresh_required(&self) -> bool {
        matches!(self, Self::Client(ClientAuthError::TokenRefreshRequired))
    }

    /// True when no suitable token was found in the cache.
    pub fn is_no_tokens_found(&self) -> bool {
        matches!(self, Self::Client(ClientAuthError::NoTokensFound))
    }

    /// True when a family refresh token was rejected for this client.
    pub fn is_client_mismatch(&self) -> bool {
        matches!(
            self,
            Self::Server(e)
                if e.error_code == INVALID_GRANT_ERROR
                    && e.sub_error.as_deref() == Some(CLIENT_MISMATCH_ERROR)
        )
    }
}
