//! Ordered OAuth request parameters.

use serde_json::{Map, Value};
use url::form_urlencoded;

use crate::config::LibraryInfo;
use crate::error::ConfigurationError;
use crate::scope::{OIDC_DEFAULT_SCOPES, ScopeSet};

use super::ResponseMode;

pub const CLIENT_ASSERTION_TYPE_JWT_BEARER: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

pub const VALID_PROMPTS: [&str; 4] = ["login", "select_account", "consent", "none"];
pub const VALID_CODE_CHALLENGE_METHODS: [&str; 2] = ["plain", "S256"];

/// OAuth grant types sent as `grant_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
    ClientCredentials,
    JwtBearer,
    DeviceCode,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::RefreshToken => "refresh_token",
            Self::ClientCredentials => "client_credentials",
            Self::JwtBearer => "urn:ietf:params:oauth:grant-type:jwt-bearer",
            Self::DeviceCode => "urn:ietf:params:oauth:grant-type:device_code",
        }
    }
}

/// Builds a form-encoded parameter string.
///
/// Parameters keep insertion order. Setting a key again replaces its value
/// in place. Validation happens on insert, so a finished builder always
/// serializes.
#[derive(Debug, Clone, Default)]
pub struct RequestParameterBuilder {
    parameters: Vec<(String, String)>,
}

impl RequestParameterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.parameters.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.parameters.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn add_response_type_code(&mut self) {
        self.set("response_type", "code");
    }

    pub fn add_response_mode(&mut self, response_mode: ResponseMode) {
        self.set("response_mode", response_mode.as_str());
    }

    /// `scope`, optionally with the default OIDC scopes appended.
    pub fn add_scopes(&mut self, scopes: &ScopeSet, add_oidc_scopes: bool) {
        let mut scopes = scopes.clone();
        if add_oidc_scopes {
            scopes.append_scopes(OIDC_DEFAULT_SCOPES);
        }
        self.set("scope", scopes.print_scopes());
    }

    pub fn add_client_id(&mut self, client_id: &str) {
        self.set("client_id", client_id);
    }

    pub fn add_redirect_uri(&mut self, redirect_uri: &str) -> Result<(), ConfigurationError> {
        if redirect_uri.trim().is_empty() {
            return Err(ConfigurationError::EmptyRedirectUri);
        }
        self.set("redirect_uri", redirect_uri);
        Ok(())
    }

    pub fn add_post_logout_redirect_uri(&mut self, redirect_uri: &str) -> Result<(), ConfigurationError> {
        if redirect_uri.trim().is_empty() {
            return Err(ConfigurationError::EmptyRedirectUri);
        }
        self.set("post_logout_redirect_uri", redirect_uri);
        Ok(())
    }

    pub fn add_id_token_hint(&mut self, id_token_hint: &str) {
        self.set("id_token_hint", id_token_hint);
    }

    pub fn add_domain_hint(&mut self, domain_hint: &str) {
        self.set("domain_hint", domain_hint);
    }

    pub fn add_login_hint(&mut self, login_hint: &str) {
        self.set("login_hint", login_hint);
    }

    pub fn add_sid(&mut self, sid: &str) {
        self.set("sid", sid);
    }

    /// `claims`, merged with the client capabilities.
    ///
    /// Nothing is added when both are empty.
    pub fn add_claims(
        &mut self,
        claims: Option<&str>,
        client_capabilities: &[String],
    ) -> Result<(), ConfigurationError> {
        let claims = claims.map(str::trim).filter(|c| !c.is_empty());
        if claims.is_none() && client_capabilities.is_empty() {
            return Ok(());
        }
        let merged = merge_claims(claims, client_capabilities)?;
        self.set("claims", merged);
        Ok(())
    }

    pub fn add_correlation_id(&mut self, correlation_id: &str) {
        self.set("client-request-id", correlation_id);
    }

    pub fn add_prompt(&mut self, prompt: &str) -> Result<(), ConfigurationError> {
        if !VALID_PROMPTS.contains(&prompt) {
            return Err(ConfigurationError::InvalidPrompt {
                prompt: prompt.to_string(),
            });
        }
        self.set("prompt", prompt);
        Ok(())
    }

    pub fn add_state(&mut self, state: &str) {
        if !state.is_empty() {
            self.set("state", state);
        }
    }

    pub fn add_nonce(&mut self, nonce: &str) {
        self.set("nonce", nonce);
    }

    /// `code_challenge` and `code_challenge_method`; both or neither.
    pub fn add_code_challenge_params(
        &mut self,
        code_challenge: Option<&str>,
        code_challenge_method: Option<&str>,
    ) -> Result<(), ConfigurationError> {
        match (code_challenge, code_challenge_method) {
            (None, None) => Ok(()),
            (Some(challenge), Some(method)) if !challenge.is_empty() => {
                if !VALID_CODE_CHALLENGE_METHODS.contains(&method) {
                    return Err(ConfigurationError::InvalidCodeChallengeMethod {
                        method: method.to_string(),
                    });
                }
                self.set("code_challenge", challenge);
                self.set("code_challenge_method", method);
                Ok(())
            }
            _ => Err(ConfigurationError::MissingPkceParams),
        }
    }

    pub fn add_authorization_code(&mut self, code: &str) {
        self.set("code", code);
    }

    pub fn add_device_code(&mut self, device_code: &str) {
        self.set("device_code", device_code);
    }

    pub fn add_refresh_token(&mut self, refresh_token: &str) {
        self.set("refresh_token", refresh_token);
    }

    pub fn add_code_verifier(&mut self, code_verifier: &str) {
        self.set("code_verifier", code_verifier);
    }

    pub fn add_client_secret(&mut self, client_secret: &str) {
        self.set("client_secret", client_secret);
    }

    /// `client_assertion` with the JWT bearer assertion type.
    pub fn add_client_assertion(&mut self, assertion: &str) {
        self.set("client_assertion", assertion);
        self.set("client_assertion_type", CLIENT_ASSERTION_TYPE_JWT_BEARER);
    }

    pub fn add_obo_assertion(&mut self, assertion: &str) {
        self.set("assertion", assertion);
    }

    pub fn add_requested_token_use(&mut self, token_use: &str) {
        self.set("requested_token_use", token_use);
    }

    pub fn add_grant_type(&mut self, grant_type: GrantType) {
        self.set("grant_type", grant_type.as_str());
    }

    pub fn add_client_info(&mut self) {
        self.set("client_info", "1");
    }

    /// `x-client-*` library identification.
    pub fn add_library_info(&mut self, library: &LibraryInfo) {
        self.set("x-client-SKU", library.sku.as_str());
        self.set("x-client-VER", library.version.as_str());
        self.set("x-client-OS", library.os.as_str());
        self.set("x-client-CPU", library.cpu.as_str());
    }

    /// Caller-supplied parameters. Parameters already set are kept.
    pub fn add_extra_query_parameters(&mut self, extra: &[(String, String)]) {
        for (key, value) in extra {
            if !self.contains(key) {
                self.set(key, value.as_str());
            }
        }
    }

    /// Encode once as `application/x-www-form-urlencoded`.
    pub fn create_query_string(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.parameters {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }
}

fn merge_claims(
    claims: Option<&str>,
    client_capabilities: &[String],
) -> Result<String, ConfigurationError> {
    let invalid = |message: String| ConfigurationError::InvalidClaims { message };

    let mut root = match claims {
        Some(claims) => match serde_json::from_str::<Value>(claims) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(invalid("claims must be a JSON object".to_string())),
            Err(e) => return Err(invalid(e.to_string())),
        },
        None => Map::new(),
    };

    if !client_capabilities.is_empty() {
        let access_token = root
            .entry("access_token")
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(access_token) = access_token else {
            return Err(invalid("access_token claims must be a JSON object".to_string()));
        };
        access_token.insert(
            "xms_cc".to_string(),
            serde_json::json!({ "values": client_capabilities }),
        );
    }

    Ok(Value::Object(root).to_string())
}
