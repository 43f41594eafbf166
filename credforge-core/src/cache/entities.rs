//! Cache entity records and their key derivation.
//!
//! Every entity is a plain serializable record. Keys are lower-cased and
//! joined with `-`; changing either breaks compatibility with caches written
//! by other processes.

use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

use crate::model::{
    AccountAuthorityType, AccountInfo, CACHE_KEY_SEPARATOR, CredentialType, THE_FAMILY_ID,
};
use crate::store::Secret;
use crate::token::{AuthToken, IdTokenClaims, is_token_expired};

pub const APP_METADATA_PREFIX: &str = "appmetadata";
pub const THROTTLING_PREFIX: &str = "throttling";
pub const SERVER_TELEMETRY_PREFIX: &str = "server-telemetry";
pub const AUTHORITY_METADATA_PREFIX: &str = "authority-metadata";

/// Seconds a cached discovery document stays usable.
pub const AUTHORITY_METADATA_REFRESH_SECONDS: i64 = 86_400;

/// Kind of entity a cache key refers to, judged from the key alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKeyKind {
    Credential(CredentialType),
    AppMetadata,
    Throttling,
    ServerTelemetry,
    AuthorityMetadata,
    /// Anything else; may be an account.
    Other,
}

impl CacheKeyKind {
    pub fn classify(key: &str) -> Self {
        if key.starts_with(THROTTLING_PREFIX) {
            Self::Throttling
        } else if key.starts_with(SERVER_TELEMETRY_PREFIX) {
            Self::ServerTelemetry
        } else if key.starts_with(AUTHORITY_METADATA_PREFIX) {
            Self::AuthorityMetadata
        } else if key.starts_with(APP_METADATA_PREFIX) {
            Self::AppMetadata
        } else if let Some(credential_type) = CredentialType::from_cache_key(key) {
            Self::Credential(credential_type)
        } else {
            Self::Other
        }
    }
}

fn join_key(parts: &[&str]) -> String {
    parts.join(CACHE_KEY_SEPARATOR).to_lowercase()
}

/// A signed-in account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountEntity {
    pub home_account_id: String,
    pub environment: String,
    pub realm: String,
    pub local_account_id: String,
    pub username: String,
    pub authority_type: AccountAuthorityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<String>,
}

impl AccountEntity {
    /// Build an account from an ID token.
    pub fn from_id_token(
        home_account_id: impl Into<String>,
        environment: impl Into<String>,
        id_token: &AuthToken,
        authority_type: AccountAuthorityType,
        client_info: Option<String>,
    ) -> Self {
        let claims = &id_token.claims;
        Self {
            home_account_id: home_account_id.into(),
            environment: environment.into(),
            realm: claims.tid.clone().unwrap_or_default(),
            local_account_id: claims.local_account_id().unwrap_or_default().to_string(),
            username: claims.username().unwrap_or_default().to_string(),
            authority_type,
            name: claims.name.clone(),
            client_info: client_info.filter(|c| !c.is_empty()),
        }
    }

    /// `homeAccountId-environment-realm`
    pub fn cache_key(&self) -> String {
        join_key(&[&self.home_account_id, &self.environment, &self.realm])
    }

    /// `homeAccountId-environment`, shared with the account's credentials.
    pub fn account_id(&self) -> String {
        join_key(&[&self.home_account_id, &self.environment])
    }

    pub fn account_info(&self) -> AccountInfo {
        self.account_info_with_claims(None)
    }

    pub fn account_info_with_claims(&self, claims: Option<IdTokenClaims>) -> AccountInfo {
        AccountInfo {
            home_account_id: self.home_account_id.clone(),
            environment: self.environment.clone(),
            tenant_id: self.realm.clone(),
            username: self.username.clone(),
            local_account_id: self.local_account_id.clone(),
            name: self.name.clone(),
            id_token_claims: claims,
        }
    }
}

/// Fields shared by every credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialEntity {
    pub home_account_id: String,
    pub environment: String,
    pub credential_type: CredentialType,
    pub client_id: String,
    pub secret: Secret,
    #[serde(default)]
    pub realm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obo_assertion: Option<String>,
}

impl CredentialEntity {
    /// `homeAccountId-environment`
    pub fn account_id(&self) -> String {
        join_key(&[&self.home_account_id, &self.environment])
    }

    /// `credentialType-clientOrFamilyId-realm`
    ///
    /// Refresh tokens key on the family id when they belong to a family.
    pub fn credential_id(&self) -> String {
        let client_or_family_id = match (self.credential_type, self.family_id.as_deref()) {
            (CredentialType::RefreshToken, Some(family_id)) if !family_id.is_empty() => family_id,
            _ => self.client_id.as_str(),
        };
        join_key(&[
            self.credential_type.key_fragment(),
            client_or_family_id,
            &self.realm,
        ])
    }

    /// `accountId-credentialId-target`
    pub fn cache_key(&self) -> String {
        join_key(&[
            &self.account_id(),
            &self.credential_id(),
            self.target.as_deref().unwrap_or_default(),
        ])
    }
}

macro_rules! credential_deref {
    ($entity:ty) => {
        impl Deref for $entity {
            type Target = CredentialEntity;

            fn deref(&self) -> &CredentialEntity {
                &self.base
            }
        }

        impl DerefMut for $entity {
            fn deref_mut(&mut self) -> &mut CredentialEntity {
                &mut self.base
            }
        }
    };
}

/// A raw ID token kept for building results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenEntity {
    #[serde(flatten)]
    pub base: CredentialEntity,
}

credential_deref!(IdTokenEntity);

impl IdTokenEntity {
    pub fn new(
        home_account_id: impl Into<String>,
        environment: impl Into<String>,
        id_token: impl Into<String>,
        client_id: impl Into<String>,
        realm: impl Into<String>,
        obo_assertion: Option<String>,
    ) -> Self {
        Self {
            base: CredentialEntity {
                home_account_id: home_account_id.into(),
                environment: environment.into(),
                credential_type: CredentialType::IdToken,
                client_id: client_id.into(),
                secret: Secret::new(id_token),
                realm: realm.into(),
                target: None,
                family_id: None,
                obo_assertion,
            },
        }
    }
}

/// A cached access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenEntity {
    #[serde(flatten)]
    pub base: CredentialEntity,
    pub cached_at: i64,
    pub expires_on: i64,
    pub extended_expires_on: i64,
    pub token_type: String,
}

credential_deref!(AccessTokenEntity);

impl AccessTokenEntity {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        home_account_id: impl Into<String>,
        environment: impl Into<String>,
        access_token: impl Into<String>,
        client_id: impl Into<String>,
        realm: impl Into<String>,
        scopes: impl Into<String>,
        cached_at: i64,
        expires_on: i64,
        extended_expires_on: i64,
        token_type: Option<String>,
        obo_assertion: Option<String>,
    ) -> Self {
        Self {
            base: CredentialEntity {
                home_account_id: home_account_id.into(),
                environment: environment.into(),
                credential_type: CredentialType::AccessToken,
                client_id: client_id.into(),
                secret: Secret::new(access_token),
                realm: realm.into(),
                target: Some(scopes.into()),
                family_id: None,
                obo_assertion,
            },
            cached_at,
            expires_on,
            extended_expires_on,
            token_type: token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Bearer".to_string()),
        }
    }

    /// Check expiry against the renewal offset.
    pub fn is_expired(&self, offset_seconds: i64, now: i64) -> bool {
        is_token_expired(self.expires_on, offset_seconds, now)
    }
}

/// A cached refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenEntity {
    #[serde(flatten)]
    pub base: CredentialEntity,
}

credential_deref!(RefreshTokenEntity);

impl RefreshTokenEntity {
    pub fn new(
        home_account_id: impl Into<String>,
        environment: impl Into<String>,
        refresh_token: impl Into<String>,
        client_id: impl Into<String>,
        family_id: Option<String>,
        obo_assertion: Option<String>,
    ) -> Self {
        Self {
            base: CredentialEntity {
                home_account_id: home_account_id.into(),
                environment: environment.into(),
                credential_type: CredentialType::RefreshToken,
                client_id: client_id.into(),
                secret: Secret::new(refresh_token),
                realm: String::new(),
                target: None,
                family_id: family_id.filter(|f| !f.is_empty()),
                obo_assertion,
            },
        }
    }
}

/// Per-application metadata, used to detect FOCI membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppMetadataEntity {
    pub client_id: String,
    pub environment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_id: Option<String>,
}

impl AppMetadataEntity {
    /// `appmetadata-environment-clientId`
    pub fn cache_key(&self) -> String {
        join_key(&[APP_METADATA_PREFIX, &self.environment, &self.client_id])
    }

    pub fn is_foci(&self) -> bool {
        self.family_id.as_deref() == Some(THE_FAMILY_ID)
    }
}

/// Identifies a token request for throttling purposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestThumbprint {
    pub client_id: String,
    pub authority: String,
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_account_identifier: Option<String>,
}

impl RequestThumbprint {
    /// `throttling.<JSON(thumbprint)>`
    pub fn cache_key(&self) -> String {
        // Serializing a plain struct of strings cannot fail
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("{}.{}", THROTTLING_PREFIX, json)
    }
}

/// A recorded throttle for a request thumbprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottlingEntity {
    /// Unix time in milliseconds until which the request is throttled.
    pub throttle_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_codes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_error: Option<String>,
}

/// Accumulated telemetry waiting to be sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTelemetryEntity {
    /// Flattened `apiId, correlationId` pairs, oldest first.
    pub failed_requests: Vec<String>,
    /// Error codes, one per failed request.
    pub errors: Vec<String>,
    pub cache_hits: u32,
}

impl ServerTelemetryEntity {
    /// `server-telemetry-clientId`
    pub fn cache_key(client_id: &str) -> String {
        join_key(&[SERVER_TELEMETRY_PREFIX, client_id])
    }
}

/// A discovery document cached per client and authority host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityMetadataEntity {
    pub aliases: Vec<String>,
    pub preferred_cache: String,
    pub preferred_network: String,
    pub canonical_authority: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_code_endpoint: Option<String>,
    pub issuer: String,
    pub expires_at: i64,
}

impl AuthorityMetadataEntity {
    /// `authority-metadata-clientId-host`
    pub fn cache_key(client_id: &str, host: &str) -> String {
        join_key(&[AUTHORITY_METADATA_PREFIX, client_id, host])
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// The set of entities produced by one token response, written together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheRecord {
    pub account: Option<AccountEntity>,
    pub id_token: Option<IdTokenEntity>,
    pub access_token: Option<AccessTokenEntity>,
    pub refresh_token: Option<RefreshTokenEntity>,
    pub app_metadata: Option<AppMetadataEntity>,
}
