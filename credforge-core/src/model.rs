//! Domain model types shared across the engine.
//!
//! - [`CredentialType`] - Kind of cached credential
//! - [`AccountAuthorityType`] - Which kind of authority issued an account
//! - [`AccountInfo`] - The caller-facing view of a cached account

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::token::IdTokenClaims;

/// Joiner used by every cache key.
pub const CACHE_KEY_SEPARATOR: &str = "-";

/// Family id shared by first-party applications (FOCI).
pub const THE_FAMILY_ID: &str = "1";

/// Type of credential stored in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialType {
    IdToken,
    AccessToken,
    RefreshToken,
}

impl CredentialType {
    /// Name as stored on the entity.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IdToken => "IdToken",
            Self::AccessToken => "AccessToken",
            Self::RefreshToken => "RefreshToken",
        }
    }

    /// Lower-cased name, as it appears inside cache keys.
    pub fn key_fragment(&self) -> &'static str {
        match self {
            Self::IdToken => "idtoken",
            Self::AccessToken => "accesstoken",
            Self::RefreshToken => "refreshtoken",
        }
    }

    /// Classify a cache key by the credential type it contains.
    pub fn from_cache_key(key: &str) -> Option<Self> {
        let key = key.to_lowercase();
        [Self::AccessToken, Self::RefreshToken, Self::IdToken]
            .into_iter()
            .find(|t| key.contains(t.key_fragment()))
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of authority that issued an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountAuthorityType {
    #[serde(rename = "MSSTS")]
    Mssts,
    #[serde(rename = "ADFS")]
    Adfs,
    #[serde(rename = "MSA")]
    Msa,
    Generic,
}

impl AccountAuthorityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mssts => "MSSTS",
            Self::Adfs => "ADFS",
            Self::Msa => "MSA",
            Self::Generic => "Generic",
        }
    }
}

/// Caller-facing view of an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub home_account_id: String,
    pub environment: String,
    pub tenant_id: String,
    pub username: String,
    pub local_account_id: String,
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token_claims: Option<IdTokenClaims>,
}

impl AccountInfo {
    /// Cache key of the account entity this info was built from.
    pub fn cache_key(&self) -> String {
        [
            self.home_account_id.as_str(),
            self.environment.as_str(),
            self.tenant_id.as_str(),
        ]
        .join(CACHE_KEY_SEPARATOR)
        .to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_type_from_key() {
        assert_eq!(
            CredentialType::from_cache_key("uid.utid-login.windows.net-accesstoken-app-tenant-user.read"),
            Some(CredentialType::AccessToken)
        );
        assert_eq!(
            CredentialType::from_cache_key("uid.utid-login.windows.net-refreshtoken-1-"),
            Some(CredentialType::RefreshToken)
        );
        assert_eq!(
            CredentialType::from_cache_key("uid.utid-login.windows.net-IdToken-app-tenant-"),
            Some(CredentialType::IdToken)
        );
        assert_eq!(
            CredentialType::from_cache_key("appmetadata-login.windows.net-app"),
            None
        );
    }

    #[test]
    fn test_account_authority_type_serialization() {
        assert_eq!(
            serde_json::to_string(&AccountAuthorityType::Mssts).unwrap(),
            "\"MSSTS\""
        );
        let parsed: AccountAuthorityType = serde_json::from_str("\"ADFS\"").unwrap();
        assert_eq!(parsed, AccountAuthorityType::Adfs);
    }

    #[test]
    fn test_account_info_cache_key_is_lower_cased() {
        let info = AccountInfo {
            home_account_id: "UID.UTID".to_string(),
            environment: "Login.Windows.Net".to_string(),
            tenant_id: "Contoso".to_string(),
            username: "user@contoso.com".to_string(),
            local_account_id: "uid".to_string(),
            name: None,
            id_token_claims: None,
        };
        assert_eq!(info.cache_key(), "uid.utid-login.windows.net-contoso");
    }
}
