//! Token parsing and expiry helpers.
//!
//! This module provides:
//! - [`IdTokenClaims`] / [`AuthToken`] - Decoded ID token payloads
//! - [`ClientInfo`] - The `client_info` blob returned by the token endpoint
//! - [`is_token_expired`] - The renewal-offset expiry check

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::crypto::CryptoProvider;
use crate::error::ClientAuthError;

/// Default number of seconds before expiry at which a token is renewed.
pub const DEFAULT_TOKEN_RENEWAL_OFFSET_SECONDS: i64 = 300;

/// Current unix time in seconds.
pub fn now_seconds() -> i64 {
    Utc::now().timestamp()
}

/// Current unix time in milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Check if a token expiring at `expires_on` must be renewed at `now`.
///
/// A token is treated as expired once `now + offset` reaches its expiry, so a
/// token expiring exactly at the offset boundary is renewed.
pub fn is_token_expired(expires_on: i64, offset_seconds: i64, now: i64) -> bool {
    now + offset_seconds >= expires_on
}

/// Claims read from an ID token payload.
///
/// The signature is not checked; claims are only used to shape cache
/// entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emails: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
}

impl IdTokenClaims {
    /// `oid`, falling back to `sub`.
    pub fn local_account_id(&self) -> Option<&str> {
        self.oid.as_deref().or(self.sub.as_deref())
    }

    /// First available of `preferred_username`, `upn` and the first email.
    pub fn username(&self) -> Option<&str> {
        self.preferred_username
            .as_deref()
            .or(self.upn.as_deref())
            .or_else(|| self.emails.as_ref().and_then(|e| e.first().map(String::as_str)))
    }
}

/// A raw ID token together with its decoded claims.
#[derive(Debug, Clone)]
pub struct AuthToken {
    pub raw_token: String,
    pub claims: IdTokenClaims,
}

impl AuthToken {
    /// Decode a compact JWT.
    pub fn parse(raw_token: &str, crypto: &dyn CryptoProvider) -> Result<Self, ClientAuthError> {
        let mut parts = raw_token.split('.');
        let payload = match (parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(payload), Some(_)) if !payload.is_empty() => payload,
            _ => {
                return Err(ClientAuthError::TokenParsing {
                    message: "id token is not a compact JWT".to_string(),
                });
            }
        };

        let json = crypto.base64_decode(payload)?;
        let claims = serde_json::from_str(&json).map_err(|e| ClientAuthError::TokenParsing {
            message: format!("id token payload is not valid JSON: {}", e),
        })?;

        Ok(Self {
            raw_token: raw_token.to_string(),
            claims,
        })
    }
}

/// Decoded `client_info`: the user's object id and home tenant id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientInfo {
    pub uid: String,
    pub utid: String,
}

impl ClientInfo {
    pub fn decode(raw: &str, crypto: &dyn CryptoProvider) -> Result<Self, ClientAuthError> {
        if raw.is_empty() {
            return Err(ClientAuthError::ClientInfoDecoding {
                message: "client_info is empty".to_string(),
            });
        }
        let json = crypto
            .base64_decode(raw)
            .map_err(|e| ClientAuthError::ClientInfoDecoding {
                message: e.to_string(),
            })?;
        serde_json::from_str(&json).map_err(|e| ClientAuthError::ClientInfoDecoding {
            message: e.to_string(),
        })
    }

    /// `uid.utid`, the home account identifier.
    pub fn home_account_id(&self) -> String {
        format!("{}.{}", self.uid, self.utid)
    }
}
