//! Client configuration.
//!
//! Every section is `serde`-deserializable and falls back to its defaults
//! when omitted, so a configuration file only needs a `client_id`.
//!
//! # Example
//!
//! ```toml
//! [auth]
//! client_id = "00000000-0000-0000-0000-000000000000"
//! authority = "https://login.microsoftonline.com/contoso"
//!
//! [system]
//! token_renewal_offset_seconds = 600
//! ```

use serde::{Deserialize, Serialize};

use crate::authority::DEFAULT_AUTHORITY;
use crate::error::ConfigurationError;
use crate::store::Secret;
use crate::token::DEFAULT_TOKEN_RENEWAL_OFFSET_SECONDS;

pub const DEFAULT_SKU: &str = "credforge.rust";

/// Complete configuration of a client application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfiguration {
    pub auth: AuthOptions,
    pub system: SystemOptions,
    pub library: LibraryInfo,
    pub telemetry: TelemetryOptions,
    pub credentials: ClientCredentials,
}

impl ClientConfiguration {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            auth: AuthOptions {
                client_id: client_id.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.auth.authority = authority.into();
        self
    }

    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.auth.redirect_uri = Some(redirect_uri.into());
        self
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.credentials.client_secret = Some(Secret::new(secret));
        self
    }

    pub fn with_client_assertion(mut self, assertion: impl Into<String>) -> Self {
        self.credentials.client_assertion = Some(Secret::new(assertion));
        self
    }

    pub fn with_known_authorities(mut self, authorities: Vec<String>) -> Self {
        self.auth.known_authorities = authorities;
        self
    }

    pub fn with_authority_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.auth.authority_metadata = Some(metadata.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.auth.client_id.trim().is_empty() {
            return Err(ConfigurationError::MissingClientId);
        }
        Ok(())
    }

    /// Returns true if a client secret or assertion is configured.
    pub fn is_confidential(&self) -> bool {
        self.credentials.client_secret.is_some() || self.credentials.client_assertion.is_some()
    }
}

/// Application identity and authority settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthOptions {
    pub client_id: String,
    pub authority: String,
    /// Hosts trusted without instance discovery.
    pub known_authorities: Vec<String>,
    /// Cloud discovery document, as returned by the instance discovery endpoint.
    pub cloud_discovery_metadata: Option<String>,
    /// OpenID configuration document for the authority; skips discovery.
    pub authority_metadata: Option<String>,
    /// Ask the network which hosts are trusted when none are configured.
    pub instance_discovery: bool,
    /// Capabilities advertised to the server through the `xms_cc` claim.
    pub client_capabilities: Vec<String>,
    pub redirect_uri: Option<String>,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            authority: DEFAULT_AUTHORITY.to_string(),
            known_authorities: Vec::new(),
            cloud_discovery_metadata: None,
            authority_metadata: None,
            instance_discovery: false,
            client_capabilities: Vec::new(),
            redirect_uri: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemOptions {
    /// Seconds before expiry at which cached access tokens are refreshed.
    pub token_renewal_offset_seconds: i64,
}

impl Default for SystemOptions {
    fn default() -> Self {
        Self {
            token_renewal_offset_seconds: DEFAULT_TOKEN_RENEWAL_OFFSET_SECONDS,
        }
    }
}

/// Values sent in the `x-client-*` headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryInfo {
    pub sku: String,
    pub version: String,
    pub os: String,
    pub cpu: String,
}

impl Default for LibraryInfo {
    fn default() -> Self {
        Self {
            sku: DEFAULT_SKU.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            cpu: std::env::consts::ARCH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryOptions {
    /// Send `x-client-current-telemetry` and `x-client-last-telemetry`.
    pub server_telemetry: bool,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            server_telemetry: true,
        }
    }
}

/// Credentials of a confidential client.
///
/// Client assertions are passed pre-signed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientCredentials {
    #[serde(skip_serializing)]
    pub client_secret: Option<Secret>,
    #[serde(skip_serializing)]
    pub client_assertion: Option<Secret>,
}
