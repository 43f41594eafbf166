//! Trusted authority hosts and their alias groups.
//!
//! A [`TrustedHostRegistry`] is owned by a client context and shared with its
//! cache manager. It is populated once at construction from known
//! authorities, a cloud discovery metadata document, or the network instance
//! discovery endpoint.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ConfigurationError;

/// One alias group of the cloud discovery document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudInstanceMetadata {
    pub preferred_network: String,
    pub preferred_cache: String,
    pub aliases: Vec<String>,
}

impl CloudInstanceMetadata {
    /// A group containing only `host`.
    pub fn single_host(host: &str) -> Self {
        let host = host.to_lowercase();
        Self {
            preferred_network: host.clone(),
            preferred_cache: host.clone(),
            aliases: vec![host],
        }
    }
}

/// Body of the instance discovery response, or of a configured
/// `cloud_discovery_metadata` string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloudDiscoveryDocument {
    #[serde(default)]
    pub tenant_discovery_endpoint: Option<String>,
    #[serde(default)]
    pub metadata: Vec<CloudInstanceMetadata>,
}

/// Registry of trusted authority hosts.
///
/// Hosts are stored lower-cased; every alias of a group maps to the group.
#[derive(Debug, Default)]
pub struct TrustedHostRegistry {
    hosts: RwLock<HashMap<String, CloudInstanceMetadata>>,
}

impl TrustedHostRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configuration.
    ///
    /// Known authorities may be full URLs or bare hosts. Each becomes its own
    /// single-host group; the discovery document, when present, adds its
    /// alias groups on top.
    pub fn from_config(
        known_authorities: &[String],
        cloud_discovery_metadata: Option<&str>,
    ) -> Result<Self, ConfigurationError> {
        let registry = Self::new();

        for authority in known_authorities {
            let host = host_of(authority).ok_or_else(|| ConfigurationError::InvalidAuthority {
                authority: authority.clone(),
                message: "known authority has no host".to_string(),
            })?;
            registry.register_host(&host);
        }

        if let Some(document) = cloud_discovery_metadata {
            registry.register_metadata_document(document)?;
        }

        Ok(registry)
    }

    /// Parse and register a cloud discovery metadata JSON document.
    pub fn register_metadata_document(&self, document: &str) -> Result<(), ConfigurationError> {
        let parsed: CloudDiscoveryDocument = serde_json::from_str(document).map_err(|e| {
            ConfigurationError::InvalidCloudDiscoveryMetadata {
                message: e.to_string(),
            }
        })?;
        self.register_document(parsed);
        Ok(())
    }

    pub fn register_document(&self, document: CloudDiscoveryDocument) {
        for group in document.metadata {
            self.register_group(group);
        }
    }

    /// Register an alias group. Each alias replaces any earlier mapping.
    pub fn register_group(&self, group: CloudInstanceMetadata) {
        let group = CloudInstanceMetadata {
            preferred_network: group.preferred_network.to_lowercase(),
            preferred_cache: group.preferred_cache.to_lowercase(),
            aliases: group.aliases.iter().map(|a| a.to_lowercase()).collect(),
        };
        let mut hosts = self.hosts.write();
        for alias in &group.aliases {
            hosts.insert(alias.clone(), group.clone());
        }
    }

    /// Register a single host as its own alias group.
    pub fn register_host(&self, host: &str) {
        self.register_group(CloudInstanceMetadata::single_host(host));
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.hosts.read().len()
    }

    /// Returns true if the host is trusted.
    pub fn contains(&self, host: &str) -> bool {
        self.hosts.read().contains_key(&host.to_lowercase())
    }

    /// Alias group of a host.
    pub fn metadata_for(&self, host: &str) -> Option<CloudInstanceMetadata> {
        self.hosts.read().get(&host.to_lowercase()).cloned()
    }

    /// Aliases of a host, including the host itself.
    pub fn aliases(&self, host: &str) -> Option<Vec<String>> {
        self.metadata_for(host).map(|group| group.aliases)
    }

    /// Returns true if `environment` matches `host` directly or through an
    /// alias group.
    pub fn matches_environment(&self, host: &str, environment: &str) -> bool {
        match self.aliases(host) {
            Some(aliases) => aliases.iter().any(|a| a.eq_ignore_ascii_case(environment)),
            None => host.eq_ignore_ascii_case(environment),
        }
    }

    /// All trusted hosts.
    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.hosts.read().keys().cloned().collect();
        hosts.sort();
        hosts
    }
}

/// Lower-cased host of a URL, or the input itself when it is a bare host.
pub(crate) fn host_of(authority: &str) -> Option<String> {
    let trimmed = authority.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains("://") {
        url::Url::parse(trimmed)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
    } else {
        trimmed
            .split('/')
            .next()
            .filter(|h| !h.is_empty())
            .map(str::to_lowercase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISCOVERY: &str = r#"{
        "tenant_discovery_endpoint": "https://login.microsoftonline.com/common/v2.0/.well-known/openid-configuration",
        "metadata": [
            {
                "preferred_network": "login.microsoftonline.com",
                "preferred_cache": "login.windows.net",
                "aliases": ["login.microsoftonline.com", "login.windows.net", "sts.windows.net"]
            }
        ]
    }"#;

    #[test]
    fn test_registry_new_is_empty() {
        let registry = TrustedHostRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_known_authorities() {
        let registry = TrustedHostRegistry::from_config(
            &[
                "https://Contoso.b2clogin.com/contoso.onmicrosoft.com/".to_string(),
                "fabrikam.example".to_string(),
            ],
            None,
        )
        .unwrap();

        assert!(registry.contains("contoso.b2clogin.com"));
        assert!(registry.contains("FABRIKAM.example"));
        assert_eq!(registry.hosts(), vec!["contoso.b2clogin.com", "fabrikam.example"]);
    }

    #[test]
    fn test_discovery_document_registers_aliases() {
        let registry = TrustedHostRegistry::from_config(&[], Some(DISCOVERY)).unwrap();

        assert_eq!(registry.len(), 3);
        let group = registry.metadata_for("sts.windows.net").unwrap();
        assert_eq!(group.preferred_cache, "login.windows.net");
        assert_eq!(group.preferred_network, "login.microsoftonline.com");
    }

    #[test]
    fn test_invalid_discovery_document() {
        let err = TrustedHostRegistry::from_config(&[], Some("{not json")).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidCloudDiscoveryMetadata { .. }));
    }

    #[test]
    fn test_matches_environment() {
        let registry = TrustedHostRegistry::from_config(&[], Some(DISCOVERY)).unwrap();

        assert!(registry.matches_environment("login.microsoftonline.com", "login.windows.net"));
        assert!(!registry.matches_environment("login.microsoftonline.com", "login.chinacloudapi.cn"));

        // Unknown hosts fall back to literal comparison
        assert!(registry.matches_environment("Other.Example", "other.example"));
        assert!(!registry.matches_environment("other.example", "login.windows.net"));
    }

    #[test]
    fn test_register_host_replaces_mapping() {
        let registry = TrustedHostRegistry::new();
        registry.register_host("login.example");
        registry.register_group(CloudInstanceMetadata {
            preferred_network: "login.example".to_string(),
            preferred_cache: "cache.example".to_string(),
            aliases: vec!["login.example".to_string(), "cache.example".to_string()],
        });

        assert_eq!(
            registry.metadata_for("login.example").unwrap().preferred_cache,
            "cache.example"
        );
    }
}
