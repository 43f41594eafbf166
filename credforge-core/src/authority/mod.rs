//! Authority validation and endpoint discovery.
//!
//! An [`Authority`] starts unresolved. [`Authority::resolve_endpoints`]
//! checks the host against the [`TrustedHostRegistry`], then loads the
//! endpoints from the cache, a configured metadata document, local ADFS
//! paths or the network, in that order. Endpoint accessors fail until
//! resolution succeeds.

use parking_lot::RwLock;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

mod registry;

pub use registry::{CloudDiscoveryDocument, CloudInstanceMetadata, TrustedHostRegistry};

use crate::cache::CacheManager;
use crate::cache::entities::{AUTHORITY_METADATA_REFRESH_SECONDS, AuthorityMetadataEntity};
use crate::error::{AuthError, ClientAuthError, ConfigurationError};
use crate::network::{NetworkModule, RequestOptions};
use crate::token::now_seconds;

pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com/common";

/// Host used for network instance discovery.
pub const DEFAULT_AUTHORITY_HOST: &str = "login.microsoftonline.com";

const TENANT_PLACEHOLDER: &str = "{tenant}";
const TENANT_ID_PLACEHOLDER: &str = "{tenantid}";
const ADFS_PATH_SEGMENT: &str = "adfs";

/// Kind of authority, decided from its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityType {
    /// AAD or any OIDC-compliant issuer.
    Default,
    Adfs,
}

/// Endpoints known after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityEndpoints {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub end_session_endpoint: Option<String>,
    pub device_code_endpoint: String,
    pub issuer: String,
}

/// The fields of an OpenID configuration document the engine uses.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenIdConfiguration {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
    #[serde(default)]
    pub device_authorization_endpoint: Option<String>,
    pub issuer: String,
}

#[derive(Debug, Clone)]
struct ResolvedAuthority {
    canonical_authority: String,
    preferred_cache: String,
    endpoints: AuthorityEndpoints,
}

#[derive(Debug, Clone)]
enum ResolutionState {
    Unresolved,
    Discovering,
    Resolved(ResolvedAuthority),
    Failed(String),
}

/// A validated authority URL and its discovered endpoints.
#[derive(Debug)]
pub struct Authority {
    canonical_authority: String,
    host: String,
    tenant: String,
    authority_type: AuthorityType,
    registry: Arc<TrustedHostRegistry>,
    instance_discovery: bool,
    metadata_document: Option<String>,
    state: RwLock<ResolutionState>,
}

impl Authority {
    /// Validate an authority URL.
    ///
    /// The URL must use https and have at least one path segment (the
    /// tenant). The canonical form always ends with `/`.
    pub fn new(
        authority: &str,
        registry: Arc<TrustedHostRegistry>,
    ) -> Result<Self, ConfigurationError> {
        let invalid = |message: &str| ConfigurationError::InvalidAuthority {
            authority: authority.to_string(),
            message: message.to_string(),
        };

        let mut url = Url::parse(authority.trim()).map_err(|e| invalid(&e.to_string()))?;
        if url.scheme() != "https" {
            return Err(ConfigurationError::InsecureAuthority {
                authority: authority.to_string(),
            });
        }
        let host = url
            .host_str()
            .map(str::to_lowercase)
            .ok_or_else(|| invalid("authority has no host"))?;

        url.set_query(None);
        url.set_fragment(None);
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        let tenant = url
            .path_segments()
            .and_then(|mut segments| segments.find(|s| !s.is_empty()))
            .map(str::to_string)
            .ok_or_else(|| invalid("authority must contain a tenant path segment"))?;

        let authority_type = if tenant.eq_ignore_ascii_case(ADFS_PATH_SEGMENT) {
            AuthorityType::Adfs
        } else {
            AuthorityType::Default
        };

        Ok(Self {
            canonical_authority: url.to_string().to_lowercase(),
            host,
            tenant,
            authority_type,
            registry,
            instance_discovery: false,
            metadata_document: None,
            state: RwLock::new(ResolutionState::Unresolved),
        })
    }

    /// Enable network instance discovery when the registry is empty.
    pub fn with_instance_discovery(mut self, enabled: bool) -> Self {
        self.instance_discovery = enabled;
        self
    }

    /// Use an OpenID configuration document instead of fetching one.
    pub fn with_metadata_document(mut self, document: Option<String>) -> Self {
        self.metadata_document = document;
        self
    }

    /// Canonical authority, rewritten to the preferred network host once
    /// resolved.
    pub fn canonical_authority(&self) -> String {
        match &*self.state.read() {
            ResolutionState::Resolved(resolved) => resolved.canonical_authority.clone(),
            _ => self.canonical_authority.clone(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn authority_type(&self) -> AuthorityType {
        self.authority_type
    }

    pub fn registry(&self) -> &Arc<TrustedHostRegistry> {
        &self.registry
    }

    pub fn is_resolved(&self) -> bool {
        matches!(&*self.state.read(), ResolutionState::Resolved(_))
    }

    /// Discovery document URL.
    pub fn openid_configuration_endpoint(&self) -> String {
        format!(
            "{}v2.0/.well-known/openid-configuration",
            self.canonical_authority()
        )
    }

    fn resolved(&self) -> Result<ResolvedAuthority, ClientAuthError> {
        match &*self.state.read() {
            ResolutionState::Resolved(resolved) => Ok(resolved.clone()),
            ResolutionState::Unresolved | ResolutionState::Discovering => {
                Err(ClientAuthError::EndpointResolution {
                    message: format!("endpoints of {} are not resolved", self.canonical_authority),
                })
            }
            ResolutionState::Failed(message) => Err(ClientAuthError::EndpointResolution {
                message: message.clone(),
            }),
        }
    }

    pub fn endpoints(&self) -> Result<AuthorityEndpoints, ClientAuthError> {
        Ok(self.resolved()?.endpoints)
    }

    pub fn authorization_endpoint(&self) -> Result<String, ClientAuthError> {
        Ok(self.resolved()?.endpoints.authorization_endpoint)
    }

    pub fn token_endpoint(&self) -> Result<String, ClientAuthError> {
        Ok(self.resolved()?.endpoints.token_endpoint)
    }

    pub fn end_session_endpoint(&self) -> Result<Option<String>, ClientAuthError> {
        Ok(self.resolved()?.endpoints.end_session_endpoint)
    }

    pub fn device_code_endpoint(&self) -> Result<String, ClientAuthError> {
        Ok(self.resolved()?.endpoints.device_code_endpoint)
    }

    pub fn issuer(&self) -> Result<String, ClientAuthError> {
        Ok(self.resolved()?.endpoints.issuer)
    }

    /// Host written as the environment of cache entities.
    pub fn preferred_cache(&self) -> Result<String, ClientAuthError> {
        Ok(self.resolved()?.preferred_cache)
    }

    /// Resolve endpoints once. Later calls return immediately.
    pub async fn resolve_endpoints(
        &self,
        network: &dyn NetworkModule,
        cache: &CacheManager,
        client_id: &str,
    ) -> Result<(), AuthError> {
        {
            let mut state = self.state.write();
            if matches!(&*state, ResolutionState::Resolved(_)) {
                return Ok(());
            }
            *state = ResolutionState::Discovering;
        }

        match self.discover(network, cache, client_id).await {
            Ok(resolved) => {
                info!(
                    authority = %resolved.canonical_authority,
                    token_endpoint = %resolved.endpoints.token_endpoint,
                    "Resolved authority endpoints"
                );
                *self.state.write() = ResolutionState::Resolved(resolved);
                Ok(())
            }
            Err(e) => {
                warn!(authority = %self.canonical_authority, error = %e, "Authority resolution failed");
                *self.state.write() = ResolutionState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    async fn discover(
        &self,
        network: &dyn NetworkModule,
        cache: &CacheManager,
        client_id: &str,
    ) -> Result<ResolvedAuthority, AuthError> {
        let group = self.trusted_group(network).await?;

        let canonical_authority = if group.preferred_network != self.host {
            debug!(preferred_network = %group.preferred_network, "Using preferred network host");
            self.canonical_authority
                .replacen(&self.host, &group.preferred_network, 1)
        } else {
            self.canonical_authority.clone()
        };

        let metadata_key = AuthorityMetadataEntity::cache_key(client_id, &self.host);
        if let Some(cached) = cache.get_authority_metadata(&metadata_key).await? {
            if !cached.is_expired(now_seconds()) && cached.canonical_authority == canonical_authority
            {
                debug!("Using cached authority metadata");
                return Ok(ResolvedAuthority {
                    canonical_authority,
                    preferred_cache: cached.preferred_cache,
                    endpoints: AuthorityEndpoints {
                        authorization_endpoint: cached.authorization_endpoint,
                        token_endpoint: cached.token_endpoint,
                        end_session_endpoint: cached.end_session_endpoint,
                        device_code_endpoint: cached
                            .device_code_endpoint
                            .unwrap_or_default(),
                        issuer: cached.issuer,
                    },
                });
            }
        }

        let configuration = match (&self.metadata_document, self.authority_type) {
            (Some(document), _) => serde_json::from_str::<OpenIdConfiguration>(document).map_err(
                |e| ClientAuthError::EndpointResolution {
                    message: format!("configured authority metadata is invalid: {}", e),
                },
            )?,
            (None, AuthorityType::Adfs) => adfs_configuration(&canonical_authority),
            (None, AuthorityType::Default) => {
                let endpoint = format!(
                    "{}v2.0/.well-known/openid-configuration",
                    canonical_authority
                );
                fetch_openid_configuration(network, &endpoint).await?
            }
        };

        let endpoints = self.endpoints_from(configuration);

        let entity = AuthorityMetadataEntity {
            aliases: group.aliases.clone(),
            preferred_cache: group.preferred_cache.clone(),
            preferred_network: group.preferred_network.clone(),
            canonical_authority: canonical_authority.clone(),
            authorization_endpoint: endpoints.authorization_endpoint.clone(),
            token_endpoint: endpoints.token_endpoint.clone(),
            end_session_endpoint: endpoints.end_session_endpoint.clone(),
            device_code_endpoint: Some(endpoints.device_code_endpoint.clone()),
            issuer: endpoints.issuer.clone(),
            expires_at: now_seconds() + AUTHORITY_METADATA_REFRESH_SECONDS,
        };
        cache.set_authority_metadata(&metadata_key, &entity).await?;

        Ok(ResolvedAuthority {
            canonical_authority,
            preferred_cache: group.preferred_cache,
            endpoints,
        })
    }

    async fn trusted_group(
        &self,
        network: &dyn NetworkModule,
    ) -> Result<CloudInstanceMetadata, AuthError> {
        if self.registry.is_empty()
            && self.instance_discovery
            && self.authority_type == AuthorityType::Default
        {
            match self.fetch_instance_metadata(network).await {
                Ok(document) => self.registry.register_document(document),
                Err(e) => warn!(error = %e, "Instance discovery failed, trusting authority host"),
            }
        }

        if self.registry.is_empty() {
            self.registry.register_host(&self.host);
        }

        self.registry.metadata_for(&self.host).ok_or_else(|| {
            ClientAuthError::UntrustedAuthority {
                host: self.host.clone(),
            }
            .into()
        })
    }

    async fn fetch_instance_metadata(
        &self,
        network: &dyn NetworkModule,
    ) -> Result<CloudDiscoveryDocument, ClientAuthError> {
        let mut url = Url::parse(&format!(
            "https://{}/common/discovery/instance",
            DEFAULT_AUTHORITY_HOST
        ))
        .map_err(|e| ClientAuthError::EndpointResolution {
            message: e.to_string(),
        })?;
        url.query_pairs_mut()
            .append_pair("api-version", "1.1")
            .append_pair(
                "authorization_endpoint",
                &format!("{}oauth2/v2.0/authorize", self.canonical_authority),
            );

        let response = network
            .send_get_request(url.as_str(), &RequestOptions::new())
            .await?;
        if !response.is_success() {
            return Err(ClientAuthError::EndpointResolution {
                message: format!("instance discovery returned status {}", response.status),
            });
        }
        serde_json::from_value(response.body).map_err(|e| ClientAuthError::EndpointResolution {
            message: format!("instance discovery response is invalid: {}", e),
        })
    }

    fn endpoints_from(&self, configuration: OpenIdConfiguration) -> AuthorityEndpoints {
        let token_endpoint = self.replace_tenant(&configuration.token_endpoint);
        let device_code_endpoint = configuration
            .device_authorization_endpoint
            .map(|e| self.replace_tenant(&e))
            .unwrap_or_else(|| derive_device_code_endpoint(&token_endpoint));

        AuthorityEndpoints {
            authorization_endpoint: self.replace_tenant(&configuration.authorization_endpoint),
            token_endpoint,
            end_session_endpoint: configuration
                .end_session_endpoint
                .map(|e| self.replace_tenant(&e)),
            device_code_endpoint,
            issuer: self.replace_tenant(&configuration.issuer),
        }
    }

    fn replace_tenant(&self, value: &str) -> String {
        value
            .replace(TENANT_PLACEHOLDER, &self.tenant)
            .replace(TENANT_ID_PLACEHOLDER, &self.tenant)
    }
}

async fn fetch_openid_configuration(
    network: &dyn NetworkModule,
    endpoint: &str,
) -> Result<OpenIdConfiguration, ClientAuthError> {
    debug!(endpoint = %endpoint, "Fetching OpenID configuration");
    let response = network
        .send_get_request(endpoint, &RequestOptions::new())
        .await?;
    if !response.is_success() {
        return Err(ClientAuthError::EndpointResolution {
            message: format!("{} returned status {}", endpoint, response.status),
        });
    }
    serde_json::from_value(response.body).map_err(|e| ClientAuthError::EndpointResolution {
        message: format!("OpenID configuration from {} is invalid: {}", endpoint, e),
    })
}

fn adfs_configuration(canonical_authority: &str) -> OpenIdConfiguration {
    OpenIdConfiguration {
        authorization_endpoint: format!("{}oauth2/authorize/", canonical_authority),
        token_endpoint: format!("{}oauth2/token/", canonical_authority),
        end_session_endpoint: Some(format!("{}oauth2/logout/", canonical_authority)),
        device_authorization_endpoint: None,
        issuer: canonical_authority.to_string(),
    }
}

/// Token endpoint with its trailing `/token` replaced by `/devicecode`.
fn derive_device_code_endpoint(token_endpoint: &str) -> String {
    let trimmed = token_endpoint.trim_end_matches('/');
    match trimmed.strip_suffix("/token") {
        Some(base) => format!("{}/devicecode", base),
        None => format!("{}/devicecode", trimmed),
    }
}
