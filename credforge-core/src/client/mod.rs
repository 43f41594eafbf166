//! Protocol clients, one per grant.
//!
//! Every client wraps a [`BaseClient`], which owns the pieces shared by all
//! grants: configuration, the resolved authority, the cache, the throttled
//! network manager and the crypto provider. Cloning a client is cheap.
//!
//! A token request goes through the same steps for every grant: build the
//! form body, check the throttle, POST to the token endpoint, record the
//! throttle outcome, then hand the response to the
//! [`ResponseHandler`](crate::response::ResponseHandler).

use std::sync::Arc;
use tracing::{debug, warn};

use crate::authority::{Authority, TrustedHostRegistry};
use crate::cache::{CacheManager, RequestThumbprint};
use crate::config::ClientConfiguration;
use crate::crypto::{CryptoProvider, DefaultCrypto};
use crate::error::{AuthError, ConfigurationError};
use crate::network::throttling::{THROTTLING_HEADER_NAME, THROTTLING_HEADER_VALUE};
use crate::network::{
    NetworkManager, NetworkModule, NetworkResponse, RequestOptions,
    ReqwestNetworkModule, ThrottlingUtils,
};
use crate::request::RequestParameterBuilder;
use crate::response::ResponseHandler;
use crate::scope::ScopeSet;
use crate::store::CacheStorage;
use crate::telemetry::{
    ApiId, CURRENT_TELEMETRY_HEADER, LAST_TELEMETRY_HEADER, ServerTelemetryManager,
};

mod authorization_code;
mod client_credential;
mod device_code;
mod on_behalf_of;
mod refresh_token;
mod silent_flow;

pub use authorization_code::{AuthorizationCodeClient, AuthorizationUrl};
pub use client_credential::ClientCredentialClient;
pub use device_code::{DeviceCodeClient, DeviceCodeResponse};
pub use on_behalf_of::OnBehalfOfClient;
pub use refresh_token::RefreshTokenClient;
pub use silent_flow::SilentFlowClient;

/// Shared state of every protocol client.
#[derive(Clone)]
pub struct BaseClient {
    config: Arc<ClientConfiguration>,
    authority: Arc<Authority>,
    cache: CacheManager,
    network: NetworkManager,
    crypto: Arc<dyn CryptoProvider>,
}

impl BaseClient {
    /// Build a client context from its collaborators.
    ///
    /// The trusted-host registry is populated here, once, from the
    /// configured known authorities and cloud discovery metadata.
    pub fn new(
        config: ClientConfiguration,
        network: Arc<dyn NetworkModule>,
        storage: Arc<dyn CacheStorage>,
        crypto: Arc<dyn CryptoProvider>,
    ) -> Result<Self, AuthError> {
        config.validate()?;

        let registry = Arc::new(TrustedHostRegistry::from_config(
            &config.auth.known_authorities,
            config.auth.cloud_discovery_metadata.as_deref(),
        )?);
        let authority = Authority::new(&config.auth.authority, registry.clone())?
            .with_instance_discovery(config.auth.instance_discovery)
            .with_metadata_document(config.auth.authority_metadata.clone());

        let cache = CacheManager::new(storage, registry);
        let network = NetworkManager::new(network, cache.clone());

        debug!(
            client_id = %config.auth.client_id,
            authority = %authority.canonical_authority(),
            "Created client context"
        );

        Ok(Self {
            config: Arc::new(config),
            authority: Arc::new(authority),
            cache,
            network,
            crypto,
        })
    }

    /// Client context with the `reqwest` transport and default crypto.
    pub fn with_storage(
        config: ClientConfiguration,
        storage: Arc<dyn CacheStorage>,
    ) -> Result<Self, AuthError> {
        Self::new(
            config,
            Arc::new(ReqwestNetworkModule::new()),
            storage,
            Arc::new(DefaultCrypto),
        )
    }

    pub fn config(&self) -> &ClientConfiguration {
        &self.config
    }

    pub fn client_id(&self) -> &str {
        &self.config.auth.client_id
    }

    pub fn authority(&self) -> &Arc<Authority> {
        &self.authority
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn crypto(&self) -> &Arc<dyn CryptoProvider> {
        &self.crypto
    }

    pub(crate) fn network(&self) -> &NetworkManager {
        &self.network
    }

    pub(crate) fn response_handler(&self) -> ResponseHandler {
        ResponseHandler::new(self.client_id(), self.cache.clone(), self.crypto.clone())
    }

    /// Resolve authority endpoints if that has not happened yet.
    pub async fn resolve_authority(&self) -> Result<(), AuthError> {
        if self.authority.is_resolved() {
            return Ok(());
        }
        self.authority
            .resolve_endpoints(self.network.network().as_ref(), &self.cache, self.client_id())
            .await
    }

    /// The caller's correlation id, or a fresh GUID.
    pub(crate) fn correlation_id(&self, requested: Option<&str>) -> String {
        requested
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.crypto.create_new_guid())
    }

    pub(crate) fn create_telemetry(
        &self,
        api_id: ApiId,
        correlation_id: &str,
        force_refresh: bool,
    ) -> ServerTelemetryManager {
        ServerTelemetryManager::new(
            self.cache.clone(),
            self.client_id(),
            api_id,
            correlation_id,
            force_refresh,
        )
    }

    pub(crate) fn thumbprint(
        &self,
        scopes: &ScopeSet,
        home_account_id: Option<&str>,
    ) -> RequestThumbprint {
        ThrottlingUtils::thumbprint(
            self.client_id(),
            &self.authority.canonical_authority(),
            scopes,
            home_account_id,
        )
    }

    /// Add `client_secret` or `client_assertion`, whichever is configured.
    pub(crate) fn add_client_credentials(&self, parameters: &mut RequestParameterBuilder) {
        let credentials = &self.config.credentials;
        if let Some(secret) = &credentials.client_secret {
            parameters.add_client_secret(secret.expose());
        } else if let Some(assertion) = &credentials.client_assertion {
            parameters.add_client_assertion(assertion.expose());
        }
    }

    /// Fail unless a client secret or assertion is configured.
    pub(crate) fn require_confidential(&self) -> Result<(), ConfigurationError> {
        if self.config.is_confidential() {
            Ok(())
        } else {
            Err(ConfigurationError::MissingClientCredential)
        }
    }

    /// Headers sent with every token endpoint request.
    pub(crate) async fn create_token_request_headers(
        &self,
        telemetry: &ServerTelemetryManager,
    ) -> Result<Vec<(String, String)>, AuthError> {
        let library = &self.config.library;
        let mut headers = vec![
            ("x-client-SKU".to_string(), library.sku.clone()),
            ("x-client-VER".to_string(), library.version.clone()),
            (
                THROTTLING_HEADER_NAME.to_string(),
                THROTTLING_HEADER_VALUE.to_string(),
            ),
        ];

        if self.config.telemetry.server_telemetry {
            headers.push((
                CURRENT_TELEMETRY_HEADER.to_string(),
                telemetry.generate_current_request_header_value(),
            ));
            headers.push((
                LAST_TELEMETRY_HEADER.to_string(),
                telemetry.generate_last_request_header_value().await?,
            ));
        }

        Ok(headers)
    }

    /// POST a form body to a token endpoint through the throttle gate.
    ///
    /// Telemetry reported in the headers is cleared once the server has
    /// seen it.
    pub(crate) async fn execute_post_to_token_endpoint(
        &self,
        endpoint: &str,
        body: String,
        thumbprint: &RequestThumbprint,
        telemetry: &ServerTelemetryManager,
    ) -> Result<NetworkResponse, AuthError> {
        let headers = self.create_token_request_headers(telemetry).await?;
        let options = RequestOptions { headers, body: Some(body) };

        let response = self
            .network
            .send_post_request(thumbprint, endpoint, &options)
            .await?;

        debug!(
            endpoint = %endpoint,
            status = response.status,
            api_id = telemetry.api_id().value(),
            "Token endpoint responded"
        );

        if self.config.telemetry.server_telemetry
            && ServerTelemetryManager::is_flushable_status(response.status)
        {
            telemetry.clear_telemetry_cache().await?;
        }

        Ok(response)
    }

    /// Record a failed operation in server telemetry, then pass the result on.
    pub(crate) async fn record_failure<T>(
        &self,
        telemetry: &ServerTelemetryManager,
        result: Result<T, AuthError>,
    ) -> Result<T, AuthError> {
        if let Err(error) = &result {
            if self.config.telemetry.server_telemetry {
                if let Err(store_error) = telemetry.cache_failed_request(error).await {
                    warn!(error = %store_error, "Failed to record telemetry");
                }
            }
        }
        result
    }

    /// Record a cache-served result.
    pub(crate) async fn record_cache_hit(&self, telemetry: &ServerTelemetryManager) {
        if self.config.telemetry.server_telemetry {
            if let Err(e) = telemetry.increment_cache_hits().await {
                warn!(error = %e, "Failed to record cache hit");
            }
        }
    }
}
