//! # Credforge Core
//!
//! OAuth2/OIDC token acquisition and credential cache engine.
//!
//! This crate provides:
//! - Protocol clients for the authorization code (PKCE), refresh token,
//!   client credentials, on-behalf-of and device code grants
//! - A silent flow that serves cached tokens and refreshes them when needed
//! - A schema-driven credential cache over a pluggable [`CacheStorage`]
//! - Authority validation and endpoint discovery
//! - Throttling of requests the server has asked to back off, and bounded
//!   server telemetry headers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use credforge_core::{BaseClient, ClientConfiguration, MemoryStore, SilentFlowClient, SilentFlowRequest};
//!
//! async fn get_token(account: credforge_core::AccountInfo) -> Result<String, credforge_core::AuthError> {
//!     let config = ClientConfiguration::new("00000000-0000-0000-0000-000000000000");
//!     let base = BaseClient::with_storage(config, Arc::new(MemoryStore::new()))?;
//!     let client = SilentFlowClient::new(base);
//!     let request = SilentFlowRequest::new(vec!["User.Read".to_string()], account);
//!     let result = client.acquire_token(&request).await?;
//!     Ok(result.access_token.expose().to_string())
//! }
//! ```

pub mod authority;
pub mod cache;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod model;
pub mod network;
pub mod request;
pub mod response;
pub mod scope;
pub mod store;
pub mod telemetry;
pub mod token;

// Re-export commonly used types at crate root
pub use authority::{Authority, AuthorityType, TrustedHostRegistry};

pub use cache::{CacheManager, CacheRecord};

pub use client::{
    AuthorizationCodeClient,
    AuthorizationUrl,
    BaseClient,
    ClientCredentialClient,
    DeviceCodeClient,
    DeviceCodeResponse,
    OnBehalfOfClient,
    RefreshTokenClient,
    SilentFlowClient,
};

pub use config::ClientConfiguration;

pub use crypto::{CryptoProvider, DefaultCrypto};

pub use error::{
    AuthError,
    ClientAuthError,
    ConfigurationError,
    InteractionRequiredError,
    ServerError,
};

pub use model::{AccountInfo, CredentialType};

pub use network::{NetworkModule, ReqwestNetworkModule};

pub use request::{
    AuthorizationCodeRequest,
    AuthorizationUrlRequest,
    ClientCredentialRequest,
    CommonRefreshRequest,
    DeviceCodeRequest,
    EndSessionRequest,
    OnBehalfOfRequest,
    RefreshTokenRequest,
    ResponseMode,
    SilentFlowRequest,
};

pub use response::AuthenticationResult;

pub use scope::ScopeSet;

pub use store::{
    CacheStorage,
    FileStore,
    MemoryStore,
    Secret,
    StoreError,
    create_store,
};
