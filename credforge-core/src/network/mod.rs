//! HTTP transport and request gating.
//!
//! This module provides:
//! - [`NetworkModule`] - Transport capability consumed by the engine
//! - [`ReqwestNetworkModule`] - Default transport built on `reqwest`
//! - [`ThrottlingUtils`] - Request thumbprint throttling
//! - [`NetworkManager`] - Sends token requests through the throttle gate

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::ClientAuthError;

mod manager;
pub mod throttling;

pub use manager::NetworkManager;
pub use throttling::ThrottlingUtils;

pub const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded;charset=utf-8";

/// Headers and body of an outgoing request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// A response with its body parsed as JSON.
///
/// Header names are lower-cased. A body that is not JSON becomes `Null`.
#[derive(Debug, Clone)]
pub struct NetworkResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: serde_json::Value,
}

impl NetworkResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport capability.
///
/// Implementations only move bytes; status codes are interpreted by the
/// caller. A transport failure is reported as a network error.
#[async_trait]
pub trait NetworkModule: Send + Sync {
    async fn send_get_request(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<NetworkResponse, ClientAuthError>;

    async fn send_post_request(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<NetworkResponse, ClientAuthError>;
}

/// [`NetworkModule`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestNetworkModule {
    client: reqwest::Client,
}

impl ReqwestNetworkModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(
        &self,
        url: &str,
        mut request: reqwest::RequestBuilder,
        options: &RequestOptions,
    ) -> Result<NetworkResponse, ClientAuthError> {
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let network_error = |e: reqwest::Error| ClientAuthError::Network {
            endpoint: url.to_string(),
            message: e.to_string(),
        };

        let response = request.send().await.map_err(network_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let bytes = response.bytes().await.map_err(network_error)?;
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);

        tracing::debug!(url = %url, status, "Received response");

        Ok(NetworkResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl NetworkModule for ReqwestNetworkModule {
    async fn send_get_request(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<NetworkResponse, ClientAuthError> {
        let request = self.client.get(url);
        self.send(url, request, options).await
    }

    async fn send_post_request(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<NetworkResponse, ClientAuthError> {
        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE_FORM);
        if let Some(body) = &options.body {
            request = request.body(body.clone());
        }
        self.send(url, request, options).await
    }
}
