use std::sync::Arc;

use super::throttling::ThrottlingUtils;
use super::{NetworkModule, NetworkResponse, RequestOptions};
use crate::cache::{CacheManager, RequestThumbprint};
use crate::error::AuthError;

/// Sends token requests through the throttle gate.
#[derive(Clone)]
pub struct NetworkManager {
    network: Arc<dyn NetworkModule>,
    cache: CacheManager,
}

impl NetworkManager {
    pub fn new(network: Arc<dyn NetworkModule>, cache: CacheManager) -> Self {
        Self { network, cache }
    }

    pub fn network(&self) -> &Arc<dyn NetworkModule> {
        &self.network
    }

    /// POST unless the thumbprint is throttled, then record the outcome.
    pub async fn send_post_request(
        &self,
        thumbprint: &RequestThumbprint,
        url: &str,
        options: &RequestOptions,
    ) -> Result<NetworkResponse, AuthError> {
        ThrottlingUtils::pre_process(&self.cache, thumbprint).await?;
        let response = self.network.send_post_request(url, options).await?;
        ThrottlingUtils::post_process(&self.cache, thumbprint, &response).await?;
        Ok(response)
    }
}
