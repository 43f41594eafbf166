//! Server telemetry headers.
//!
//! Failed requests and cache hits are accumulated in the cache under
//! `server-telemetry-<clientId>` and reported to the token endpoint on the
//! next request through the `x-client-last-telemetry` header. The header is
//! bounded; errors that do not fit stay cached and are flagged as overflow.

use tracing::debug;

use crate::cache::{CacheManager, ServerTelemetryEntity};
use crate::error::AuthError;
use crate::store::StoreError;

pub const SCHEMA_VERSION: u8 = 2;

/// Byte budget for the flushed errors of the last-request header.
pub const MAX_LAST_HEADER_BYTES: usize = 4000;

/// Oldest errors are dropped once this many are cached.
pub const MAX_CACHED_ERRORS: usize = 50;

pub const UNKNOWN_ERROR: &str = "unknown_error";

pub const CURRENT_TELEMETRY_HEADER: &str = "x-client-current-telemetry";
pub const LAST_TELEMETRY_HEADER: &str = "x-client-last-telemetry";

const VALUE_SEPARATOR: &str = ",";
const CATEGORY_SEPARATOR: &str = "|";

/// Public API that issued a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiId {
    AcquireTokenByCode = 871,
    AcquireTokenByRefreshToken = 872,
    AcquireTokenSilent = 62,
    AcquireTokenByDeviceCode = 671,
    AcquireTokenByClientCredential = 771,
    AcquireTokenOnBehalfOf = 672,
}

impl ApiId {
    pub fn value(self) -> u32 {
        self as u32
    }
}

/// Telemetry bookkeeping for one request.
#[derive(Clone)]
pub struct ServerTelemetryManager {
    cache: CacheManager,
    telemetry_key: String,
    api_id: ApiId,
    correlation_id: String,
    force_refresh: bool,
}

impl ServerTelemetryManager {
    pub fn new(
        cache: CacheManager,
        client_id: &str,
        api_id: ApiId,
        correlation_id: impl Into<String>,
        force_refresh: bool,
    ) -> Self {
        Self {
            cache,
            telemetry_key: ServerTelemetryEntity::cache_key(client_id),
            api_id,
            correlation_id: correlation_id.into(),
            force_refresh,
        }
    }

    pub fn api_id(&self) -> ApiId {
        self.api_id
    }

    /// `2|<apiId>,<forceRefresh>|`
    pub fn generate_current_request_header_value(&self) -> String {
        let request_info = [
            self.api_id.value().to_string(),
            u8::from(self.force_refresh).to_string(),
        ]
        .join(VALUE_SEPARATOR);
        format!(
            "{}{}{}{}",
            SCHEMA_VERSION, CATEGORY_SEPARATOR, request_info, CATEGORY_SEPARATOR
        )
    }

    /// `2|<cacheHits>|<failedRequests>|<errors>|<errorCount>,<overflow>`
    pub async fn generate_last_request_header_value(&self) -> Result<String, StoreError> {
        let entity = self.telemetry_entity().await?;

        let max_errors = Self::max_errors_to_send(&entity);
        let failed_requests = entity
            .failed_requests
            .iter()
            .take(2 * max_errors)
            .cloned()
            .collect::<Vec<_>>()
            .join(VALUE_SEPARATOR);
        let errors = entity
            .errors
            .iter()
            .take(max_errors)
            .cloned()
            .collect::<Vec<_>>()
            .join(VALUE_SEPARATOR);
        let error_count = entity.errors.len();
        let overflow = u8::from(max_errors < error_count);

        Ok([
            SCHEMA_VERSION.to_string(),
            entity.cache_hits.to_string(),
            failed_requests,
            errors,
            format!("{}{}{}", error_count, VALUE_SEPARATOR, overflow),
        ]
        .join(CATEGORY_SEPARATOR))
    }

    /// Record a failed request for the next header.
    pub async fn cache_failed_request(&self, error: &AuthError) -> Result<(), StoreError> {
        let mut entity = self.telemetry_entity().await?;

        if entity.errors.len() >= MAX_CACHED_ERRORS {
            let drop_requests = entity.failed_requests.len().min(2);
            entity.failed_requests.drain(..drop_requests);
            entity.errors.remove(0);
        }

        entity
            .failed_requests
            .push(self.api_id.value().to_string());
        entity.failed_requests.push(self.correlation_id.clone());

        let code = error.error_code();
        entity.errors.push(if code.is_empty() {
            UNKNOWN_ERROR.to_string()
        } else {
            code.to_string()
        });

        debug!(error = %code, "Recorded failed request for telemetry");
        self.cache
            .set_server_telemetry(&self.telemetry_key, &entity)
            .await
    }

    pub async fn increment_cache_hits(&self) -> Result<u32, StoreError> {
        let mut entity = self.telemetry_entity().await?;
        entity.cache_hits += 1;
        self.cache
            .set_server_telemetry(&self.telemetry_key, &entity)
            .await?;
        Ok(entity.cache_hits)
    }

    /// Drop what the last header reported.
    ///
    /// Errors that did not fit stay cached; the entry is removed once
    /// nothing is left.
    pub async fn clear_telemetry_cache(&self) -> Result<(), StoreError> {
        let mut entity = self.telemetry_entity().await?;
        let flushed = Self::max_errors_to_send(&entity);

        if flushed == entity.errors.len() {
            return self.cache.remove_item(&self.telemetry_key).await;
        }

        let flushed_requests = (2 * flushed).min(entity.failed_requests.len());
        entity.failed_requests.drain(..flushed_requests);
        entity.errors.drain(..flushed);
        entity.cache_hits = 0;
        self.cache
            .set_server_telemetry(&self.telemetry_key, &entity)
            .await
    }

    /// Responses after which the last header counts as delivered.
    pub fn is_flushable_status(status: u16) -> bool {
        status < 500 && status != 429
    }

    /// Number of oldest errors that fit in the header budget.
    pub fn max_errors_to_send(entity: &ServerTelemetryEntity) -> usize {
        let mut max_errors = 0;
        let mut data_size = 0;

        for (index, error) in entity.errors.iter().enumerate() {
            let api_id = entity
                .failed_requests
                .get(2 * index)
                .map(String::len)
                .unwrap_or(0);
            let correlation_id = entity
                .failed_requests
                .get(2 * index + 1)
                .map(String::len)
                .unwrap_or(0);
            data_size += api_id + correlation_id + error.len() + 3;

            if data_size < MAX_LAST_HEADER_BYTES {
                max_errors += 1;
            } else {
                break;
            }
        }

        max_errors
    }

    async fn telemetry_entity(&self) -> Result<ServerTelemetryEntity, StoreError> {
        Ok(self
            .cache
            .get_server_telemetry(&self.telemetry_key)
            .await?
            .unwrap_or_default())
    }
}
