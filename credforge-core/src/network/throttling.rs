//! Throttling of requests the server has recently rejected.
//!
//! Each token request is identified by a [`RequestThumbprint`]. When the
//! server answers with 429, a 5xx status or a `Retry-After` header, a
//! [`ThrottlingEntity`] is stored under the thumbprint's key and identical
//! requests fail locally with the recorded error until it expires.

use serde_json::Value;
use tracing::{debug, warn};

use super::NetworkResponse;
use crate::cache::{CacheManager, RequestThumbprint, ThrottlingEntity};
use crate::error::AuthError;
use crate::scope::ScopeSet;
use crate::store::StoreError;
use crate::token::now_millis;

/// Throttle length when the server gives no usable `Retry-After`.
pub const DEFAULT_THROTTLE_TIME_SECONDS: i64 = 60;

/// Upper bound on any throttle.
pub const DEFAULT_MAX_THROTTLE_TIME_SECONDS: i64 = 3600;

pub const THROTTLING_HEADER_NAME: &str = "x-ms-lib-capability";
pub const THROTTLING_HEADER_VALUE: &str = "retry-after, h429";

const RETRY_AFTER_HEADER: &str = "retry-after";

/// Static helpers for the throttle gate around token requests.
pub struct ThrottlingUtils;

impl ThrottlingUtils {
    pub fn thumbprint(
        client_id: &str,
        authority: &str,
        scopes: &ScopeSet,
        home_account_identifier: Option<&str>,
    ) -> RequestThumbprint {
        RequestThumbprint {
            client_id: client_id.to_string(),
            authority: authority.to_string(),
            scopes: scopes.as_vec(),
            home_account_identifier: home_account_identifier
                .filter(|h| !h.is_empty())
                .map(str::to_string),
        }
    }

    /// Fail with the recorded error if the request is still throttled.
    ///
    /// Expired entries are removed.
    pub async fn pre_process(
        cache: &CacheManager,
        thumbprint: &RequestThumbprint,
    ) -> Result<(), AuthError> {
        let key = thumbprint.cache_key();
        let Some(entity) = cache.get_throttling_entity(&key).await? else {
            return Ok(());
        };

        if entity.throttle_time < now_millis() {
            debug!("Throttle entry expired, removing");
            cache.remove_item(&key).await?;
            return Ok(());
        }

        warn!(
            until = entity.throttle_time,
            "Request is throttled, returning cached error"
        );
        let error_code = entity
            .error_codes
            .as_ref()
            .filter(|codes| !codes.is_empty())
            .map(|codes| codes.join(" "))
            .or(entity.error.clone())
            .unwrap_or_default();
        Err(AuthError::from_server(
            error_code,
            entity
                .error_message
                .clone()
                .unwrap_or_else(|| "request throttled by the server".to_string()),
            entity.sub_error.clone(),
        ))
    }

    /// Record or clear a throttle based on the server's response.
    pub async fn post_process(
        cache: &CacheManager,
        thumbprint: &RequestThumbprint,
        response: &NetworkResponse,
    ) -> Result<(), StoreError> {
        let key = thumbprint.cache_key();

        if Self::check_response_status(response) || Self::check_response_for_retry_after(response)
        {
            let retry_after = response
                .header(RETRY_AFTER_HEADER)
                .and_then(|value| value.trim().parse::<i64>().ok());
            let entity = ThrottlingEntity {
                throttle_time: Self::calculate_throttle_time(retry_after, now_millis()),
                error: body_str(&response.body, "error"),
                error_codes: error_codes(&response.body),
                error_message: body_str(&response.body, "error_description"),
                sub_error: body_str(&response.body, "suberror"),
            };
            debug!(status = response.status, until = entity.throttle_time, "Throttling request");
            cache.set_throttling_entity(&key, &entity).await
        } else {
            cache.remove_item(&key).await
        }
    }

    /// 429 and every 5xx status.
    pub fn check_response_status(response: &NetworkResponse) -> bool {
        response.status == 429 || (500..600).contains(&response.status)
    }

    /// `Retry-After` on a non-2xx response.
    pub fn check_response_for_retry_after(response: &NetworkResponse) -> bool {
        response.header(RETRY_AFTER_HEADER).is_some() && !response.is_success()
    }

    /// Unix milliseconds until which a request is throttled.
    ///
    /// A missing or non-positive `Retry-After` uses the default; the result
    /// never exceeds the maximum throttle time.
    pub fn calculate_throttle_time(retry_after_seconds: Option<i64>, now_millis: i64) -> i64 {
        let seconds = retry_after_seconds
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_THROTTLE_TIME_SECONDS)
            .min(DEFAULT_MAX_THROTTLE_TIME_SECONDS);
        now_millis + seconds * 1000
    }
}

fn body_str(body: &Value, field: &str) -> Option<String> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn error_codes(body: &Value) -> Option<Vec<String>> {
    let codes = body.get("error_codes")?.as_array()?;
    Some(
        codes
            .iter()
            .map(|code| match code {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::TrustedHostRegistry;
    use crate::store::MemoryStore;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn cache() -> CacheManager {
        CacheManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(TrustedHostRegistry::new()),
        )
    }

    fn thumbprint() -> RequestThumbprint {
        ThrottlingUtils::thumbprint(
            "app",
            "https://login.microsoftonline.com/common/",
            &ScopeSet::from_scope_string("User.Read").unwrap(),
            None,
        )
    }

    fn response(status: u16, retry_after: Option<&str>) -> NetworkResponse {
        let mut headers = HashMap::new();
        if let Some(value) = retry_after {
            headers.insert("retry-after".to_string(), value.to_string());
        }
        NetworkResponse {
            status,
            headers,
            body: serde_json::json!({
                "error": "temporarily_unavailable",
                "error_description": "server busy",
                "error_codes": [50196],
            }),
        }
    }

    #[test]
    fn test_calculate_throttle_time() {
        let now = 1_000_000;
        assert_eq!(ThrottlingUtils::calculate_throttle_time(None, now), now + 60_000);
        assert_eq!(ThrottlingUtils::calculate_throttle_time(Some(-5), now), now + 60_000);
        assert_eq!(ThrottlingUtils::calculate_throttle_time(Some(0), now), now + 60_000);
        assert_eq!(ThrottlingUtils::calculate_throttle_time(Some(10), now), now + 10_000);
        assert_eq!(
            ThrottlingUtils::calculate_throttle_time(Some(86_400), now),
            now + 3_600_000
        );
    }

    #[test]
    fn test_response_classification() {
        assert!(ThrottlingUtils::check_response_status(&response(429, None)));
        assert!(ThrottlingUtils::check_response_status(&response(503, None)));
        assert!(!ThrottlingUtils::check_response_status(&response(400, None)));

        assert!(ThrottlingUtils::check_response_for_retry_after(&response(400, Some("5"))));
        assert!(!ThrottlingUtils::check_response_for_retry_after(&response(200, Some("5"))));
        assert!(!ThrottlingUtils::check_response_for_retry_after(&response(400, None)));
    }

    #[tokio::test]
    async fn test_throttled_request_fails_locally() {
        let cache = cache();
        let thumbprint = thumbprint();

        ThrottlingUtils::post_process(&cache, &thumbprint, &response(429, Some("30")))
            .await
            .unwrap();

        let err = ThrottlingUtils::pre_process(&cache, &thumbprint)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "50196");
    }

    #[tokio::test]
    async fn test_expired_entry_is_removed() {
        let cache = cache();
        let thumbprint = thumbprint();
        let key = thumbprint.cache_key();
        cache
            .set_throttling_entity(
                &key,
                &ThrottlingEntity {
                    throttle_time: now_millis() - 1,
                    error: Some("temporarily_unavailable".to_string()),
                    error_codes: None,
                    error_message: None,
                    sub_error: None,
                },
            )
            .await
            .unwrap();

        ThrottlingUtils::pre_process(&cache, &thumbprint).await.unwrap();
        assert!(cache.get_throttling_entity(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_success_clears_entry() {
        let cache = cache();
        let thumbprint = thumbprint();

        ThrottlingUtils::post_process(&cache, &thumbprint, &response(500, None))
            .await
            .unwrap();
        assert!(cache
            .get_throttling_entity(&thumbprint.cache_key())
            .await
            .unwrap()
            .is_some());

        ThrottlingUtils::post_process(&cache, &thumbprint, &response(400, None))
            .await
            .unwrap();
        assert!(cache
            .get_throttling_entity(&thumbprint.cache_key())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_thumbprints_are_independent() {
        let cache = cache();
        let throttled = thumbprint();
        let other = ThrottlingUtils::thumbprint(
            "app",
            "https://login.microsoftonline.com/common/",
            &ScopeSet::from_scope_string("Mail.Read").unwrap(),
            Some("uid.utid"),
        );

        ThrottlingUtils::post_process(&cache, &throttled, &response(429, None))
            .await
            .unwrap();

        assert!(ThrottlingUtils::pre_process(&cache, &other).await.is_ok());
    }
}
