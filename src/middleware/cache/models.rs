use std::time::{Duration, Instant};

use bytes::Bytes;
use hyper::header::CACHE_CONTROL;
use hyper::{HeaderMap, StatusCode};

use crate::core::response::{CacheInfo, GatewayResponse};

/// Represents a cached response with metadata
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// The HTTP status code
    pub status: StatusCode,

    /// The HTTP headers
    pub headers: HeaderMap,

    /// The response body
    pub body: Bytes,

    /// When the response was cached
    pub stored_at: Instant,

    /// When the entry stops being served
    pub expires_at: Instant,

    /// Cache key used to store this response
    pub cache_key: String,
}

impl CachedResponse {
    /// Create a new CachedResponse from a GatewayResponse
    pub fn from_gateway_response(
        response: &GatewayResponse,
        cache_key: String,
        ttl: Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            stored_at: now,
            expires_at: now + ttl,
            cache_key,
        }
    }

    /// Convert back to a GatewayResponse
    pub fn to_gateway_response(&self) -> GatewayResponse {
        GatewayResponse::new(self.status, self.headers.clone(), self.body.clone()).with_cache_info(
            CacheInfo {
                cache_hit: true,
                ttl_seconds: Some(self.remaining_ttl().as_secs()),
                cache_key: self.cache_key.clone(),
            },
        )
    }

    /// Check if the cached response has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Check expiry against a given instant
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Get the remaining TTL
    pub fn remaining_ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Whether an upstream response may be stored: 2xx and not marked
/// `no-store` or `private`
pub fn is_response_cacheable(response: &GatewayResponse) -> bool {
    if !response.status.is_success() {
        return false;
    }

    !response
        .headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|directive| directive.trim().to_ascii_lowercase())
        .any(|directive| directive == "no-store" || directive == "private")
}
