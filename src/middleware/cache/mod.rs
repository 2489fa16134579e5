use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hyper::header::HeaderValue;
use sha2::{Digest, Sha256};

use crate::core::request::GatewayRequest;
use crate::core::response::{CacheInfo, GatewayResponse};
use crate::core::router::RouteCachePolicy;
use crate::error::{CacheError, GatewayError};
use crate::middleware::{Middleware, MiddlewareHandler};
use crate::utils::is_cacheable;

pub mod inflight;
pub mod memory_store;
pub mod models;

use inflight::InFlight;
pub use memory_store::{CacheStats, MemoryStore};
use models::{is_response_cacheable, CachedResponse};

/// Response header telling whether the cache answered
pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// Keys longer than this keep their region prefix and hash the rest
const MAX_KEY_LEN: usize = 200;

/// Cache store trait
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a cached response; expired entries are never returned
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>, CacheError>;

    /// Store a response in the cache
    async fn set(
        &self,
        key: &str,
        response: CachedResponse,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Delete a cached response
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Delete every entry of a region, returning how many were removed
    async fn clear_region(&self, region: &str) -> Result<usize, CacheError>;

    /// Clear the entire cache
    async fn clear(&self) -> Result<(), CacheError>;

    /// Number of stored entries
    async fn len(&self) -> usize;
}

/// Response cache stage.
///
/// Only GET and HEAD requests on routes with a cache policy are looked up.
/// With single-flight on, concurrent misses for one key share a single
/// upstream call.
pub struct CacheMiddleware {
    cache_store: Arc<dyn CacheStore>,
    inflight: Option<InFlight>,
}

impl CacheMiddleware {
    /// Create a new CacheMiddleware
    pub fn new(cache_store: Arc<dyn CacheStore>) -> Self {
        Self {
            cache_store,
            inflight: Some(InFlight::new()),
        }
    }

    /// Turn single-flight population on or off
    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.inflight = enabled.then(InFlight::new);
        self
    }

    async fn lookup(&self, key: &str) -> Option<GatewayResponse> {
        match self.cache_store.get(key).await {
            Ok(Some(cached)) => {
                tracing::debug!(cache_key = %key, "Cache hit");
                let mut response = cached.to_gateway_response();
                response
                    .headers
                    .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("HIT"));
                Some(response)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(cache_key = %key, error = %err, "Cache lookup failed, bypassing cache");
                None
            }
        }
    }

    async fn store(&self, key: &str, response: &GatewayResponse, ttl: Duration) {
        let cached = CachedResponse::from_gateway_response(response, key.to_string(), ttl);
        if let Err(err) = self.cache_store.set(key, cached, ttl).await {
            tracing::warn!(cache_key = %key, error = %err, "Failed to cache response");
        }
    }
}

/// Cache key: `region:METHOD:path[?query][|header=value...]`
pub fn generate_cache_key(request: &GatewayRequest, policy: &RouteCachePolicy) -> String {
    let mut tail = format!("{}:{}", request.method, normalize_path(request.path()));

    if let Some(query) = request.query() {
        tail.push('?');
        tail.push_str(query);
    }

    for header_name in &policy.vary_by_headers {
        let value = request.header(header_name).unwrap_or_default();
        tail.push('|');
        tail.push_str(header_name);
        tail.push('=');
        tail.push_str(&value);
    }

    let key = format!("{}:{}", policy.region, tail);
    if key.len() <= MAX_KEY_LEN {
        return key;
    }

    let digest = Sha256::digest(tail.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}:hashed:{}", policy.region, hex)
}

/// Normalize a URL path by removing trailing slashes and duplicate slashes
fn normalize_path(path: &str) -> String {
    let mut result = String::with_capacity(path.len());
    let mut last_was_slash = false;

    for c in path.chars() {
        if c == '/' {
            if !last_was_slash {
                result.push(c);
            }
            last_was_slash = true;
        } else {
            result.push(c);
            last_was_slash = false;
        }
    }

    if result.len() > 1 && result.ends_with('/') {
        result.pop();
    }

    result
}

#[async_trait]
impl Middleware for CacheMiddleware {
    async fn process_request(
        &self,
        request: GatewayRequest,
        next: Arc<dyn MiddlewareHandler>,
    ) -> Result<GatewayResponse, GatewayError> {
        let policy = match &request.context.matched_route {
            Some(matched) if is_cacheable(&request.method) => matched.route.cache.clone(),
            _ => None,
        };
        let Some(policy) = policy else {
            return next.handle(request).await;
        };

        let cache_key = generate_cache_key(&request, &policy);

        if let Some(hit) = self.lookup(&cache_key).await {
            return Ok(hit);
        }

        let _flight = match &self.inflight {
            Some(inflight) => {
                let guard = inflight.acquire(&cache_key).await;
                // Another request may have populated the key while we waited
                if let Some(hit) = self.lookup(&cache_key).await {
                    return Ok(hit);
                }
                Some(guard)
            }
            None => None,
        };

        let mut response = next.handle(request).await?;

        if is_response_cacheable(&response) {
            self.store(&cache_key, &response, policy.ttl).await;
        }

        response
            .headers
            .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("MISS"));
        response.cache_info = Some(CacheInfo {
            cache_hit: false,
            ttl_seconds: Some(policy.ttl.as_secs()),
            cache_key,
        });

        Ok(response)
    }

    fn name(&self) -> &str {
        "cache"
    }
}
