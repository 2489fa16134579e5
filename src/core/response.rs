use bytes::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE, WWW_AUTHENTICATE};
use hyper::{HeaderMap, StatusCode};

use crate::error::GatewayError;

/// Cache information for a response
#[derive(Debug, Clone, PartialEq)]
pub struct CacheInfo {
    /// Whether the response was served from cache
    pub cache_hit: bool,

    /// Time-to-live for the cached response
    pub ttl_seconds: Option<u64>,

    /// Cache key used to store/retrieve the response
    pub cache_key: String,
}

/// Represents a response from the API Gateway
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    /// HTTP status code
    pub status: StatusCode,

    /// HTTP headers
    pub headers: HeaderMap,

    /// Response body
    pub body: Bytes,

    /// Cache information (if applicable)
    pub cache_info: Option<CacheInfo>,

    /// Upstream target that produced the response (if applicable)
    pub upstream: Option<String>,

    /// Upstream attempts made
    pub attempts: u32,
}

impl GatewayResponse {
    /// Create a new GatewayResponse
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            cache_info: None,
            upstream: None,
            attempts: 0,
        }
    }

    /// Plain text response
    pub fn text(status: StatusCode, body: &'static str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        Self::new(status, headers, Bytes::from_static(body.as_bytes()))
    }

    /// JSON error body `{"error", "status", "request_id"}`
    pub fn error(status: StatusCode, message: &str, request_id: &str) -> Self {
        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
            "request_id": request_id,
        });

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Self::new(status, headers, Bytes::from(body.to_string()))
    }

    /// Error response for a pipeline failure
    pub fn from_error(error: &GatewayError, request_id: &str) -> Self {
        let status = StatusCode::from_u16(error.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // Internal details stay in the logs
        let message = if status.is_server_error() && !matches!(
            error,
            GatewayError::UpstreamUnavailable { .. } | GatewayError::RequestTimeout
        ) {
            "Internal server error".to_string()
        } else {
            error.to_string()
        };

        let mut response = Self::error(status, &message, request_id);
        if let GatewayError::AuthError(_) = error {
            response
                .headers
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }

    /// Set cache information for this response
    pub fn with_cache_info(mut self, cache_info: CacheInfo) -> Self {
        self.cache_info = Some(cache_info);
        self
    }

    /// Set the upstream that produced this response
    pub fn with_upstream(mut self, upstream: String, attempts: u32) -> Self {
        self.upstream = Some(upstream);
        self.attempts = attempts;
        self
    }

    /// Set a header, ignoring values that are not valid header text
    pub fn set_header(&mut self, name: &'static str, value: &str) {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
    }
}
