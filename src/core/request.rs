use std::net::IpAddr;
use std::time::{Instant, SystemTime};

use bytes::Bytes;
use hyper::{HeaderMap, Method, Uri};

use crate::core::router::RouteMatch;
use crate::models::Principal;
use crate::utils::generate_id;

/// Per-request state carried through the pipeline
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id, echoed as `X-Request-Id` and sent upstream
    pub correlation_id: String,

    /// Wall-clock arrival time
    pub received_at: SystemTime,

    /// Monotonic arrival time for latency measurement
    pub started: Instant,

    /// Route chosen by the routing stage
    pub matched_route: Option<RouteMatch>,

    /// Caller identity set by the authentication gate
    pub principal: Option<Principal>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            correlation_id: generate_id(),
            received_at: SystemTime::now(),
            started: Instant::now(),
            matched_route: None,
            principal: None,
        }
    }

    /// Milliseconds since the request arrived
    pub fn elapsed_ms(&self) -> u64 {
        crate::utils::duration_to_millis(self.started.elapsed())
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Represents a request to the API Gateway
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// HTTP method
    pub method: Method,

    /// Request URI
    pub uri: Uri,

    /// HTTP headers
    pub headers: HeaderMap,

    /// Request body
    pub body: Bytes,

    /// Client IP address
    pub client_ip: Option<IpAddr>,

    /// Pipeline state
    pub context: RequestContext,
}

impl GatewayRequest {
    /// Create a new GatewayRequest
    pub fn new(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        client_ip: Option<IpAddr>,
    ) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
            client_ip,
            context: RequestContext::new(),
        }
    }

    /// Correlation id of this request
    pub fn request_id(&self) -> &str {
        &self.context.correlation_id
    }

    /// Request path without the query string
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Raw query string, if any
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Get a header value as a string
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }
}
