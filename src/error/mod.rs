use thiserror::Error;

/// Gateway error types
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Authentication failed: {0}")]
    AuthError(#[from] AuthError),

    #[error("Upstream unavailable after {attempts} attempt(s): {cause}")]
    UpstreamUnavailable {
        attempts: u32,
        cause: UpstreamFailure,
    },

    #[error("Request timeout")]
    RequestTimeout,

    #[error("Cache error: {0}")]
    CacheError(#[from] CacheError),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Load balancer error: {0}")]
    LoadBalancerError(#[from] LoadBalancerError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// HTTP status code mapping for gateway errors
impl GatewayError {
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::RouteNotFound(_) => 404,
            GatewayError::AuthError(_) => 401,
            GatewayError::UpstreamUnavailable { cause, .. } => match cause {
                UpstreamFailure::Timeout(_) => 504,
                _ => 502,
            },
            GatewayError::RequestTimeout => 504,
            GatewayError::CacheError(_) => 500,
            GatewayError::ConfigError(_) => 500,
            GatewayError::LoadBalancerError(_) => 503,
            GatewayError::InvalidRequest(_) => 400,
            GatewayError::InternalError(_) => 500,
            GatewayError::IoError(_) => 500,
        }
    }

    /// Short machine-readable name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::RouteNotFound(_) => "route_not_found",
            GatewayError::AuthError(_) => "authentication",
            GatewayError::UpstreamUnavailable { .. } => "upstream_unavailable",
            GatewayError::RequestTimeout => "request_timeout",
            GatewayError::CacheError(_) => "cache",
            GatewayError::ConfigError(_) => "configuration",
            GatewayError::LoadBalancerError(_) => "load_balancer",
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::InternalError(_) => "internal",
            GatewayError::IoError(_) => "io",
        }
    }
}

/// Transport-level failure talking to an upstream.
///
/// An upstream that answers with an error status is a response, not a
/// failure. Only timeouts and connect failures are retried: a transport
/// error may come after the upstream already handled the request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamFailure {
    #[error("timed out calling {0}")]
    Timeout(String),

    #[error("connection to {target} failed: {reason}")]
    Connect { target: String, reason: String },

    #[error("transport error from {target}: {reason}")]
    Transport { target: String, reason: String },
}

impl UpstreamFailure {
    /// Whether another attempt may be made
    pub fn is_retryable(&self) -> bool {
        matches!(self, UpstreamFailure::Timeout(_) | UpstreamFailure::Connect { .. })
    }
}

/// Cache specific errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to store item in cache: {0}")]
    StoreError(String),
}

/// Authentication specific errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Malformed authorization header")]
    MalformedHeader,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token not yet valid")]
    TokenNotYetValid,

    #[error("Invalid issuer")]
    InvalidIssuer,

    #[error("Invalid audience")]
    InvalidAudience,

    #[error("Signing key error: {0}")]
    KeyError(String),
}

/// Load balancer specific errors
#[derive(Debug, Error)]
pub enum LoadBalancerError {
    #[error("No upstream target available")]
    NoBackendAvailable,

    #[error("Invalid load balancing algorithm: {0}")]
    InvalidAlgorithm(String),
}

/// Configuration specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}
