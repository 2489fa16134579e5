use std::sync::Arc;

use async_trait::async_trait;
use tracing::{Instrument, Level};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use super::{Middleware, MiddlewareHandler};
use crate::config::LoggingConfig;
use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::error::GatewayError;

/// Middleware for logging requests and responses with structured logging
pub struct LoggingMiddleware {
    /// Log level for request logging
    log_level: LogLevel,
}

/// Log level for the logging middleware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// One line per request
    Basic,
    /// Also log headers at debug level (credentials hidden)
    Detailed,
}

/// Initialize the tracing system; `RUST_LOG` takes precedence over the configured level
pub fn init_tracing(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let registry = Registry::default().with(env_filter);
    let result = if config.json_format {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .json(),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339()),
            )
            .try_init()
    };

    if result.is_ok() {
        tracing::info!(level = %config.level, json = config.json_format, "Tracing initialized");
    }
}

impl LoggingMiddleware {
    /// Create a new logging middleware with the specified log level
    pub fn new(log_level: LogLevel) -> Self {
        Self { log_level }
    }

    /// Create a new logging middleware with basic log level
    pub fn basic() -> Self {
        Self::new(LogLevel::Basic)
    }

    /// Create a new logging middleware with detailed log level
    pub fn detailed() -> Self {
        Self::new(LogLevel::Detailed)
    }

    /// Detailed when `logging.request_headers` is set, basic otherwise
    pub fn from_config(config: &LoggingConfig) -> Self {
        if config.request_headers {
            Self::detailed()
        } else {
            Self::basic()
        }
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn process_request(
        &self,
        request: GatewayRequest,
        next: Arc<dyn MiddlewareHandler>,
    ) -> Result<GatewayResponse, GatewayError> {
        let request_span = tracing::span!(
            Level::INFO,
            "request",
            request_id = %request.request_id(),
            method = %request.method,
            path = %request.path(),
        );

        if self.log_level == LogLevel::Detailed {
            request_span.in_scope(|| {
                for (name, value) in request.headers.iter() {
                    if name == hyper::header::AUTHORIZATION || name == hyper::header::COOKIE {
                        tracing::debug!(header_name = %name, "Credential header present (value hidden)");
                    } else {
                        tracing::debug!(header_name = %name, header_value = ?value, "Request header");
                    }
                }
                if let Some(ip) = request.client_ip {
                    tracing::debug!(client_ip = %ip, "Client IP");
                }
            });
        }

        let context = request.context.clone();
        let result = next.handle(request).instrument(request_span.clone()).await;
        let elapsed_ms = context.elapsed_ms();

        let _enter = request_span.enter();
        match &result {
            Ok(response) => {
                let status_code = response.status.as_u16();
                let cache_hit = response.cache_info.as_ref().map(|c| c.cache_hit);

                if response.status.is_server_error() {
                    tracing::warn!(
                        status_code,
                        elapsed_ms,
                        cache_hit = ?cache_hit,
                        upstream = ?response.upstream,
                        "Request completed"
                    );
                } else {
                    tracing::info!(
                        status_code,
                        elapsed_ms,
                        cache_hit = ?cache_hit,
                        upstream = ?response.upstream,
                        "Request completed"
                    );
                }
            }
            Err(error) if error.status_code() >= 500 => {
                tracing::error!(
                    status_code = error.status_code(),
                    error_type = error.kind(),
                    error_message = %error,
                    elapsed_ms,
                    "Request failed"
                );
            }
            Err(error) => {
                tracing::warn!(
                    status_code = error.status_code(),
                    error_type = error.kind(),
                    error_message = %error,
                    elapsed_ms,
                    "Request rejected"
                );
            }
        }

        result
    }

    fn name(&self) -> &str {
        "logging"
    }
}

/// Log a security event
pub fn log_security_event(event_type: &str, request_id: &str, details: &str) {
    tracing::warn!(
        event_type = event_type,
        request_id = request_id,
        details = details,
        "Security event: {}",
        event_type
    );
}

#[cfg(test)]
mod tests {
    use hyper::{Method, StatusCode};

    use super::*;
    use crate::middleware::test_support::{request, Recorder};

    #[tokio::test]
    async fn test_logging_passes_results_through() {
        let recorder = Arc::new(Recorder::default());
        let response = LoggingMiddleware::detailed()
            .process_request(request(Method::GET, "/orders"), recorder.clone())
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(recorder.calls(), 1);
    }

    #[test]
    fn test_level_follows_config() {
        let mut config = LoggingConfig::default();
        assert_eq!(LoggingMiddleware::from_config(&config).log_level(), LogLevel::Basic);

        config.request_headers = true;
        assert_eq!(LoggingMiddleware::from_config(&config).log_level(), LogLevel::Detailed);
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        let config = LoggingConfig::default();
        init_tracing(&config);
        init_tracing(&config);
    }
}
