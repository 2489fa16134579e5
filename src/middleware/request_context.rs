use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use hyper::header::{HeaderName, HeaderValue};

use super::{Middleware, MiddlewareHandler};
use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::error::GatewayError;

/// Correlation id header
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// API version header
pub const API_VERSION_HEADER: &str = "x-api-version";

/// Default value of the version header
pub const DEFAULT_API_VERSION: &str = "1.0.0";

/// Outermost stage.
///
/// Converts inner errors and panics into JSON error responses and then
/// stamps `X-Request-Id` and `X-API-Version` on whatever goes out, so the
/// headers are present on every exit path.
pub struct RequestContextMiddleware {
    api_version: HeaderValue,
}

impl RequestContextMiddleware {
    pub fn new(api_version: &str) -> Self {
        let api_version = HeaderValue::from_str(api_version).unwrap_or_else(|_| {
            tracing::warn!(api_version, "Invalid API version header value, using default");
            HeaderValue::from_static(DEFAULT_API_VERSION)
        });
        Self { api_version }
    }

    fn stamp(&self, response: &mut GatewayResponse, request_id: &str) {
        if let Ok(value) = HeaderValue::from_str(request_id) {
            response
                .headers
                .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
        }
        response.headers.insert(
            HeaderName::from_static(API_VERSION_HEADER),
            self.api_version.clone(),
        );
    }
}

impl Default for RequestContextMiddleware {
    fn default() -> Self {
        Self::new(DEFAULT_API_VERSION)
    }
}

#[async_trait]
impl Middleware for RequestContextMiddleware {
    async fn process_request(
        &self,
        request: GatewayRequest,
        next: Arc<dyn MiddlewareHandler>,
    ) -> Result<GatewayResponse, GatewayError> {
        let request_id = request.request_id().to_string();

        let outcome = AssertUnwindSafe(next.handle(request)).catch_unwind().await;

        let mut response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => {
                if error.status_code() >= 500 {
                    tracing::error!(request_id = %request_id, kind = error.kind(), error = %error, "Request failed");
                }
                GatewayResponse::from_error(&error, &request_id)
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(request_id = %request_id, panic = %message, "Request handler panicked");
                GatewayResponse::from_error(
                    &GatewayError::InternalError(message),
                    &request_id,
                )
            }
        };

        self.stamp(&mut response, &request_id);
        Ok(response)
    }

    fn name(&self) -> &str {
        "request_context"
    }
}
