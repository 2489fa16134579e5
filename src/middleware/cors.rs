use std::sync::Arc;

use async_trait::async_trait;
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_REQUEST_HEADERS,
    ACCESS_CONTROL_REQUEST_METHOD, ORIGIN, VARY,
};
use hyper::{HeaderMap, Method, StatusCode};

use super::{Middleware, MiddlewareHandler};
use crate::config::CorsConfig;
use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::error::GatewayError;

/// Cross-origin stage: credentialed requests from the configured origins,
/// any method and any header. Origins must be listed explicitly.
pub struct CorsMiddleware {
    config: CorsConfig,
}

impl CorsMiddleware {
    pub fn new(config: CorsConfig) -> Self {
        Self { config }
    }

    /// Check if origin is allowed
    fn is_origin_allowed(&self, origin: &str) -> bool {
        self.config
            .allowed_origins
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(origin))
    }

    fn allowed_origin(&self, request: &GatewayRequest) -> Option<HeaderValue> {
        let origin = request.headers.get(ORIGIN)?;
        let text = origin.to_str().ok()?;
        self.is_origin_allowed(text).then(|| origin.clone())
    }

    fn apply(headers: &mut HeaderMap, origin: HeaderValue) {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        headers.append(VARY, HeaderValue::from_static("Origin"));
    }
}

#[async_trait]
impl Middleware for CorsMiddleware {
    async fn process_request(
        &self,
        request: GatewayRequest,
        next: Arc<dyn MiddlewareHandler>,
    ) -> Result<GatewayResponse, GatewayError> {
        let origin = self.allowed_origin(&request);

        // Handle preflight requests
        if let Some(origin) = &origin {
            if request.method == Method::OPTIONS {
                if let Some(method) = request.headers.get(ACCESS_CONTROL_REQUEST_METHOD) {
                    let mut response =
                        GatewayResponse::new(StatusCode::NO_CONTENT, HeaderMap::new(), Default::default());
                    response
                        .headers
                        .insert(ACCESS_CONTROL_ALLOW_METHODS, method.clone());
                    if let Some(headers) = request.headers.get(ACCESS_CONTROL_REQUEST_HEADERS) {
                        response
                            .headers
                            .insert(ACCESS_CONTROL_ALLOW_HEADERS, headers.clone());
                    }
                    Self::apply(&mut response.headers, origin.clone());
                    return Ok(response);
                }
            }
        }

        let Some(origin) = origin else {
            return next.handle(request).await;
        };

        let request_id = request.request_id().to_string();
        // Errors become responses here so they carry the headers too
        let mut response = match next.handle(request).await {
            Ok(response) => response,
            Err(error) => GatewayResponse::from_error(&error, &request_id),
        };
        Self::apply(&mut response.headers, origin);
        Ok(response)
    }

    fn name(&self) -> &str {
        "cors"
    }
}
