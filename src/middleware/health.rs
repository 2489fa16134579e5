use std::sync::Arc;

use async_trait::async_trait;
use hyper::{Method, StatusCode};

use super::{Middleware, MiddlewareHandler};
use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::error::GatewayError;

/// Liveness endpoint; answers without touching routing or upstreams
pub struct HealthMiddleware {
    path: String,
}

impl HealthMiddleware {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Middleware for HealthMiddleware {
    async fn process_request(
        &self,
        request: GatewayRequest,
        next: Arc<dyn MiddlewareHandler>,
    ) -> Result<GatewayResponse, GatewayError> {
        let is_liveness_check = matches!(request.method, Method::GET | Method::HEAD)
            && request.path() == self.path;

        if is_liveness_check {
            return Ok(GatewayResponse::text(StatusCode::OK, "Healthy"));
        }

        next.handle(request).await
    }

    fn name(&self) -> &str {
        "health"
    }
}
