use std::sync::Arc;

use async_trait::async_trait;

use super::{Middleware, MiddlewareHandler};
use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::core::router::Router;
use crate::error::GatewayError;

/// Resolves the route and records it on the request context
pub struct RoutingMiddleware {
    router: Arc<dyn Router>,
}

impl RoutingMiddleware {
    pub fn new(router: Arc<dyn Router>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Middleware for RoutingMiddleware {
    async fn process_request(
        &self,
        mut request: GatewayRequest,
        next: Arc<dyn MiddlewareHandler>,
    ) -> Result<GatewayResponse, GatewayError> {
        let matched = self.router.resolve(&request.method, request.path())?;

        tracing::debug!(
            route = %matched.route.id,
            params = matched.params.len(),
            "Route resolved"
        );

        request.context.matched_route = Some(matched);
        next.handle(request).await
    }

    fn name(&self) -> &str {
        "routing"
    }
}
