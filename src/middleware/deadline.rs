use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{Middleware, MiddlewareHandler};
use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::error::GatewayError;
use crate::utils::duration_to_millis;

/// Overall request deadline; dropping the inner future cancels any outbound call
pub struct DeadlineMiddleware {
    timeout: Duration,
}

impl DeadlineMiddleware {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Middleware for DeadlineMiddleware {
    async fn process_request(
        &self,
        request: GatewayRequest,
        next: Arc<dyn MiddlewareHandler>,
    ) -> Result<GatewayResponse, GatewayError> {
        let request_id = request.request_id().to_string();

        match tokio::time::timeout(self.timeout, next.handle(request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    request_id = %request_id,
                    timeout_ms = duration_to_millis(self.timeout),
                    "Request deadline exceeded"
                );
                Err(GatewayError::RequestTimeout)
            }
        }
    }

    fn name(&self) -> &str {
        "deadline"
    }
}

#[cfg(test)]
mod tests {
    use hyper::{Method, StatusCode};

    use super::*;
    use crate::middleware::test_support::{request, Recorder};

    struct Slow;

    #[async_trait]
    impl MiddlewareHandler for Slow {
        async fn handle(&self, _request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(GatewayResponse::text(StatusCode::OK, "late"))
        }
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let stage = DeadlineMiddleware::new(Duration::from_millis(20));
        let result = stage.process_request(request(Method::GET, "/"), Arc::new(Slow)).await;
        assert!(matches!(result, Err(GatewayError::RequestTimeout)));
    }

    #[tokio::test]
    async fn test_fast_requests_pass() {
        let stage = DeadlineMiddleware::new(Duration::from_secs(1));
        let response = stage
            .process_request(request(Method::GET, "/"), Arc::new(Recorder::default()))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
    }
}
