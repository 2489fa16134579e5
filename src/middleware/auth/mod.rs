pub mod jwt;
pub mod models;

use std::sync::Arc;

use async_trait::async_trait;
use hyper::header::AUTHORIZATION;

use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::error::{AuthError, GatewayError};
use crate::middleware::logging::log_security_event;
use crate::middleware::{Middleware, MiddlewareHandler};
use crate::models::Principal;

pub use self::jwt::JwtAuthService;

/// Authentication service interface
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Validate a raw bearer token and return the caller it identifies
    async fn authenticate(&self, token: &str) -> Result<Principal, AuthError>;
}

/// Authentication gate.
///
/// Runs after routing so public routes can be let through untouched; a
/// rejection short-circuits before the cache and the forwarding engine.
pub struct AuthMiddleware {
    auth_service: Arc<dyn AuthService>,
}

impl AuthMiddleware {
    /// Create a new AuthMiddleware with the specified authentication service
    pub fn new(auth_service: Arc<dyn AuthService>) -> Self {
        Self { auth_service }
    }

    /// Extract the token from the Authorization header
    pub fn extract_token(request: &GatewayRequest) -> Result<&str, AuthError> {
        let header = request
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingToken)?;

        let value = header.to_str().map_err(|_| AuthError::MalformedHeader)?;
        let (scheme, token) = value.split_once(' ').ok_or(AuthError::MalformedHeader)?;

        let token = token.trim();
        if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
            return Err(AuthError::MalformedHeader);
        }

        Ok(token)
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    async fn process_request(
        &self,
        mut request: GatewayRequest,
        next: Arc<dyn MiddlewareHandler>,
    ) -> Result<GatewayResponse, GatewayError> {
        let required = request
            .context
            .matched_route
            .as_ref()
            .map_or(true, |m| m.route.auth_required);

        if !required {
            return next.handle(request).await;
        }

        let outcome = match Self::extract_token(&request) {
            Ok(token) => self.auth_service.authenticate(token).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(principal) => {
                tracing::debug!(subject = ?principal.subject, "Authentication successful");
                request.context.principal = Some(principal);
                next.handle(request).await
            }
            Err(err) => {
                log_security_event("authentication_failed", request.request_id(), &err.to_string());
                Err(GatewayError::AuthError(err))
            }
        }
    }

    fn name(&self) -> &str {
        "auth"
    }
}
