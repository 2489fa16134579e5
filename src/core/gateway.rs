use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ConnectInfo;
use axum::http::{Request, Response};
use hyper::Body;

use crate::config::GatewayConfig;
use crate::core::forwarder::{ForwardingEngine, HttpUpstreamClient, UpstreamClient};
use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::core::router::{Route, RouteTable, Router};
use crate::error::GatewayError;
use crate::middleware::auth::{AuthMiddleware, AuthService, JwtAuthService};
use crate::middleware::cache::{CacheMiddleware, CacheStats, CacheStore, MemoryStore};
use crate::middleware::cors::CorsMiddleware;
use crate::middleware::deadline::DeadlineMiddleware;
use crate::middleware::health::HealthMiddleware;
use crate::middleware::logging::LoggingMiddleware;
use crate::middleware::request_context::{
    RequestContextMiddleware, API_VERSION_HEADER, REQUEST_ID_HEADER,
};
use crate::middleware::routing::RoutingMiddleware;
use crate::middleware::{MiddlewareChain, MiddlewareHandler};

/// Core API Gateway trait that defines the main functionality
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Run a request through the pipeline; failures come back as error responses
    async fn process_request(&self, request: GatewayRequest) -> GatewayResponse;

    /// Bind the listener and start serving, returning the bound address
    async fn start(&self) -> Result<SocketAddr, GatewayError>;

    /// Stop the gateway server, letting in-flight requests finish
    async fn stop(&self) -> Result<(), GatewayError>;

    /// Check if the gateway is serving
    async fn health_check(&self) -> bool;
}

/// Server state that can be mutated
#[derive(Default)]
struct ServerState {
    /// Server handle for graceful shutdown
    server_handle: Option<tokio::task::JoinHandle<()>>,
    /// Shutdown signal sender
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    /// Expired-entry sweeper
    cleanup_handle: Option<tokio::task::JoinHandle<()>>,
    /// Bound listener address
    local_addr: Option<SocketAddr>,
}

/// Gateway orchestrator.
///
/// Owns the route table, the ordered stage list and the HTTP listener.
/// Stages run in this order: request context, logging, CORS, deadline,
/// liveness, routing, authentication, cache, then the forwarding engine.
#[derive(Clone)]
pub struct ApiGateway {
    config: Arc<GatewayConfig>,
    router: Arc<RouteTable>,
    pipeline: Arc<dyn MiddlewareHandler>,
    stages: Arc<Vec<String>>,
    cache: Option<Arc<MemoryStore>>,
    server_state: Arc<tokio::sync::Mutex<ServerState>>,
}

/// Assembles an [`ApiGateway`] from configuration
pub struct GatewayBuilder {
    config: GatewayConfig,
    upstream_client: Option<Arc<dyn UpstreamClient>>,
    auth_service: Option<Arc<dyn AuthService>>,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            upstream_client: None,
            auth_service: None,
        }
    }

    /// Replace the HTTP client used for outbound calls
    pub fn with_upstream_client(mut self, client: Arc<dyn UpstreamClient>) -> Self {
        self.upstream_client = Some(client);
        self
    }

    /// Replace the token validator built from `auth` settings
    pub fn with_auth_service(mut self, service: Arc<dyn AuthService>) -> Self {
        self.auth_service = Some(service);
        self
    }

    /// Validate the configuration, build the route table and assemble the pipeline
    pub fn build(self) -> Result<ApiGateway, GatewayError> {
        let config = self.config;
        config.validate()?;

        let router = Arc::new(RouteTable::new(config.routes.clone())?);

        let upstream_client: Arc<dyn UpstreamClient> = match self.upstream_client {
            Some(client) => client,
            None => Arc::new(HttpUpstreamClient::new()?),
        };

        let mut chain = MiddlewareChain::new();
        chain.add(RequestContextMiddleware::new(&config.server.api_version));
        chain.add(LoggingMiddleware::from_config(&config.logging));
        chain.add(CorsMiddleware::new(config.cors.clone()));
        chain.add(DeadlineMiddleware::new(Duration::from_secs(
            config.server.request_timeout,
        )));
        chain.add(HealthMiddleware::new(config.server.health_path.clone()));
        chain.add(RoutingMiddleware::new(router.clone()));

        if config.auth.enabled {
            let service: Arc<dyn AuthService> = match self.auth_service {
                Some(service) => service,
                None => Arc::new(JwtAuthService::from_config(&config.auth)?),
            };
            chain.add(AuthMiddleware::new(service));
        }

        let cache = if config.cache.enabled {
            let store = Arc::new(match config.cache.max_entries {
                Some(max_entries) => MemoryStore::with_max_entries(max_entries),
                None => MemoryStore::new(),
            });
            chain.add(
                CacheMiddleware::new(store.clone()).with_single_flight(config.cache.single_flight),
            );
            Some(store)
        } else {
            None
        };

        let stages = chain.names();
        let pipeline = chain.build(Arc::new(ForwardingEngine::new(upstream_client)));

        tracing::info!(
            routes = router.len(),
            stages = ?stages,
            "Gateway pipeline assembled"
        );

        Ok(ApiGateway {
            config: Arc::new(config),
            router,
            pipeline,
            stages: Arc::new(stages),
            cache,
            server_state: Arc::new(tokio::sync::Mutex::new(ServerState::default())),
        })
    }
}

impl ApiGateway {
    /// Build a gateway with the default HTTP client and JWT validator
    pub fn from_config(config: GatewayConfig) -> Result<Self, GatewayError> {
        GatewayBuilder::new(config).build()
    }

    /// Builder for customizing collaborators
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    /// Stage names in execution order
    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    /// Routes in definition order
    pub fn routes(&self) -> Vec<Arc<Route>> {
        self.router.routes()
    }

    /// The response cache, when caching is enabled
    pub fn cache_store(&self) -> Option<Arc<dyn CacheStore>> {
        self.cache.clone().map(|store| store as Arc<dyn CacheStore>)
    }

    /// Cache statistics, when caching is enabled
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|store| store.stats())
    }

    /// Address the listener is bound to, once started
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.server_state.lock().await.local_addr
    }

    fn to_http_response(response: GatewayResponse) -> Response<Body> {
        let mut http_response = Response::new(Body::from(response.body));
        *http_response.status_mut() = response.status;
        *http_response.headers_mut() = response.headers;
        http_response
    }

    /// Error response for failures before the pipeline runs
    fn early_error(&self, error: &GatewayError) -> GatewayResponse {
        let request_id = crate::utils::generate_id();
        let mut response = GatewayResponse::from_error(error, &request_id);
        response.set_header(REQUEST_ID_HEADER, &request_id);
        response.set_header(API_VERSION_HEADER, &self.config.server.api_version);
        response
    }

    async fn serve_http(&self, request: Request<Body>, peer: SocketAddr) -> Response<Body> {
        let (parts, body) = request.into_parts();
        let body = match hyper::body::to_bytes(body).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read request body");
                return Self::to_http_response(
                    self.early_error(&GatewayError::InvalidRequest(
                        "failed to read request body".to_string(),
                    )),
                );
            }
        };

        let request = GatewayRequest::new(
            parts.method,
            parts.uri,
            parts.headers,
            body,
            Some(peer.ip()),
        );

        Self::to_http_response(self.process_request(request).await)
    }
}

#[async_trait]
impl Gateway for ApiGateway {
    async fn process_request(&self, request: GatewayRequest) -> GatewayResponse {
        let request_id = request.request_id().to_string();
        match self.pipeline.handle(request).await {
            Ok(response) => response,
            Err(error) => GatewayResponse::from_error(&error, &request_id),
        }
    }

    async fn start(&self) -> Result<SocketAddr, GatewayError> {
        let mut server_state = self.server_state.lock().await;
        if server_state.server_handle.is_some() {
            return Err(GatewayError::InternalError(
                "Server is already running".to_string(),
            ));
        }

        let gateway = self.clone();
        let app = axum::Router::new()
            .fallback(
                move |ConnectInfo(peer): ConnectInfo<SocketAddr>, request: Request<Body>| {
                    let gateway = gateway.clone();
                    async move { gateway.serve_http(request, peer).await }
                },
            )
            .layer(tower_http::trace::TraceLayer::new_for_http());

        let listener = TcpListener::bind((self.config.server.host.as_str(), self.config.server.port))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let server = axum::Server::from_tcp(listener)
            .map_err(|e| GatewayError::InternalError(format!("Failed to start server: {}", e)))?
            .serve(app.into_make_service_with_connect_info::<SocketAddr>());

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let server_handle = tokio::spawn(async move {
            let graceful = server.with_graceful_shutdown(async {
                shutdown_rx.await.ok();
                tracing::info!("Shutdown signal received, starting graceful shutdown");
            });

            if let Err(e) = graceful.await {
                tracing::error!(error = %e, "Server error");
            }

            tracing::info!(%addr, "Server has been shut down");
        });

        if let Some(store) = &self.cache {
            let interval = self.config.cache.cleanup_interval_seconds;
            if interval > 0 {
                server_state.cleanup_handle =
                    Some(store.spawn_cleanup_task(Duration::from_secs(interval)));
            }
        }

        server_state.server_handle = Some(server_handle);
        server_state.shutdown_tx = Some(shutdown_tx);
        server_state.local_addr = Some(addr);

        tracing::info!(%addr, "API Gateway listening");
        Ok(addr)
    }

    async fn stop(&self) -> Result<(), GatewayError> {
        let mut server_state = self.server_state.lock().await;

        let handle = server_state.server_handle.take().ok_or_else(|| {
            GatewayError::InternalError("Server is not running".to_string())
        })?;

        if let Some(tx) = server_state.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(cleanup) = server_state.cleanup_handle.take() {
            cleanup.abort();
        }

        server_state.local_addr = None;

        handle.await.map_err(|e| {
            tracing::error!(error = %e, "Error while shutting down server");
            GatewayError::InternalError(format!("Error while shutting down server: {}", e))
        })?;

        tracing::info!("Server has been shut down gracefully");
        Ok(())
    }

    async fn health_check(&self) -> bool {
        let server_state = self.server_state.lock().await;
        server_state
            .server_handle
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use hyper::{HeaderMap, Method, StatusCode, Uri};

    use super::*;
    use crate::config::RouteDefinition;
    use crate::core::forwarder::{UpstreamRequest, UpstreamResponse};
    use crate::error::UpstreamFailure;
    use crate::models::UpstreamTarget;

    #[derive(Default)]
    struct EchoClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl UpstreamClient for EchoClient {
        async fn send(
            &self,
            _target: &UpstreamTarget,
            request: UpstreamRequest,
        ) -> Result<UpstreamResponse, UpstreamFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(UpstreamResponse {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: Bytes::from(request.url),
            })
        }
    }

    fn config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.server.port = 0;
        config.routes = vec![RouteDefinition::new(
            "/orders/{id}",
            vec![UpstreamTarget::new("orders", 8080)],
        )
        .with_methods(&["GET"])
        .with_cache_ttl(60)];
        config
    }

    fn get(uri: &'static str) -> GatewayRequest {
        GatewayRequest::new(Method::GET, Uri::from_static(uri), HeaderMap::new(), Bytes::new(), None)
    }

    #[tokio::test]
    async fn test_stage_order() {
        let gateway = ApiGateway::builder(config())
            .with_upstream_client(Arc::new(EchoClient::default()))
            .build()
            .unwrap();

        assert_eq!(
            gateway.stages(),
            ["request_context", "logging", "cors", "deadline", "health", "routing", "cache"]
        );
    }

    #[tokio::test]
    async fn test_process_request_never_fails() {
        let client = Arc::new(EchoClient::default());
        let gateway = ApiGateway::builder(config())
            .with_upstream_client(client.clone())
            .build()
            .unwrap();

        let ok = gateway.process_request(get("/orders/42")).await;
        assert_eq!(ok.status, StatusCode::OK);
        assert_eq!(&ok.body[..], b"http://orders:8080/orders/42");

        let missing = gateway.process_request(get("/nope")).await;
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
        assert!(missing.headers.contains_key("x-request-id"));
        assert_eq!(missing.headers.get("x-api-version").unwrap(), "1.0.0");

        let health = gateway.process_request(get("/health")).await;
        assert_eq!(health.status, StatusCode::OK);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    struct StalledClient;

    #[async_trait]
    impl UpstreamClient for StalledClient {
        async fn send(
            &self,
            _target: &UpstreamTarget,
            _request: UpstreamRequest,
        ) -> Result<UpstreamResponse, UpstreamFailure> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(UpstreamFailure::Timeout("orders:8080".into()))
        }
    }

    fn from_origin(uri: &'static str) -> GatewayRequest {
        let mut request = get(uri);
        request.headers.insert(
            hyper::header::ORIGIN,
            hyper::header::HeaderValue::from_static("https://app.example.com"),
        );
        request
    }

    fn allow_origin(response: &GatewayResponse) -> Option<&str> {
        response
            .headers
            .get(hyper::header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok())
    }

    #[tokio::test]
    async fn test_allowed_origin_sees_every_outcome() {
        let mut config = config();
        config.cors.allowed_origins = vec!["https://app.example.com".to_string()];
        config.auth.enabled = true;
        config.auth.secret_key = Some("gateway-secret".to_string());
        config.auth.issuer = Some("https://idp.example.com".to_string());
        config.auth.audience = Some("orders-api".to_string());

        let client = Arc::new(EchoClient::default());
        let gateway = ApiGateway::builder(config)
            .with_upstream_client(client.clone())
            .build()
            .unwrap();

        let unauthorized = gateway.process_request(from_origin("/orders/42")).await;
        assert_eq!(unauthorized.status, StatusCode::UNAUTHORIZED);
        assert_eq!(allow_origin(&unauthorized), Some("https://app.example.com"));
        assert_eq!(unauthorized.headers.get("www-authenticate").unwrap(), "Bearer");
        assert!(unauthorized.headers.contains_key("x-request-id"));

        let missing = gateway.process_request(from_origin("/nope")).await;
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
        assert_eq!(allow_origin(&missing), Some("https://app.example.com"));

        let health = gateway.process_request(from_origin("/health")).await;
        assert_eq!(health.status, StatusCode::OK);
        assert_eq!(allow_origin(&health), Some("https://app.example.com"));

        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_deadline_applies_inside_logging_and_cors() {
        let mut config = config();
        config.server.request_timeout = 1;
        config.cors.allowed_origins = vec!["https://app.example.com".to_string()];
        let gateway = ApiGateway::builder(config)
            .with_upstream_client(Arc::new(StalledClient))
            .build()
            .unwrap();

        let stages = gateway.stages();
        let position = |name: &str| stages.iter().position(|s| s == name).unwrap();
        assert!(position("logging") < position("deadline"));
        assert!(position("cors") < position("deadline"));

        let response = gateway.process_request(from_origin("/orders/42")).await;
        assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(allow_origin(&response), Some("https://app.example.com"));
        assert!(response.headers.contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_early_error_is_stamped() {
        let gateway = ApiGateway::builder(config())
            .with_upstream_client(Arc::new(EchoClient::default()))
            .build()
            .unwrap();

        let response =
            gateway.early_error(&GatewayError::InvalidRequest("failed to read request body".into()));
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert!(response.headers.contains_key("x-request-id"));
        assert_eq!(response.headers.get("x-api-version").unwrap(), "1.0.0");
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["status"], 400);
    }

    #[tokio::test]
    async fn test_invalid_configuration_fails_build() {
        let mut bad = config();
        bad.routes.push(
            RouteDefinition::new("/orders/{orderId}", vec![UpstreamTarget::new("orders", 8080)])
                .with_methods(&["GET"]),
        );
        assert!(matches!(
            ApiGateway::from_config(bad),
            Err(GatewayError::ConfigError(_))
        ));

        let mut no_secret = config();
        no_secret.auth.enabled = true;
        assert!(ApiGateway::from_config(no_secret).is_err());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let gateway = ApiGateway::builder(config())
            .with_upstream_client(Arc::new(EchoClient::default()))
            .build()
            .unwrap();

        let addr = gateway.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(gateway.local_addr().await, Some(addr));
        assert!(gateway.health_check().await);
        assert!(gateway.start().await.is_err());

        let body = reqwest::get(format!("http://{}/health", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "Healthy");

        gateway.stop().await.unwrap();
        assert!(!gateway.health_check().await);
        assert!(gateway.stop().await.is_err());
    }
}
