use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hyper::header::{HeaderValue, CONTENT_LENGTH, HOST};
use hyper::{HeaderMap, Method, StatusCode};

use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::core::router::RouteMatch;
use crate::error::{GatewayError, UpstreamFailure};
use crate::load_balancer::rotate;
use crate::middleware::MiddlewareHandler;
use crate::models::UpstreamTarget;
use crate::utils::strip_hop_by_hop;

const X_REQUEST_ID: &str = "x-request-id";
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Outbound request for one attempt
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    /// Absolute URL including the query string
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Per-attempt timeout
    pub timeout: Duration,
}

/// What the upstream answered, whatever the status
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Performs a single outbound call
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn send(
        &self,
        target: &UpstreamTarget,
        request: UpstreamRequest,
    ) -> Result<UpstreamResponse, UpstreamFailure>;
}

/// `UpstreamClient` backed by a pooled reqwest client
pub struct HttpUpstreamClient {
    client: reqwest::Client,
}

impl HttpUpstreamClient {
    pub fn new() -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| GatewayError::InternalError(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    fn classify(target: &UpstreamTarget, error: reqwest::Error) -> UpstreamFailure {
        if error.is_timeout() {
            UpstreamFailure::Timeout(target.to_string())
        } else if error.is_connect() {
            UpstreamFailure::Connect {
                target: target.to_string(),
                reason: error.to_string(),
            }
        } else {
            UpstreamFailure::Transport {
                target: target.to_string(),
                reason: error.to_string(),
            }
        }
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn send(
        &self,
        target: &UpstreamTarget,
        request: UpstreamRequest,
    ) -> Result<UpstreamResponse, UpstreamFailure> {
        let response = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .body(request.body)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| Self::classify(target, e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| Self::classify(target, e))?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// Final pipeline handler: picks a target, calls it and retries transport
/// failures against the next target in rotation.
pub struct ForwardingEngine {
    client: Arc<dyn UpstreamClient>,
}

impl ForwardingEngine {
    pub fn new(client: Arc<dyn UpstreamClient>) -> Self {
        Self { client }
    }

    /// Forward a request along its resolved route
    pub async fn forward(
        &self,
        matched: &RouteMatch,
        request: &GatewayRequest,
    ) -> Result<GatewayResponse, GatewayError> {
        let route = &matched.route;
        let start = route.balancer().select(&route.upstreams)?;
        let attempts = route.retry_count + 1;

        let path = matched.downstream_path(request.path());
        let query = request.query().map(|q| format!("?{}", q)).unwrap_or_default();
        let headers = outbound_headers(request);

        let mut attempt: u32 = 0;
        loop {
            let target = &route.upstreams[rotate(start, attempt as usize, route.upstreams.len())];
            let outbound = UpstreamRequest {
                method: request.method.clone(),
                url: format!(
                    "{}://{}{}{}",
                    route.downstream_scheme,
                    target.authority(),
                    path,
                    query
                ),
                headers: headers.clone(),
                body: request.body.clone(),
                timeout: route.timeout,
            };

            attempt += 1;
            match self.client.send(target, outbound).await {
                Ok(upstream) => {
                    tracing::debug!(
                        route = %route.id,
                        upstream = %target,
                        attempt,
                        status = upstream.status.as_u16(),
                        "Upstream responded"
                    );

                    let mut headers = upstream.headers;
                    strip_hop_by_hop(&mut headers);
                    headers.remove(CONTENT_LENGTH);

                    return Ok(GatewayResponse::new(upstream.status, headers, upstream.body)
                        .with_upstream(target.to_string(), attempt));
                }
                Err(failure) => {
                    tracing::warn!(
                        route = %route.id,
                        upstream = %target,
                        attempt,
                        max_attempts = attempts,
                        error = %failure,
                        "Upstream attempt failed"
                    );

                    if attempt >= attempts || !failure.is_retryable() {
                        return Err(GatewayError::UpstreamUnavailable {
                            attempts: attempt,
                            cause: failure,
                        });
                    }
                }
            }
        }
    }
}

#[async_trait]
impl MiddlewareHandler for ForwardingEngine {
    async fn handle(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let matched = request
            .context
            .matched_route
            .clone()
            .ok_or_else(|| GatewayError::InternalError("request reached the forwarder unrouted".into()))?;

        self.forward(&matched, &request).await
    }
}

/// Inbound headers minus hop-by-hop ones, plus correlation and forwarding headers
fn outbound_headers(request: &GatewayRequest) -> HeaderMap {
    let mut headers = request.headers.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(CONTENT_LENGTH);
    let inbound_host = headers.remove(HOST);

    if let Ok(value) = HeaderValue::from_str(request.request_id()) {
        headers.insert(X_REQUEST_ID, value);
    }

    if let Some(ip) = request.client_ip {
        let forwarded_for = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{}, {}", existing, ip),
            None => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    if let Some(host) = inbound_host {
        headers.insert(X_FORWARDED_HOST, host);
    }

    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    headers
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;

    use hyper::Uri;

    use super::*;
    use crate::config::RouteDefinition;
    use crate::core::router::{RouteTable, Router};

    enum Step {
        Respond(u16, &'static str),
        Fail(fn(&UpstreamTarget) -> UpstreamFailure),
    }

    fn timeout(target: &UpstreamTarget) -> UpstreamFailure {
        UpstreamFailure::Timeout(target.to_string())
    }

    fn refused(target: &UpstreamTarget) -> UpstreamFailure {
        UpstreamFailure::Connect {
            target: target.to_string(),
            reason: "connection refused".into(),
        }
    }

    fn reset(target: &UpstreamTarget) -> UpstreamFailure {
        UpstreamFailure::Transport {
            target: target.to_string(),
            reason: "connection reset while reading body".into(),
        }
    }

    /// Plays back a fixed sequence of outcomes and records every call
    struct ScriptedClient {
        script: Mutex<VecDeque<Step>>,
        calls: Mutex<Vec<(String, UpstreamRequest)>>,
    }

    impl ScriptedClient {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(steps.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn targets(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
        }
    }

    #[async_trait]
    impl UpstreamClient for ScriptedClient {
        async fn send(
            &self,
            target: &UpstreamTarget,
            request: UpstreamRequest,
        ) -> Result<UpstreamResponse, UpstreamFailure> {
            self.calls.lock().unwrap().push((target.to_string(), request));
            match self.script.lock().unwrap().pop_front() {
                Some(Step::Respond(status, body)) => {
                    let mut headers = HeaderMap::new();
                    headers.insert("content-type", HeaderValue::from_static("application/json"));
                    headers.insert("connection", HeaderValue::from_static("close"));
                    headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
                    Ok(UpstreamResponse {
                        status: StatusCode::from_u16(status).unwrap(),
                        headers,
                        body: Bytes::from_static(body.as_bytes()),
                    })
                }
                Some(Step::Fail(failure)) => Err(failure(target)),
                None => panic!("script exhausted"),
            }
        }
    }

    fn routed(definition: RouteDefinition, uri: &'static str) -> (RouteMatch, GatewayRequest) {
        let table = RouteTable::new(vec![definition]).unwrap();
        let request = GatewayRequest::new(
            Method::GET,
            Uri::from_static(uri),
            HeaderMap::new(),
            Bytes::new(),
            Some(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))),
        );
        let matched = table.resolve(&Method::GET, request.path()).unwrap();
        (matched, request)
    }

    fn two_targets() -> Vec<UpstreamTarget> {
        vec![
            UpstreamTarget::new("upstream-a", 8080),
            UpstreamTarget::new("upstream-b", 8080),
        ]
    }

    #[tokio::test]
    async fn test_retries_then_succeeds_on_next_targets() {
        let client = ScriptedClient::new(vec![
            Step::Fail(refused),
            Step::Fail(timeout),
            Step::Respond(200, "{\"id\":42}"),
        ]);
        let engine = ForwardingEngine::new(client.clone());
        let (matched, request) = routed(
            RouteDefinition::new("/orders/{id}", two_targets()).with_retries(3),
            "/orders/42",
        );

        let response = engine.forward(&matched, &request).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(&response.body[..], b"{\"id\":42}");
        assert_eq!(response.attempts, 3);
        assert_eq!(
            client.targets(),
            vec!["upstream-a:8080", "upstream-b:8080", "upstream-a:8080"]
        );
    }

    #[tokio::test]
    async fn test_upstream_errors_are_relayed_without_retry() {
        let client = ScriptedClient::new(vec![Step::Respond(500, "{\"error\":\"db down\"}")]);
        let engine = ForwardingEngine::new(client.clone());
        let (matched, request) = routed(
            RouteDefinition::new("/orders/{id}", two_targets()).with_retries(3),
            "/orders/42",
        );

        let response = engine.forward(&matched, &request).await.unwrap();

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(&response.body[..], b"{\"error\":\"db down\"}");
        assert_eq!(client.targets().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_attempts() {
        let client = ScriptedClient::new(vec![Step::Fail(refused), Step::Fail(timeout)]);
        let engine = ForwardingEngine::new(client.clone());
        let (matched, request) = routed(
            RouteDefinition::new("/orders/{id}", two_targets()).with_retries(1),
            "/orders/42",
        );

        let error = engine.forward(&matched, &request).await.unwrap_err();
        assert!(matches!(
            error,
            GatewayError::UpstreamUnavailable { attempts: 2, cause: UpstreamFailure::Timeout(_) }
        ));
        assert_eq!(error.status_code(), 504);

        let client = ScriptedClient::new(vec![Step::Fail(refused)]);
        let engine = ForwardingEngine::new(client);
        let (matched, request) = routed(
            RouteDefinition::new("/orders/{id}", two_targets()),
            "/orders/42",
        );
        let error = engine.forward(&matched, &request).await.unwrap_err();
        assert_eq!(error.status_code(), 502);
    }

    #[tokio::test]
    async fn test_transport_errors_are_not_retried() {
        let client = ScriptedClient::new(vec![Step::Fail(reset), Step::Respond(200, "{}")]);
        let engine = ForwardingEngine::new(client.clone());
        let (matched, request) = routed(
            RouteDefinition::new("/orders/{id}", two_targets()).with_retries(3),
            "/orders/42",
        );

        let error = engine.forward(&matched, &request).await.unwrap_err();
        assert!(matches!(
            error,
            GatewayError::UpstreamUnavailable { attempts: 1, cause: UpstreamFailure::Transport { .. } }
        ));
        assert_eq!(error.status_code(), 502);
        assert_eq!(client.targets(), vec!["upstream-a:8080"]);
    }

    #[tokio::test]
    async fn test_single_target_is_retried() {
        let client = ScriptedClient::new(vec![Step::Fail(refused), Step::Respond(204, "")]);
        let engine = ForwardingEngine::new(client.clone());
        let (matched, request) = routed(
            RouteDefinition::new("/ping", vec![UpstreamTarget::new("solo", 9000)]).with_retries(2),
            "/ping",
        );

        let response = engine.forward(&matched, &request).await.unwrap();
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert_eq!(client.targets(), vec!["solo:9000", "solo:9000"]);
    }

    #[tokio::test]
    async fn test_round_robin_across_requests() {
        let client = ScriptedClient::new(vec![
            Step::Respond(200, "a"),
            Step::Respond(200, "b"),
            Step::Respond(200, "c"),
        ]);
        let engine = ForwardingEngine::new(client.clone());
        let (matched, request) = routed(RouteDefinition::new("/orders", two_targets()), "/orders");

        for _ in 0..3 {
            engine.forward(&matched, &request).await.unwrap();
        }
        assert_eq!(
            client.targets(),
            vec!["upstream-a:8080", "upstream-b:8080", "upstream-a:8080"]
        );
    }

    #[tokio::test]
    async fn test_outbound_request_shape() {
        let client = ScriptedClient::new(vec![Step::Respond(200, "{}")]);
        let engine = ForwardingEngine::new(client.clone());
        let (matched, mut request) = routed(
            RouteDefinition::new("/orders/{id}", two_targets())
                .with_downstream_path("/api/orders/{id}"),
            "/orders/42?expand=lines",
        );
        request.headers.insert(HOST, HeaderValue::from_static("gateway.example.com"));
        request.headers.insert("connection", HeaderValue::from_static("keep-alive"));
        request.headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9"));
        request.headers.insert("accept", HeaderValue::from_static("application/json"));

        let response = engine.forward(&matched, &request).await.unwrap();

        let calls = client.calls.lock().unwrap();
        let (_, outbound) = &calls[0];
        assert_eq!(outbound.url, "http://upstream-a:8080/api/orders/42?expand=lines");
        assert_eq!(outbound.method, Method::GET);
        assert_eq!(outbound.headers.get("accept").unwrap(), "application/json");
        assert_eq!(outbound.headers.get("x-request-id").unwrap(), request.request_id());
        assert_eq!(outbound.headers.get("x-forwarded-for").unwrap(), "203.0.113.9, 10.1.2.3");
        assert_eq!(outbound.headers.get("x-forwarded-host").unwrap(), "gateway.example.com");
        assert_eq!(outbound.headers.get("x-forwarded-proto").unwrap(), "http");
        assert!(outbound.headers.get(HOST).is_none());
        assert!(outbound.headers.get("connection").is_none());
        assert_eq!(outbound.timeout, Duration::from_millis(30_000));

        assert!(response.headers.get("connection").is_none());
        assert!(response.headers.get("transfer-encoding").is_none());
        assert_eq!(response.headers.get("content-type").unwrap(), "application/json");
    }

    #[tokio::test]
    async fn test_unrouted_request_is_an_internal_error() {
        let engine = ForwardingEngine::new(ScriptedClient::new(vec![]));
        let request = GatewayRequest::new(
            Method::GET,
            Uri::from_static("/x"),
            HeaderMap::new(),
            Bytes::new(),
            None,
        );
        assert!(matches!(
            engine.handle(request).await,
            Err(GatewayError::InternalError(_))
        ));
    }

    #[tokio::test]
    async fn test_http_client_reports_refused_connections() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = HttpUpstreamClient::new().unwrap();
        let target = UpstreamTarget::new("127.0.0.1", port);
        let result = client
            .send(
                &target,
                UpstreamRequest {
                    method: Method::GET,
                    url: format!("http://127.0.0.1:{}/", port),
                    headers: HeaderMap::new(),
                    body: Bytes::new(),
                    timeout: Duration::from_secs(2),
                },
            )
            .await;

        assert!(matches!(result, Err(UpstreamFailure::Connect { .. })));
    }
}
