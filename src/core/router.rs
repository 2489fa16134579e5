use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use hyper::Method;
use regex::Regex;

use crate::config::RouteDefinition;
use crate::error::{ConfigError, GatewayError};
use crate::load_balancer::{LoadBalanceStrategy, LoadBalanceStrategyFactory};
use crate::models::UpstreamTarget;

const KNOWN_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS", "TRACE", "CONNECT",
];

/// Route parameter extracted from path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteParam {
    /// Parameter name
    pub name: String,

    /// Parameter value
    pub value: String,
}

/// Cache policy of a route
#[derive(Debug, Clone, PartialEq)]
pub struct RouteCachePolicy {
    /// Entry lifetime
    pub ttl: Duration,

    /// Key prefix used for grouped invalidation
    pub region: String,

    /// Request headers that take part in the cache key
    pub vary_by_headers: Vec<String>,
}

/// A validated, immutable route
pub struct Route {
    /// Route id
    pub id: String,

    /// Allowed methods (empty means any method)
    pub methods: Vec<Method>,

    /// Inbound path pattern
    pub path: String,

    /// Outbound path template
    pub downstream_path: Option<String>,

    /// Outbound scheme
    pub downstream_scheme: String,

    /// Upstream targets in configuration order
    pub upstreams: Vec<UpstreamTarget>,

    /// Per-attempt timeout
    pub timeout: Duration,

    /// Retries after a transport failure
    pub retry_count: u32,

    /// Cache policy, if the route is cacheable
    pub cache: Option<RouteCachePolicy>,

    /// Whether a bearer token is required
    pub auth_required: bool,

    pattern: PathPattern,
    balancer: Box<dyn LoadBalanceStrategy + Send + Sync>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("methods", &self.methods)
            .field("path", &self.path)
            .field("upstreams", &self.upstreams)
            .field("load_balancer", &self.balancer.name())
            .finish_non_exhaustive()
    }
}

impl Route {
    /// Build a route from its definition
    pub fn from_definition(definition: RouteDefinition) -> Result<Self, ConfigError> {
        let pattern = PathPattern::new(&definition.path)?;

        let mut methods = Vec::with_capacity(definition.methods.len());
        for raw in &definition.methods {
            let upper = raw.to_ascii_uppercase();
            if !KNOWN_METHODS.contains(&upper.as_str()) {
                return Err(invalid(format!(
                    "route '{}': unknown HTTP method '{}'",
                    definition.path, raw
                )));
            }
            let method = Method::from_str(&upper)
                .map_err(|e| invalid(format!("route '{}': {}", definition.path, e)))?;
            if !methods.contains(&method) {
                methods.push(method);
            }
        }

        let id = definition.id.clone().unwrap_or_else(|| {
            let methods = if methods.is_empty() {
                "ANY".to_string()
            } else {
                methods.iter().map(Method::as_str).collect::<Vec<_>>().join(",")
            };
            format!("{} {}", methods, definition.path)
        });

        if definition.upstreams.is_empty() {
            return Err(invalid(format!("route '{}': no upstream targets", id)));
        }
        for target in &definition.upstreams {
            if target.host.trim().is_empty() {
                return Err(invalid(format!("route '{}': upstream host is empty", id)));
            }
            if target.port == 0 {
                return Err(invalid(format!(
                    "route '{}': upstream {} has port 0",
                    id, target.host
                )));
            }
        }

        let balancer = LoadBalanceStrategyFactory::create(&definition.load_balancer)
            .map_err(|e| invalid(format!("route '{}': {}", id, e)))?;
        if balancer.name() == "weighted_round_robin"
            && definition.upstreams.iter().any(|t| t.weight == 0)
        {
            return Err(invalid(format!(
                "route '{}': weighted targets need a weight of at least 1",
                id
            )));
        }

        match definition.downstream_scheme.as_str() {
            "http" | "https" => {}
            other => {
                return Err(invalid(format!(
                    "route '{}': unsupported downstream scheme '{}'",
                    id, other
                )))
            }
        }

        if let Some(template) = &definition.downstream_path {
            if !template.starts_with('/') {
                return Err(invalid(format!(
                    "route '{}': downstream path must start with '/'",
                    id
                )));
            }
        }

        if definition.timeout_ms == 0 {
            return Err(invalid(format!("route '{}': timeout must be positive", id)));
        }

        let cache = definition.cache.map(|c| RouteCachePolicy {
            ttl: Duration::from_secs(c.ttl_seconds),
            region: c.region.unwrap_or_else(|| id.clone()),
            vary_by_headers: c
                .vary_by_headers
                .into_iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
        });

        if matches!(&cache, Some(policy) if policy.ttl.is_zero()) {
            return Err(invalid(format!("route '{}': cache ttl must be positive", id)));
        }

        Ok(Self {
            id,
            methods,
            path: definition.path,
            downstream_path: definition.downstream_path,
            downstream_scheme: definition.downstream_scheme,
            upstreams: definition.upstreams,
            timeout: Duration::from_millis(definition.timeout_ms),
            retry_count: definition.retry_count,
            cache,
            auth_required: definition.auth_required,
            pattern,
            balancer,
        })
    }

    /// Whether the route accepts the method
    pub fn allows(&self, method: &Method) -> bool {
        self.methods.is_empty() || self.methods.contains(method)
    }

    /// Load balancer owned by this route
    pub fn balancer(&self) -> &dyn LoadBalanceStrategy {
        self.balancer.as_ref()
    }

    fn overlaps(&self, other: &Route) -> bool {
        if self.pattern.shape() != other.pattern.shape() {
            return false;
        }
        match (self.methods.is_empty(), other.methods.is_empty()) {
            (true, true) => true,
            (false, false) => self.methods.iter().any(|m| other.methods.contains(m)),
            _ => false,
        }
    }
}

/// Route match result
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// Matched route
    pub route: Arc<Route>,

    /// Extracted path parameters
    pub params: Vec<RouteParam>,
}

impl RouteMatch {
    /// Value of a captured parameter
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// Outbound path: the downstream template with captured parameters
    /// substituted, or the inbound path when the route has no template.
    pub fn downstream_path(&self, inbound_path: &str) -> String {
        let template = match &self.route.downstream_path {
            Some(template) => template,
            None => return inbound_path.to_string(),
        };

        let substituted: Vec<String> = template
            .split('/')
            .map(|segment| match Segment::parse(segment) {
                Ok(Segment::Param(name)) | Ok(Segment::CatchAll(Some(name))) => self
                    .param(&name)
                    .map(str::to_string)
                    .unwrap_or_else(|| segment.to_string()),
                _ => segment.to_string(),
            })
            .collect();

        let joined = substituted.join("/");
        // An empty catch-all leaves a dangling separator
        if joined.len() > 1 && joined.ends_with('/') && !template.ends_with('/') {
            joined.trim_end_matches('/').to_string()
        } else {
            joined
        }
    }
}

/// Router trait for matching requests to routes
pub trait Router: Send + Sync {
    /// Find the route for a method and path
    fn resolve(&self, method: &Method, path: &str) -> Result<RouteMatch, GatewayError>;

    /// Get all routes
    fn routes(&self) -> Vec<Arc<Route>>;
}

/// Path segment of a route pattern
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
    CatchAll(Option<String>),
}

impl Segment {
    fn parse(raw: &str) -> Result<Self, String> {
        if raw == "*" {
            return Ok(Segment::Wildcard);
        }
        if raw == "**" {
            return Ok(Segment::CatchAll(None));
        }
        if let Some(inner) = raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            return match inner.strip_prefix('*') {
                Some(name) => Ok(Segment::CatchAll(Some(valid_name(name)?))),
                None => Ok(Segment::Param(valid_name(inner)?)),
            };
        }
        if let Some(name) = raw.strip_prefix(':') {
            return Ok(Segment::Param(valid_name(name)?));
        }
        if raw.contains('{') || raw.contains('}') {
            return Err(format!("malformed segment '{}'", raw));
        }
        Ok(Segment::Literal(raw.to_string()))
    }

    /// Literal beats parameter beats catch-all
    fn rank(&self) -> u8 {
        match self {
            Segment::Literal(_) => 3,
            Segment::Param(_) | Segment::Wildcard => 2,
            Segment::CatchAll(_) => 1,
        }
    }
}

fn valid_name(name: &str) -> Result<String, String> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("invalid parameter name '{}'", name));
    }
    Ok(name.to_string())
}

/// Path pattern for route matching
#[derive(Debug, Clone)]
struct PathPattern {
    /// Parsed segments
    segments: Vec<Segment>,

    /// Compiled regex for matching
    regex: Regex,

    /// Name of each capture group, None for anonymous catch-alls
    captures: Vec<Option<String>>,
}

impl PathPattern {
    /// Create a new path pattern from a path string
    fn new(path: &str) -> Result<Self, ConfigError> {
        if !path.starts_with('/') {
            return Err(invalid(format!(
                "route pattern '{}' must start with '/'",
                path
            )));
        }

        let trimmed = path.trim_start_matches('/');
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);

        let mut segments = Vec::new();
        if !trimmed.is_empty() {
            for raw in trimmed.split('/') {
                if raw.is_empty() {
                    return Err(invalid(format!(
                        "route pattern '{}' has an empty segment",
                        path
                    )));
                }
                let segment = Segment::parse(raw)
                    .map_err(|e| invalid(format!("route pattern '{}': {}", path, e)))?;
                segments.push(segment);
            }
        }

        let mut seen = HashSet::new();
        for (index, segment) in segments.iter().enumerate() {
            match segment {
                Segment::CatchAll(_) if index + 1 != segments.len() => {
                    return Err(invalid(format!(
                        "route pattern '{}': catch-all must be the last segment",
                        path
                    )));
                }
                Segment::Param(name) | Segment::CatchAll(Some(name)) => {
                    if !seen.insert(name.clone()) {
                        return Err(invalid(format!(
                            "route pattern '{}': duplicate parameter '{}'",
                            path, name
                        )));
                    }
                }
                _ => {}
            }
        }

        let mut regex_pattern = "^".to_string();
        let mut captures = Vec::new();
        for segment in &segments {
            match segment {
                Segment::Literal(literal) => {
                    regex_pattern.push('/');
                    regex_pattern.push_str(&regex::escape(literal));
                }
                Segment::Param(name) => {
                    regex_pattern.push_str("/([^/]+)");
                    captures.push(Some(name.clone()));
                }
                Segment::Wildcard => regex_pattern.push_str("/[^/]+"),
                Segment::CatchAll(name) => {
                    regex_pattern.push_str("(?:/(.*))?");
                    captures.push(name.clone());
                }
            }
        }
        if segments.is_empty() {
            regex_pattern.push('/');
        }
        regex_pattern.push('$');

        let regex = Regex::new(&regex_pattern).map_err(|e| {
            invalid(format!("Invalid route pattern '{}': {}", path, e))
        })?;

        Ok(Self {
            segments,
            regex,
            captures,
        })
    }

    /// Check if this pattern matches the given path and extract parameters
    fn matches(&self, path: &str) -> Option<Vec<RouteParam>> {
        let captures = self.regex.captures(path)?;

        let mut params = Vec::new();
        for (i, name) in self.captures.iter().enumerate() {
            if let Some(name) = name {
                let value = captures.get(i + 1).map(|m| m.as_str()).unwrap_or("");
                params.push(RouteParam {
                    name: name.clone(),
                    value: value.to_string(),
                });
            }
        }

        Some(params)
    }

    /// Structure of the pattern with parameter names erased
    fn shape(&self) -> Vec<Segment> {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Param(_) | Segment::Wildcard => Segment::Wildcard,
                Segment::CatchAll(_) => Segment::CatchAll(None),
                literal => literal.clone(),
            })
            .collect()
    }

    fn ranks(&self) -> Vec<u8> {
        self.segments.iter().map(Segment::rank).collect()
    }

    /// Index key: the first literal segment, or None when the first segment is dynamic
    fn index_key(&self) -> Option<String> {
        match self.segments.first() {
            None => Some(String::new()),
            Some(Segment::Literal(literal)) => Some(literal.clone()),
            Some(_) => None,
        }
    }
}

/// Compare two matching patterns; Greater means `a` is more specific
fn compare_specificity(a: &[u8], b: &[u8]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match x.cmp(y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    // Equal common prefix: extra concrete segments win, a trailing catch-all
    // that matched nothing loses to the exact route.
    match a.len().cmp(&b.len()) {
        Ordering::Equal => Ordering::Equal,
        Ordering::Greater => {
            if a[b.len()] > Segment::CatchAll(None).rank() {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        Ordering::Less => compare_specificity(b, a).reverse(),
    }
}

/// Immutable route table built and validated once at startup
pub struct RouteTable {
    routes: Vec<Arc<Route>>,

    /// Routes by first literal segment
    index: HashMap<String, Vec<usize>>,

    /// Routes whose first segment is dynamic
    dynamic: Vec<usize>,
}

impl RouteTable {
    /// Validate the definitions and build the table
    pub fn new(definitions: Vec<RouteDefinition>) -> Result<Self, ConfigError> {
        let mut routes: Vec<Arc<Route>> = Vec::with_capacity(definitions.len());
        let mut ids = HashSet::new();

        for definition in definitions {
            let route = Route::from_definition(definition)?;

            if !ids.insert(route.id.clone()) {
                return Err(invalid(format!("duplicate route id '{}'", route.id)));
            }

            if let Some(existing) = routes.iter().find(|r| r.overlaps(&route)) {
                return Err(invalid(format!(
                    "route '{}' is ambiguous with route '{}'",
                    route.id, existing.id
                )));
            }

            routes.push(Arc::new(route));
        }

        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        let mut dynamic = Vec::new();
        for (i, route) in routes.iter().enumerate() {
            match route.pattern.index_key() {
                Some(key) => index.entry(key).or_default().push(i),
                None => dynamic.push(i),
            }
        }

        tracing::info!(routes = routes.len(), "Route table built");

        Ok(Self {
            routes,
            index,
            dynamic,
        })
    }

    /// Number of routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table has no routes
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Router for RouteTable {
    fn resolve(&self, method: &Method, path: &str) -> Result<RouteMatch, GatewayError> {
        let path = if path.len() > 1 {
            path.strip_suffix('/').unwrap_or(path)
        } else {
            path
        };

        let first = path
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or_default();

        let candidates = self
            .index
            .get(first)
            .into_iter()
            .flatten()
            .chain(self.dynamic.iter());

        let mut best: Option<(&Arc<Route>, Vec<RouteParam>, Vec<u8>)> = None;
        for &i in candidates {
            let route = &self.routes[i];
            if !route.allows(method) {
                continue;
            }
            let Some(params) = route.pattern.matches(path) else {
                continue;
            };
            let ranks = route.pattern.ranks();

            let better = match &best {
                None => true,
                Some((current, _, current_ranks)) => {
                    match compare_specificity(&ranks, current_ranks) {
                        Ordering::Greater => true,
                        Ordering::Less => false,
                        // Same shape: a route naming the method beats an any-method route
                        Ordering::Equal => current.methods.is_empty() && !route.methods.is_empty(),
                    }
                }
            };

            if better {
                best = Some((route, params, ranks));
            }
        }

        match best {
            Some((route, params, _)) => Ok(RouteMatch {
                route: route.clone(),
                params,
            }),
            None => Err(GatewayError::RouteNotFound(format!(
                "No route found for {} {}",
                method, path
            ))),
        }
    }

    fn routes(&self) -> Vec<Arc<Route>> {
        self.routes.clone()
    }
}

fn invalid(message: String) -> ConfigError {
    ConfigError::ValidationError(message)
}
