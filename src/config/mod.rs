use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::ConfigError;
use crate::models::UpstreamTarget;

/// Prefix for environment variable overrides, e.g. `GATEWAY_SERVER__PORT=9000`
pub const ENV_PREFIX: &str = "GATEWAY_";

/// Separator between nested keys in environment variable overrides
pub const ENV_SEPARATOR: &str = "__";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on (0 picks an ephemeral port)
    pub port: u16,

    /// Overall request deadline in seconds
    pub request_timeout: u64,

    /// Liveness endpoint path
    pub health_path: String,

    /// Value of the `X-API-Version` header
    pub api_version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout: 30,
            health_path: "/health".to_string(),
            api_version: "1.0.0".to_string(),
        }
    }
}

/// Supported JWT algorithms
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum JwtAlgorithm {
    /// HMAC with SHA-256 (symmetric secret)
    #[default]
    HS256,
    /// RSA with SHA-256 (PEM public key)
    RS256,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Whether authentication is enabled
    pub enabled: bool,

    /// Signature algorithm
    pub algorithm: JwtAlgorithm,

    /// Shared secret for HS256
    pub secret_key: Option<String>,

    /// PEM public key for RS256
    pub public_key: Option<String>,

    /// Path to a PEM public key for RS256
    pub public_key_path: Option<PathBuf>,

    /// Expected `iss` claim
    pub issuer: Option<String>,

    /// Expected `aud` claim
    pub audience: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: JwtAlgorithm::HS256,
            secret_key: None,
            public_key: None,
            public_key_path: None,
            issuer: None,
            audience: None,
        }
    }
}

/// Cross-origin configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Origins allowed to make credentialed cross-origin requests
    pub allowed_origins: Vec<String>,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether caching is enabled
    pub enabled: bool,

    /// Upper bound on stored entries (LRU eviction past it)
    pub max_entries: Option<usize>,

    /// Interval between expired-entry sweeps in seconds
    pub cleanup_interval_seconds: u64,

    /// Allow only one upstream call per key while an entry is populated
    pub single_flight: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: Some(10_000),
            cleanup_interval_seconds: 60,
            single_flight: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Whether to log in JSON format
    pub json_format: bool,

    /// Log request headers at debug level (credential values hidden)
    pub request_headers: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            request_headers: false,
        }
    }
}

/// Per-route cache policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteCacheDefinition {
    /// Entry lifetime in seconds
    pub ttl_seconds: u64,

    /// Region used for grouped invalidation (defaults to the route id)
    #[serde(default)]
    pub region: Option<String>,

    /// Request headers whose values become part of the cache key
    #[serde(default)]
    pub vary_by_headers: Vec<String>,
}

/// Route definition in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDefinition {
    /// Route id (defaults to `METHODS path`)
    #[serde(default)]
    pub id: Option<String>,

    /// Inbound path pattern
    pub path: String,

    /// Allowed HTTP methods (empty means any method)
    #[serde(default)]
    pub methods: Vec<String>,

    /// Outbound path template (defaults to the inbound path)
    #[serde(default)]
    pub downstream_path: Option<String>,

    /// Outbound scheme
    #[serde(default = "default_scheme")]
    pub downstream_scheme: String,

    /// Upstream targets
    pub upstreams: Vec<UpstreamTarget>,

    /// Per-attempt timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries after a timeout or connection failure
    #[serde(default)]
    pub retry_count: u32,

    /// Load balancing policy
    #[serde(default = "default_load_balancer")]
    pub load_balancer: String,

    /// Cache policy (None disables caching for the route)
    #[serde(default)]
    pub cache: Option<RouteCacheDefinition>,

    /// Whether a bearer token is required
    #[serde(default = "default_true")]
    pub auth_required: bool,
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_load_balancer() -> String {
    "round_robin".to_string()
}

fn default_true() -> bool {
    true
}

impl RouteDefinition {
    pub fn new(path: impl Into<String>, upstreams: Vec<UpstreamTarget>) -> Self {
        Self {
            id: None,
            path: path.into(),
            methods: Vec::new(),
            downstream_path: None,
            downstream_scheme: default_scheme(),
            upstreams,
            timeout_ms: default_timeout_ms(),
            retry_count: 0,
            load_balancer: default_load_balancer(),
            cache: None,
            auth_required: true,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_methods(mut self, methods: &[&str]) -> Self {
        self.methods = methods.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn with_downstream_path(mut self, path: impl Into<String>) -> Self {
        self.downstream_path = Some(path.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_load_balancer(mut self, policy: impl Into<String>) -> Self {
        self.load_balancer = policy.into();
        self
    }

    pub fn with_cache_ttl(mut self, ttl_seconds: u64) -> Self {
        self.cache = Some(RouteCacheDefinition {
            ttl_seconds,
            region: None,
            vary_by_headers: Vec::new(),
        });
        self
    }

    pub fn public(mut self) -> Self {
        self.auth_required = false;
        self
    }
}

/// Separate route document, e.g. the file named by `routes_file`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutesDocument {
    #[serde(default)]
    pub routes: Vec<RouteDefinition>,
}

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Authentication configuration
    pub auth: AuthConfig,

    /// Cross-origin configuration
    pub cors: CorsConfig,

    /// Cache configuration
    pub cache: CacheConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Inline routes
    pub routes: Vec<RouteDefinition>,

    /// Additional route document, relative to the configuration file
    pub routes_file: Option<PathBuf>,
}

impl GatewayConfig {
    /// Check settings that do not depend on the route table
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.request_timeout == 0 {
            return Err(ConfigError::ValidationError(
                "server.request_timeout must be greater than zero".to_string(),
            ));
        }

        if !self.server.health_path.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "server.health_path must start with '/': {}",
                self.server.health_path
            )));
        }

        if self.server.api_version.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "server.api_version must not be empty".to_string(),
            ));
        }

        if self.auth.enabled {
            match self.auth.algorithm {
                JwtAlgorithm::HS256 => {
                    if self.auth.secret_key.as_deref().map_or(true, |s| s.is_empty()) {
                        return Err(ConfigError::ValidationError(
                            "auth.secret_key is required for HS256".to_string(),
                        ));
                    }
                }
                JwtAlgorithm::RS256 => {
                    if self.auth.public_key.is_none() && self.auth.public_key_path.is_none() {
                        return Err(ConfigError::ValidationError(
                            "auth.public_key or auth.public_key_path is required for RS256"
                                .to_string(),
                        ));
                    }
                }
            }

            if self.auth.issuer.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::ValidationError(
                    "auth.issuer is required when authentication is enabled".to_string(),
                ));
            }

            if self.auth.audience.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::ValidationError(
                    "auth.audience is required when authentication is enabled".to_string(),
                ));
            }
        }

        // Credentials are always allowed, so every origin must be named
        if let Some(origin) = self
            .cors
            .allowed_origins
            .iter()
            .find(|origin| origin.trim().is_empty() || origin.contains('*'))
        {
            return Err(ConfigError::ValidationError(format!(
                "cors.allowed_origins must list explicit origins, got '{}'",
                origin
            )));
        }

        if self.cache.max_entries == Some(0) {
            return Err(ConfigError::ValidationError(
                "cache.max_entries must be greater than zero".to_string(),
            ));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown logging.level: {}",
                    other
                )))
            }
        }

        Ok(())
    }
}

/// Configuration manager trait
#[async_trait]
pub trait ConfigManager: Send + Sync {
    /// Get the current configuration
    async fn get_config(&self) -> GatewayConfig;

    /// Load configuration from file, applying the environment overlay and variables
    async fn load_from_file<P: AsRef<Path> + Send>(
        &self,
        path: P,
        environment: Option<&str>,
    ) -> Result<(), ConfigError>;

    /// Replace the configuration
    async fn update_config(&self, config: GatewayConfig) -> Result<(), ConfigError>;
}

/// Basic implementation of the ConfigManager
pub struct BasicConfigManager {
    config: Arc<RwLock<GatewayConfig>>,
}

impl BasicConfigManager {
    /// Create a new BasicConfigManager with default configuration
    pub fn new() -> Self {
        Self {
            config: Arc::new(RwLock::new(GatewayConfig::default())),
        }
    }
}

impl Default for BasicConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigManager for BasicConfigManager {
    async fn get_config(&self) -> GatewayConfig {
        self.config.read().await.clone()
    }

    async fn load_from_file<P: AsRef<Path> + Send>(
        &self,
        path: P,
        environment: Option<&str>,
    ) -> Result<(), ConfigError> {
        let loaded = load_config(path.as_ref(), environment, std::env::vars())?;
        tracing::info!(
            path = %path.as_ref().display(),
            routes = loaded.routes.len(),
            "Configuration loaded"
        );
        self.update_config(loaded).await
    }

    async fn update_config(&self, config: GatewayConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let mut current_config = self.config.write().await;
        *current_config = config;
        Ok(())
    }
}

/// Load a configuration file, its environment overlay, variable overrides and route file
pub fn load_config<I>(
    path: &Path,
    environment: Option<&str>,
    vars: I,
) -> Result<GatewayConfig, ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut document = read_document(path)?;

    if let Some(environment) = environment {
        let overlay = overlay_path(path, environment);
        if overlay.exists() {
            tracing::debug!(path = %overlay.display(), "Applying environment overlay");
            merge_values(&mut document, read_document(&overlay)?);
        }
    }

    apply_env_overrides(&mut document, vars);

    let mut config: GatewayConfig = serde_json::from_value(document)
        .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;

    if let Some(routes_file) = config.routes_file.clone() {
        let routes_path = match path.parent() {
            Some(parent) if routes_file.is_relative() => parent.join(&routes_file),
            _ => routes_file,
        };
        let routes: RoutesDocument = serde_json::from_value(read_document(&routes_path)?)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", routes_path.display(), e)))?;
        config.routes.extend(routes.routes);
    }

    config.validate()?;
    Ok(config)
}

/// `gateway.yaml` + `production` -> `gateway.production.yaml`
fn overlay_path(path: &Path, environment: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{}.{}.{}", stem, environment, ext.to_string_lossy()),
        None => format!("{}.{}", stem, environment),
    };
    path.with_file_name(file_name)
}

/// Read a JSON or YAML document into a generic value
fn read_document(path: &Path) -> Result<Value, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::LoadError(format!("{}: {}", path.display(), e)))?;

    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    } else {
        serde_yaml::from_str(&raw)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }
}

/// Deep-merge `overlay` into `base`; objects merge key by key, anything else replaces
pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Apply `GATEWAY_SECTION__KEY=value` variables to the document
pub fn apply_env_overrides<I>(document: &mut Value, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (name, raw) in vars {
        let Some(path) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        if !path.contains(ENV_SEPARATOR) {
            continue;
        }

        let keys: Vec<String> = path
            .split(ENV_SEPARATOR)
            .map(|k| k.to_ascii_lowercase())
            .collect();
        let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));

        tracing::debug!(variable = %name, "Applying environment override");
        set_path(document, &keys, value);
    }
}

fn set_path(document: &mut Value, keys: &[String], value: Value) {
    let Some((last, parents)) = keys.split_last() else {
        return;
    };

    let mut current = document;
    for key in parents {
        if !current.is_object() {
            *current = Value::Object(Default::default());
        }
        current = match current {
            Value::Object(map) => map
                .entry(key.clone())
                .or_insert_with(|| Value::Object(Default::default())),
            _ => return,
        };
    }

    if !current.is_object() {
        *current = Value::Object(Default::default());
    }
    if let Value::Object(map) = current {
        map.insert(last.clone(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults_validate() {
        assert!(GatewayConfig::default().validate().is_ok());
    }

    #[test]
    fn test_auth_requires_key_issuer_and_audience() {
        let mut config = GatewayConfig::default();
        config.auth.enabled = true;
        assert!(config.validate().is_err());

        config.auth.secret_key = Some("secret".to_string());
        assert!(config.validate().is_err());

        config.auth.issuer = Some("issuer".to_string());
        config.auth.audience = Some("audience".to_string());
        assert!(config.validate().is_ok());

        config.auth.algorithm = JwtAlgorithm::RS256;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cors_origins_must_be_explicit() {
        let mut config = GatewayConfig::default();
        config.cors.allowed_origins = vec!["https://app.example.com".to_string()];
        assert!(config.validate().is_ok());

        for bad in ["*", "https://*.example.com", " "] {
            config.cors.allowed_origins = vec!["https://app.example.com".to_string(), bad.to_string()];
            assert!(matches!(
                config.validate(),
                Err(ConfigError::ValidationError(_))
            ));
        }
    }

    #[test]
    fn test_merge_values() {
        let mut base = json!({"server": {"host": "0.0.0.0", "port": 80}, "routes": [1, 2]});
        merge_values(&mut base, json!({"server": {"port": 9000}, "routes": [3]}));
        assert_eq!(base, json!({"server": {"host": "0.0.0.0", "port": 9000}, "routes": [3]}));
    }

    #[test]
    fn test_env_overrides() {
        let mut document = json!({"server": {"port": 80}});
        apply_env_overrides(
            &mut document,
            vec![
                ("GATEWAY_SERVER__PORT".to_string(), "9000".to_string()),
                ("GATEWAY_AUTH__SECRET_KEY".to_string(), "s3cret".to_string()),
                ("GATEWAY_CONFIG".to_string(), "ignored.yaml".to_string()),
                ("PATH".to_string(), "/usr/bin".to_string()),
            ],
        );
        assert_eq!(
            document,
            json!({"server": {"port": 9000}, "auth": {"secret_key": "s3cret"}})
        );
    }

    #[test]
    fn test_load_yaml_with_overlay_and_routes_file() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_file(
            dir.path(),
            "gateway.yaml",
            r#"
server:
  port: 8000
logging:
  level: info
routes_file: routes.json
routes:
  - path: /health-check
    upstreams: [{ host: localhost, port: 9000 }]
    auth_required: false
"#,
        );
        write_file(
            dir.path(),
            "gateway.production.yaml",
            "server:\n  port: 8443\nlogging:\n  level: warn\n",
        );
        write_file(
            dir.path(),
            "routes.json",
            r#"{"routes": [{"path": "/orders/{id}", "methods": ["GET"],
                "upstreams": [{"host": "orders", "port": 8080, "weight": 2}],
                "cache": {"ttl_seconds": 30}}]}"#,
        );

        let config = load_config(
            &base,
            Some("production"),
            vec![("GATEWAY_SERVER__HOST".to_string(), "0.0.0.0".to_string())],
        )
        .unwrap();

        assert_eq!(config.server.port, 8443);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.routes.len(), 2);
        assert!(!config.routes[0].auth_required);
        assert!(config.routes[1].auth_required);
        assert_eq!(config.routes[1].upstreams[0].weight, 2);
        assert_eq!(config.routes[1].cache.as_ref().unwrap().ttl_seconds, 30);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "gateway.json", "{ not json");
        let result = load_config(&path, None, Vec::new());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));

        let missing = load_config(&dir.path().join("missing.yaml"), None, Vec::new());
        assert!(matches!(missing, Err(ConfigError::LoadError(_))));
    }

    #[tokio::test]
    async fn test_config_manager_rejects_invalid_update() {
        let manager = BasicConfigManager::new();
        let mut config = GatewayConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(manager.update_config(config).await.is_err());
        assert_eq!(manager.get_config().await.logging.level, "info");
    }
}
