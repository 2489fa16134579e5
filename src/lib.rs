// Relay Gateway Library

pub mod config;
pub mod core;
pub mod error;
pub mod load_balancer;
pub mod middleware;
pub mod models;
pub mod utils;

// Re-export commonly used types
pub use config::{BasicConfigManager, ConfigManager, GatewayConfig, RouteDefinition};
pub use error::{
    AuthError, CacheError, ConfigError, GatewayError, LoadBalancerError, UpstreamFailure,
};
pub use models::{Principal, UpstreamTarget};
pub use core::{
    forwarder::{ForwardingEngine, HttpUpstreamClient, UpstreamClient},
    gateway::{ApiGateway, Gateway, GatewayBuilder},
    request::GatewayRequest,
    response::GatewayResponse,
    router::{RouteMatch, RouteTable, Router},
};
pub use middleware::{Middleware, MiddlewareHandler};
