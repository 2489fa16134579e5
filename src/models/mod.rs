// Models for the API Gateway

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Upstream target a route forwards to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamTarget {
    /// Upstream host
    pub host: String,

    /// Upstream port
    pub port: u16,

    /// Weight for weighted round-robin
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl UpstreamTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            weight: 1,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// `host:port` authority
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Authenticated caller, produced by the authentication gate
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    /// Subject (user ID)
    pub subject: Option<String>,

    /// Issuer
    pub issuer: String,

    /// Audiences the token was issued for
    pub audiences: Vec<String>,

    /// Expiration time (Unix seconds)
    pub expires_at: u64,

    /// Remaining claims
    pub claims: HashMap<String, serde_json::Value>,
}
