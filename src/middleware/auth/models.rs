use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::models::Principal;

/// `aud` claim: a single string or an array of strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Many(Vec<String>),
}

impl Audience {
    /// Whether the claim names the given audience
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::Single(value) => value == audience,
            Audience::Many(values) => values.iter().any(|v| v == audience),
        }
    }

    pub fn into_vec(self) -> Vec<String> {
        match self {
            Audience::Single(value) => vec![value],
            Audience::Many(values) => values,
        }
    }
}

/// Claims contained in a JWT token
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Audience
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,

    /// Expiration time (as Unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,

    /// Not before (as Unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,

    /// Issued at (as Unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,

    /// Custom claims
    #[serde(flatten)]
    pub custom: HashMap<String, serde_json::Value>,
}

/// Current Unix time in seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl Claims {
    /// Create new claims for a subject (user ID)
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            sub: Some(subject.into()),
            iat: Some(unix_now()),
            ..Default::default()
        }
    }

    /// Expire `duration` from now
    pub fn with_expiration(mut self, duration: Duration) -> Self {
        self.exp = Some(unix_now() + duration.as_secs());
        self
    }

    /// Set an absolute expiry
    pub fn expires_at(mut self, exp: u64) -> Self {
        self.exp = Some(exp);
        self
    }

    /// Set an absolute not-before time
    pub fn not_before(mut self, nbf: u64) -> Self {
        self.nbf = Some(nbf);
        self
    }

    /// Set issuer
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.iss = Some(issuer.into());
        self
    }

    /// Set audience
    pub fn with_audience(mut self, audience: Audience) -> Self {
        self.aud = Some(audience);
        self
    }

    /// Add a custom claim
    pub fn with_claim(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.custom.insert(key.into(), value);
        self
    }

    /// Whether the token is expired at `now` (no clock skew)
    pub fn is_expired_at(&self, now: u64) -> bool {
        match self.exp {
            Some(exp) => now >= exp,
            None => true,
        }
    }

    /// Whether the token is not yet valid at `now`
    pub fn is_not_valid_yet_at(&self, now: u64) -> bool {
        matches!(self.nbf, Some(nbf) if nbf > now)
    }

    /// Convert validated claims into the request principal
    pub fn into_principal(self) -> Principal {
        Principal {
            subject: self.sub,
            issuer: self.iss.unwrap_or_default(),
            audiences: self.aud.map(Audience::into_vec).unwrap_or_default(),
            expires_at: self.exp.unwrap_or_default(),
            claims: self.custom,
        }
    }
}
