use async_trait::async_trait;
use hmac::{Hmac, Mac};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use jwt::VerifyWithKey;
use sha2::Sha256;

use crate::config::{AuthConfig, JwtAlgorithm};
use crate::error::{AuthError, ConfigError};
use crate::middleware::auth::models::{unix_now, Claims};
use crate::middleware::auth::AuthService;
use crate::models::Principal;

/// Key material used to verify signatures
enum VerificationKey {
    Hs256(Hmac<Sha256>),
    Rs256(Box<DecodingKey>),
}

/// JWT-based authentication service.
///
/// Verifies the signature with the configured key, then checks issuer,
/// audience, `exp` and `nbf` itself so both algorithms share one set of
/// claim rules.
pub struct JwtAuthService {
    key: VerificationKey,
    issuer: String,
    audience: String,
}

impl JwtAuthService {
    /// HS256 service with a shared secret
    pub fn hs256(
        secret: &[u8],
        issuer: impl Into<String>,
        audience: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let key = Hmac::<Sha256>::new_from_slice(secret)
            .map_err(|e| AuthError::KeyError(e.to_string()))?;

        Ok(Self {
            key: VerificationKey::Hs256(key),
            issuer: issuer.into(),
            audience: audience.into(),
        })
    }

    /// RS256 service with a PEM public key
    pub fn rs256(
        public_key_pem: &[u8],
        issuer: impl Into<String>,
        audience: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let key = DecodingKey::from_rsa_pem(public_key_pem)
            .map_err(|e| AuthError::KeyError(e.to_string()))?;

        Ok(Self {
            key: VerificationKey::Rs256(Box::new(key)),
            issuer: issuer.into(),
            audience: audience.into(),
        })
    }

    /// Build the service from the `auth` configuration section
    pub fn from_config(config: &AuthConfig) -> Result<Self, ConfigError> {
        let issuer = config.issuer.clone().unwrap_or_default();
        let audience = config.audience.clone().unwrap_or_default();

        let service = match config.algorithm {
            JwtAlgorithm::HS256 => {
                let secret = config.secret_key.as_deref().ok_or_else(|| {
                    ConfigError::ValidationError("auth.secret_key is required for HS256".into())
                })?;
                Self::hs256(secret.as_bytes(), issuer, audience)
            }
            JwtAlgorithm::RS256 => {
                let pem = match (&config.public_key, &config.public_key_path) {
                    (Some(pem), _) => pem.clone().into_bytes(),
                    (None, Some(path)) => std::fs::read(path).map_err(|e| {
                        ConfigError::LoadError(format!(
                            "failed to read public key {}: {}",
                            path.display(),
                            e
                        ))
                    })?,
                    (None, None) => {
                        return Err(ConfigError::ValidationError(
                            "auth.public_key or auth.public_key_path is required for RS256".into(),
                        ))
                    }
                };
                Self::rs256(&pem, issuer, audience)
            }
        };

        service.map_err(|e| ConfigError::ValidationError(format!("auth key: {}", e)))
    }

    /// Verify the signature and decode the claims
    fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        match &self.key {
            VerificationKey::Hs256(key) => {
                token.verify_with_key(key).map_err(|e| match e {
                    jwt::Error::InvalidSignature | jwt::Error::RustCryptoMac(_) => {
                        AuthError::InvalidSignature
                    }
                    other => AuthError::InvalidToken(other.to_string()),
                })
            }
            VerificationKey::Rs256(key) => {
                let mut validation = Validation::new(Algorithm::RS256);
                validation.validate_exp = false;
                validation.validate_nbf = false;
                validation.validate_aud = false;
                validation.required_spec_claims.clear();

                jsonwebtoken::decode::<Claims>(token, key, &validation)
                    .map(|data| data.claims)
                    .map_err(|e| match e.kind() {
                        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                        _ => AuthError::InvalidToken(e.to_string()),
                    })
            }
        }
    }

    /// Claim rules applied after the signature check
    fn check_claims(&self, claims: &Claims, now: u64) -> Result<(), AuthError> {
        if claims.exp.is_none() {
            return Err(AuthError::InvalidToken("missing exp claim".to_string()));
        }

        if claims.is_expired_at(now) {
            return Err(AuthError::TokenExpired);
        }

        if claims.is_not_valid_yet_at(now) {
            return Err(AuthError::TokenNotYetValid);
        }

        if claims.iss.as_deref() != Some(self.issuer.as_str()) {
            return Err(AuthError::InvalidIssuer);
        }

        match &claims.aud {
            Some(aud) if aud.contains(&self.audience) => Ok(()),
            _ => Err(AuthError::InvalidAudience),
        }
    }
}

#[async_trait]
impl AuthService for JwtAuthService {
    async fn authenticate(&self, token: &str) -> Result<Principal, AuthError> {
        let claims = self.decode(token)?;
        self.check_claims(&claims, unix_now())?;
        Ok(claims.into_principal())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use jsonwebtoken::{EncodingKey, Header};
    use jwt::SignWithKey;

    use super::*;
    use crate::middleware::auth::models::Audience;

    const SECRET: &[u8] = b"orders-gateway-test-secret-0123456789";
    const PRIVATE_KEY: &[u8] = include_bytes!("../../../tests/fixtures/rsa_private.pem");
    const OTHER_PRIVATE_KEY: &[u8] = include_bytes!("../../../tests/fixtures/rsa_other_private.pem");
    const PUBLIC_KEY: &[u8] = include_bytes!("../../../tests/fixtures/rsa_public.pem");

    fn valid_claims() -> Claims {
        Claims::new("alice")
            .with_issuer("https://idp.example.com")
            .with_audience(Audience::Single("orders-api".into()))
            .with_expiration(Duration::from_secs(300))
    }

    fn hs_service() -> JwtAuthService {
        JwtAuthService::hs256(SECRET, "https://idp.example.com", "orders-api").unwrap()
    }

    fn rs_service() -> JwtAuthService {
        JwtAuthService::rs256(PUBLIC_KEY, "https://idp.example.com", "orders-api").unwrap()
    }

    fn sign_hs(claims: &Claims, secret: &[u8]) -> String {
        let key = Hmac::<Sha256>::new_from_slice(secret).unwrap();
        claims.sign_with_key(&key).unwrap()
    }

    fn sign_rs(claims: &Claims, private_key: &[u8]) -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            claims,
            &EncodingKey::from_rsa_pem(private_key).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_hs256_valid_token() {
        let token = sign_hs(&valid_claims().with_claim("role", "admin".into()), SECRET);
        let principal = hs_service().authenticate(&token).await.unwrap();

        assert_eq!(principal.subject.as_deref(), Some("alice"));
        assert_eq!(principal.issuer, "https://idp.example.com");
        assert_eq!(principal.claims["role"], "admin");
    }

    #[tokio::test]
    async fn test_hs256_wrong_secret() {
        let token = sign_hs(&valid_claims(), b"some-other-secret");
        assert_eq!(
            hs_service().authenticate(&token).await,
            Err(AuthError::InvalidSignature)
        );
    }

    #[tokio::test]
    async fn test_hs256_tampered_payload() {
        let token = sign_hs(&valid_claims(), SECRET);
        let forged = sign_hs(&valid_claims().with_claim("role", "admin".into()), b"attacker");

        let parts: Vec<&str> = token.split('.').collect();
        let forged_payload = forged.split('.').nth(1).unwrap();
        let tampered = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert_eq!(
            hs_service().authenticate(&tampered).await,
            Err(AuthError::InvalidSignature)
        );
    }

    #[tokio::test]
    async fn test_expired_token() {
        let claims = valid_claims().expires_at(unix_now() - 1);
        let token = sign_hs(&claims, SECRET);
        assert_eq!(hs_service().authenticate(&token).await, Err(AuthError::TokenExpired));
    }

    #[tokio::test]
    async fn test_missing_exp_is_rejected() {
        let mut claims = valid_claims();
        claims.exp = None;
        let token = sign_hs(&claims, SECRET);
        assert!(matches!(
            hs_service().authenticate(&token).await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_not_yet_valid_token() {
        let claims = valid_claims().not_before(unix_now() + 120);
        let token = sign_hs(&claims, SECRET);
        assert_eq!(
            hs_service().authenticate(&token).await,
            Err(AuthError::TokenNotYetValid)
        );
    }

    #[tokio::test]
    async fn test_issuer_and_audience_checks() {
        let wrong_issuer = valid_claims().with_issuer("https://evil.example.com");
        assert_eq!(
            hs_service().authenticate(&sign_hs(&wrong_issuer, SECRET)).await,
            Err(AuthError::InvalidIssuer)
        );

        let wrong_audience = valid_claims().with_audience(Audience::Single("billing".into()));
        assert_eq!(
            hs_service().authenticate(&sign_hs(&wrong_audience, SECRET)).await,
            Err(AuthError::InvalidAudience)
        );

        let listed = valid_claims()
            .with_audience(Audience::Many(vec!["billing".into(), "orders-api".into()]));
        assert!(hs_service().authenticate(&sign_hs(&listed, SECRET)).await.is_ok());
    }

    #[tokio::test]
    async fn test_garbage_token() {
        assert!(matches!(
            hs_service().authenticate("not.a.jwt").await,
            Err(AuthError::InvalidToken(_))
        ));
        assert!(matches!(
            rs_service().authenticate("not-even-dotted").await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_rs256_valid_token() {
        let token = sign_rs(&valid_claims(), PRIVATE_KEY);
        let principal = rs_service().authenticate(&token).await.unwrap();
        assert_eq!(principal.audiences, vec!["orders-api".to_string()]);
    }

    #[tokio::test]
    async fn test_rs256_wrong_key() {
        let token = sign_rs(&valid_claims(), OTHER_PRIVATE_KEY);
        assert_eq!(
            rs_service().authenticate(&token).await,
            Err(AuthError::InvalidSignature)
        );
    }

    #[tokio::test]
    async fn test_algorithm_mismatch_is_rejected() {
        // HS256 token presented to an RS256 gate and the other way round
        let hs_token = sign_hs(&valid_claims(), SECRET);
        assert!(rs_service().authenticate(&hs_token).await.is_err());

        let rs_token = sign_rs(&valid_claims(), PRIVATE_KEY);
        assert!(hs_service().authenticate(&rs_token).await.is_err());
    }

    #[test]
    fn test_from_config_reads_public_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("public.pem");
        std::fs::write(&path, PUBLIC_KEY).unwrap();

        let config = AuthConfig {
            enabled: true,
            algorithm: JwtAlgorithm::RS256,
            public_key_path: Some(path),
            issuer: Some("https://idp.example.com".into()),
            audience: Some("orders-api".into()),
            ..Default::default()
        };
        assert!(JwtAuthService::from_config(&config).is_ok());

        let broken = AuthConfig {
            public_key: Some("not a pem".into()),
            ..config
        };
        assert!(JwtAuthService::from_config(&broken).is_err());
    }
}
