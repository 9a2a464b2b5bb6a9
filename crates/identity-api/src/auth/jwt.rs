//! JWT token issuance and verification
//!
//! Implements the signer for access and refresh tokens with HMAC-SHA256.
//! Both tokens of one issuance carry the same `device_id`, which is the key
//! of the refresh session in the registry.

use identity_core::JwtConfig;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Token kind, embedded in the claims as `type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JWT Claims structure
///
/// `sub` and `device_id` default to empty so that a token missing them still
/// decodes and can be rejected explicitly by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Token issuer
    pub iss: String,
    /// Subject - user ID
    #[serde(default)]
    pub sub: String,
    /// Access or refresh
    #[serde(rename = "type")]
    pub token_type: TokenType,
    /// Session correlation key shared by an access/refresh pair
    #[serde(default)]
    pub device_id: String,
    /// Issued at timestamp (Unix epoch)
    pub iat: u64,
    /// Expiration timestamp (Unix epoch)
    pub exp: u64,
}

/// JWT token generation and validation errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to encode JWT: {0}")]
    EncodingError(#[from] jsonwebtoken::errors::Error),

    #[error("Malformed token")]
    Malformed,

    #[error("Token has expired")]
    Expired,

    #[error("Invalid token signature")]
    BadSignature,

    #[error("Expected {expected} token, got {actual}")]
    WrongType {
        expected: TokenType,
        actual: TokenType,
    },
}

/// Access and refresh token issued together
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Stateless token signer keyed by the shared secret
#[derive(Clone)]
pub struct TokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenSigner {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            access_ttl: config.access_ttl(),
            refresh_ttl: config.refresh_ttl(),
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Generate a fresh, globally unique device id
    pub fn new_device_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Sign a token of the given type valid for `ttl`
    pub fn issue(
        &self,
        subject: &str,
        token_type: TokenType,
        device_id: &str,
        ttl: Duration,
    ) -> Result<String, JwtError> {
        let now = now_secs();
        let claims = Claims {
            iss: self.issuer.clone(),
            sub: subject.to_string(),
            token_type,
            device_id: device_id.to_string(),
            iat: now,
            exp: now.saturating_add(ttl.as_secs()),
        };
        self.encode(&claims)
    }

    /// Sign an access/refresh pair bound to one device id
    pub fn issue_pair(&self, subject: &str, device_id: &str) -> Result<TokenPair, JwtError> {
        Ok(TokenPair {
            access_token: self.issue(subject, TokenType::Access, device_id, self.access_ttl)?,
            refresh_token: self.issue(subject, TokenType::Refresh, device_id, self.refresh_ttl)?,
        })
    }

    /// Verify signature, issuer, expiry and token type
    ///
    /// # Returns
    ///
    /// * `Ok(Claims)` - Decoded and validated claims
    /// * `Err(JwtError)` - `BadSignature`, `Expired`, `WrongType`, or `Malformed`
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => JwtError::BadSignature,
                _ => JwtError::Malformed,
            })?
            .claims;

        if claims.token_type != expected {
            return Err(JwtError::WrongType {
                expected,
                actual: claims.token_type,
            });
        }

        Ok(claims)
    }

    fn encode(&self, claims: &Claims) -> Result<String, JwtError> {
        Ok(encode(
            &Header::new(Algorithm::HS256),
            claims,
            &self.encoding_key,
        )?)
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new(&JwtConfig::default())
    }

    fn expired_claims(token_type: TokenType) -> Claims {
        let now = now_secs();
        Claims {
            iss: JwtConfig::default().issuer,
            sub: Uuid::new_v4().to_string(),
            token_type,
            device_id: TokenSigner::new_device_id(),
            iat: now - 7200,
            exp: now - 3600,
        }
    }

    #[test]
    fn test_issue_pair_shares_device_id() {
        let signer = signer();
        let subject = Uuid::new_v4().to_string();
        let pair = signer.issue_pair(&subject, "device-1").unwrap();

        let access = signer.verify(&pair.access_token, TokenType::Access).unwrap();
        let refresh = signer.verify(&pair.refresh_token, TokenType::Refresh).unwrap();

        assert_eq!(access.sub, subject);
        assert_eq!(refresh.sub, subject);
        assert_eq!(access.device_id, "device-1");
        assert_eq!(refresh.device_id, "device-1");
        assert_eq!(access.exp - access.iat, 900);
        assert_eq!(refresh.exp - refresh.iat, 7 * 24 * 3600);
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let signer = signer();
        let pair = signer.issue_pair("user", "device").unwrap();

        assert!(matches!(
            signer.verify(&pair.refresh_token, TokenType::Access),
            Err(JwtError::WrongType {
                expected: TokenType::Access,
                actual: TokenType::Refresh
            })
        ));
        assert!(matches!(
            signer.verify(&pair.access_token, TokenType::Refresh),
            Err(JwtError::WrongType { .. })
        ));
    }

    #[test]
    fn test_wrong_secret() {
        let other = TokenSigner::new(&JwtConfig {
            secret: "another-secret".to_string(),
            ..Default::default()
        });
        let token = signer()
            .issue("user", TokenType::Access, "device", Duration::from_secs(60))
            .unwrap();

        assert!(matches!(
            other.verify(&token, TokenType::Access),
            Err(JwtError::BadSignature)
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            signer().verify("invalid.token.here", TokenType::Access),
            Err(JwtError::Malformed)
        ));
    }

    #[test]
    fn test_foreign_issuer_is_rejected() {
        let foreign = TokenSigner::new(&JwtConfig {
            issuer: "someone-else".to_string(),
            ..Default::default()
        });
        let token = foreign
            .issue("user", TokenType::Access, "device", Duration::from_secs(60))
            .unwrap();

        assert!(signer().verify(&token, TokenType::Access).is_err());
    }

    #[test]
    fn test_expired_token() {
        let signer = signer();
        let token = signer.encode(&expired_claims(TokenType::Access)).unwrap();

        assert!(matches!(
            signer.verify(&token, TokenType::Access),
            Err(JwtError::Expired)
        ));
    }

    #[test]
    fn test_expired_refresh_token() {
        let signer = signer();
        let token = signer.encode(&expired_claims(TokenType::Refresh)).unwrap();

        assert!(matches!(
            signer.verify(&token, TokenType::Refresh),
            Err(JwtError::Expired)
        ));
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let signer = signer();
        let token = signer
            .issue("user", TokenType::Access, "device", Duration::from_secs(u64::MAX))
            .unwrap();

        let claims = signer.verify(&token, TokenType::Access).unwrap();
        assert_eq!(claims.exp, u64::MAX);
    }

    #[test]
    fn test_missing_device_id_decodes_empty() {
        #[derive(Serialize)]
        struct Bare {
            iss: String,
            sub: String,
            #[serde(rename = "type")]
            token_type: TokenType,
            iat: u64,
            exp: u64,
        }

        let signer = signer();
        let now = now_secs();
        let token = encode(
            &Header::new(Algorithm::HS256),
            &Bare {
                iss: JwtConfig::default().issuer,
                sub: "user".to_string(),
                token_type: TokenType::Refresh,
                iat: now,
                exp: now + 60,
            },
            &signer.encoding_key,
        )
        .unwrap();

        let claims = signer.verify(&token, TokenType::Refresh).unwrap();
        assert!(claims.device_id.is_empty());
    }
}
