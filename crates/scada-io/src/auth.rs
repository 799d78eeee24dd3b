//! HMAC-SHA256 tokens for operator commands.
//!
//! Token layout: `base64(unix_secs ":" hmac(unix_secs))`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("token expired (age {age_secs}s, max {max_secs}s)")]
    TokenExpired { age_secs: u64, max_secs: u64 },

    #[error("token is not in timestamp:signature form")]
    InvalidFormat,

    #[error("token signature does not match")]
    InvalidSignature,

    #[error("token is not valid base64: {0}")]
    DecodeError(String),

    #[error("command carries no auth token")]
    MissingToken,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub secret: Vec<u8>,
    pub max_age_secs: u64,
    pub enabled: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: Vec::new(),
            max_age_secs: 300,
            enabled: false,
        }
    }
}

impl AuthConfig {
    pub fn with_secret(secret: impl Into<Vec<u8>>, max_age_secs: u64) -> Self {
        Self {
            secret: secret.into(),
            max_age_secs,
            enabled: true,
        }
    }
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

pub struct TokenValidator {
    secret: Vec<u8>,
    max_age_secs: u64,
}

impl TokenValidator {
    pub fn new(secret: Vec<u8>, max_age_secs: u64) -> Self {
        Self {
            secret,
            max_age_secs,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.secret.clone(), config.max_age_secs)
    }

    fn mac(&self) -> Result<HmacSha256, AuthError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|_| AuthError::InvalidFormat)
    }

    pub fn validate(&self, token: &str) -> Result<TokenClaims, AuthError> {
        use base64::Engine;
        let engine = base64::engine::general_purpose::STANDARD;

        let decoded = engine
            .decode(token)
            .map_err(|e| AuthError::DecodeError(e.to_string()))?;

        let colon = decoded
            .iter()
            .position(|&b| b == b':')
            .ok_or(AuthError::InvalidFormat)?;
        let (stamp, signature) = (&decoded[..colon], &decoded[colon + 1..]);

        let issued_at: u64 = std::str::from_utf8(stamp)
            .map_err(|_| AuthError::InvalidFormat)?
            .parse()
            .map_err(|_| AuthError::InvalidFormat)?;

        let age = unix_secs().saturating_sub(issued_at);
        if age > self.max_age_secs {
            return Err(AuthError::TokenExpired {
                age_secs: age,
                max_secs: self.max_age_secs,
            });
        }

        let mut mac = self.mac()?;
        mac.update(stamp);
        mac.verify_slice(signature)
            .map_err(|_| AuthError::InvalidSignature)?;

        Ok(TokenClaims {
            issued_at,
            age_secs: age,
        })
    }

    /// Checks an optional command token.
    pub fn authorize(&self, token: Option<&str>) -> Result<TokenClaims, AuthError> {
        self.validate(token.ok_or(AuthError::MissingToken)?)
    }

    /// Mints a token for the current second. Used by tools and tests.
    pub fn generate_token(&self) -> Result<String, AuthError> {
        use base64::Engine;
        let stamp = unix_secs().to_string();
        let mut mac = self.mac()?;
        mac.update(stamp.as_bytes());
        let signature = mac.finalize().into_bytes();

        let mut token = stamp.into_bytes();
        token.push(b':');
        token.extend_from_slice(&signature);
        Ok(base64::engine::general_purpose::STANDARD.encode(&token))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub issued_at: u64,
    pub age_secs: u64,
}
