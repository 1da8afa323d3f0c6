//! Operator session validation.
//!
//! Sign-in happens out of band against the fleet identity provider; what
//! reaches this process is the resulting session token. We only verify it:
//! HS256 signature against the shared secret plus expiry. A missing or
//! invalid session is fatal-to-start — the store would reject every call
//! anyway.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session secret is not configured (NAV_SESSION_SECRET)")]
    MissingSecret,
    #[error("invalid session token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Operator identifier.
    pub sub: String,
    /// Expiry, seconds since epoch.
    pub exp: i64,
    #[serde(default)]
    pub email: Option<String>,
}

pub struct SessionValidator {
    key: DecodingKey,
    validation: Validation,
}

impl SessionValidator {
    pub fn new(secret: &[u8]) -> Self {
        let validation = Validation::new(Algorithm::HS256);
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn from_env() -> Result<Self, SessionError> {
        let secret =
            std::env::var("NAV_SESSION_SECRET").map_err(|_| SessionError::MissingSecret)?;
        Ok(Self::new(secret.as_bytes()))
    }

    pub fn validate(&self, token: &str) -> Result<SessionClaims, SessionError> {
        Ok(decode::<SessionClaims>(token, &self.key, &self.validation)?.claims)
    }
}
