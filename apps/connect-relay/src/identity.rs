use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;

use crate::config::Config;

/// Verified caller identity attached to authenticated requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
    pub email: Option<String>,
    /// Unix seconds.
    pub expires_at: u64,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("token verification not configured")]
    NotConfigured,
    #[error("token validation failed: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("token missing subject")]
    MissingSubject,
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, IdentityError>;
}

// Tokens minted by the account service carry `username`; standard issuers
// use `sub`. Either names the subject.
#[derive(Debug, Deserialize)]
struct AccessTokenClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    email: Option<String>,
    exp: u64,
}

/// Verifies HS256 tokens signed with a shared secret.
#[derive(Clone)]
pub struct Hs256Verifier {
    key: Option<DecodingKey>,
    validation: Validation,
}

impl Hs256Verifier {
    pub fn new(secret: &[u8], issuer: Option<String>, audience: Option<String>) -> Self {
        Self {
            key: Some(DecodingKey::from_secret(secret)),
            validation: validation(issuer, audience),
        }
    }

    /// A verifier that rejects every token. Used when no secret is
    /// configured so authenticated routes fail closed.
    pub fn disabled() -> Self {
        Self {
            key: None,
            validation: validation(None, None),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        match &config.jwt_secret {
            Some(secret) => Self::new(
                secret.as_bytes(),
                config.jwt_issuer.clone(),
                config.jwt_audience.clone(),
            ),
            None => Self::disabled(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }
}

fn validation(issuer: Option<String>, audience: Option<String>) -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    if let Some(issuer) = &issuer {
        validation.set_issuer(&[issuer]);
    }
    match &audience {
        Some(audience) => validation.set_audience(&[audience]),
        None => validation.validate_aud = false,
    }
    validation
}

#[async_trait]
impl IdentityVerifier for Hs256Verifier {
    async fn verify(&self, token: &str) -> Result<Identity, IdentityError> {
        let key = self.key.as_ref().ok_or(IdentityError::NotConfigured)?;
        let data = decode::<AccessTokenClaims>(token, key, &self.validation)?;
        let claims = data.claims;

        let subject = claims
            .sub
            .or(claims.username)
            .map(|subject| subject.trim().to_string())
            .filter(|subject| !subject.is_empty())
            .ok_or(IdentityError::MissingSubject)?;

        Ok(Identity {
            subject,
            email: claims.email,
            expires_at: claims.exp,
        })
    }
}
