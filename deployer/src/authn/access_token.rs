//! Bearer access tokens

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Identity claims carried by an Entra ID access token
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Tenant ID
    #[serde(default)]
    pub tid: Option<String>,

    /// Object ID of the principal
    #[serde(default)]
    pub oid: Option<String>,

    /// Application (client) ID
    #[serde(default)]
    pub appid: Option<String>,

    /// Audience
    #[serde(default)]
    pub aud: Option<String>,

    /// Expiration timestamp
    #[serde(default)]
    pub exp: Option<i64>,
}

/// A bearer token and its expiry
pub struct AccessToken {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            expires_at,
        }
    }

    /// Build from a token endpoint response that reports `expires_in` seconds
    pub fn from_expires_in(token: impl Into<String>, expires_in: i64) -> Self {
        Self::new(token, Utc::now() + Duration::seconds(expires_in))
    }

    /// Raw bearer value
    pub fn secret(&self) -> &str {
        self.token.expose_secret()
    }

    /// Get expiration time
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Check if the token is expired
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Check if the token expires within the given number of seconds
    pub fn expires_within(&self, seconds: i64) -> bool {
        self.expires_at < Utc::now() + Duration::seconds(seconds)
    }

    /// Decode the identity claims without verifying the signature.
    ///
    /// Returns `None` for opaque (non-JWT) tokens.
    pub fn claims(&self) -> Option<AccessTokenClaims> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.algorithms = vec![Algorithm::RS256, Algorithm::HS256];
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        decode::<AccessTokenClaims>(
            self.token.expose_secret(),
            &DecodingKey::from_secret(b""),
            &validation,
        )
        .ok()
        .map(|data| data.claims)
    }
}

impl Clone for AccessToken {
    fn clone(&self) -> Self {
        Self {
            token: SecretString::from(self.token.expose_secret().to_string()),
            expires_at: self.expires_at,
        }
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
