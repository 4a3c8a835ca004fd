use anyhow::{Context, Result};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::storage::unix_now;

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    /// Owner id as a decimal string
    sub: String,
    iat: i64,
    exp: i64,
}

/// HS256 bearer tokens for the stats endpoints.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SessionKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, owner_id: i64, ttl_secs: i64) -> Result<String> {
        let now = unix_now();
        let claims = SessionClaims {
            sub: owner_id.to_string(),
            iat: now,
            exp: now + ttl_secs,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .context("failed to sign session token")
    }

    /// Owner id carried by a valid, unexpired token.
    pub fn verify(&self, token: &str) -> Result<i64> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;

        let data = decode::<SessionClaims>(token, &self.decoding, &validation)
            .context("token failed signature or structural validation")?;
        data.claims
            .sub
            .parse::<i64>()
            .context("token subject is not an owner id")
    }
}
