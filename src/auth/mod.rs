//! Signed-request protocol guarding link creation, plus session tokens for
//! the stats endpoints.

pub mod nonce;
pub mod rate_limit;
pub mod session;
pub mod signature;

use axum::http::{header::USER_AGENT, HeaderMap};
use regex::Regex;
use std::net::IpAddr;
use std::sync::{Arc, LazyLock};
use thiserror::Error;

use crate::config::ProtocolConfig;
use crate::models::ApiCredential;
use crate::storage::{unix_now, Storage};

use self::nonce::NonceCache;
use self::rate_limit::{RateLimited, RateLimiter};

pub use self::session::SessionKeys;

pub const HEADER_API_KEY: &str = "x-api-key";
pub const HEADER_TIMESTAMP: &str = "x-timestamp";
pub const HEADER_NONCE: &str = "x-nonce";
pub const HEADER_SIGNATURE: &str = "x-signature";

pub const MIN_NONCE_LEN: usize = 16;
pub const MAX_NONCE_LEN: usize = 128;

static CLIENT_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*/\d+\.\d+\.\d+$").expect("client id pattern is valid")
});

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("client identifier is missing or malformed")]
    Forbidden,
    #[error("X-API-KEY, X-TIMESTAMP, X-NONCE and X-SIGNATURE are required")]
    MissingHeaders,
    #[error("X-NONCE must be {MIN_NONCE_LEN}-{MAX_NONCE_LEN} characters of [A-Za-z0-9_-]")]
    InvalidNonce,
    #[error("request timestamp is {drift_secs}s away from server time; sync your clock and retry")]
    Expired { drift_secs: i64 },
    #[error("nonce has already been used")]
    NonceUsed,
    #[error("too many requests; retry in {}s", .0.retry_after_secs)]
    RateLimited(RateLimited),
    #[error("API key is unknown, inactive or expired")]
    InvalidKey,
    #[error("signature does not match the request")]
    InvalidSignature,
    #[error("credential lookup failed: {0}")]
    Storage(#[from] anyhow::Error),
}

/// The parts of an HTTP request the protocol inspects.
pub struct AuthRequest<'a> {
    pub headers: &'a HeaderMap,
    pub body: &'a [u8],
    pub client_ip: IpAddr,
    /// Set when the edge middleware already counted this request
    pub rate_limit_checked: bool,
}

struct SignedHeaders<'a> {
    api_key: &'a str,
    timestamp_raw: &'a str,
    timestamp: i64,
    nonce: &'a str,
    signature: &'a str,
}

pub struct Authenticator {
    storage: Arc<dyn Storage>,
    nonces: NonceCache,
    rate_limiter: Arc<RateLimiter>,
    tolerance_secs: i64,
}

impl Authenticator {
    pub fn new(
        storage: Arc<dyn Storage>,
        rate_limiter: Arc<RateLimiter>,
        protocol: &ProtocolConfig,
    ) -> Self {
        Self {
            storage,
            nonces: NonceCache::new(protocol.timestamp_tolerance_secs),
            rate_limiter,
            tolerance_secs: protocol.timestamp_tolerance_secs,
        }
    }

    pub async fn authenticate(
        &self,
        request: &AuthRequest<'_>,
    ) -> Result<ApiCredential, AuthError> {
        self.authenticate_at(request, unix_now()).await
    }

    /// Runs the verification steps in order, failing on the first that rejects.
    pub async fn authenticate_at(
        &self,
        request: &AuthRequest<'_>,
        now: i64,
    ) -> Result<ApiCredential, AuthError> {
        check_client_id(request.headers)?;
        let signed = signed_headers(request.headers)?;

        let drift = now - signed.timestamp;
        if drift.abs() > self.tolerance_secs {
            return Err(AuthError::Expired { drift_secs: drift });
        }

        if !self
            .nonces
            .check_and_mark(signed.api_key, signed.nonce, signed.timestamp)
            .await
        {
            tracing::warn!(api_key = %signed.api_key, ip = %request.client_ip, "replayed nonce");
            return Err(AuthError::NonceUsed);
        }

        if !request.rate_limit_checked {
            self.rate_limiter
                .check_at(request.client_ip, now)
                .map_err(AuthError::RateLimited)?;
        }

        let credential = self
            .storage
            .get_credential(signed.api_key)
            .await?
            .filter(|credential| credential.is_usable(now))
            .ok_or(AuthError::InvalidKey)?;

        let valid = signature::verify_request(
            &credential.secret_key,
            request.body,
            signed.timestamp_raw,
            signed.nonce,
            signed.signature,
        )?;
        if !valid {
            tracing::warn!(
                api_key = %signed.api_key,
                ip = %request.client_ip,
                "signature mismatch"
            );
            return Err(AuthError::InvalidSignature);
        }

        if let Err(err) = self.storage.touch_credential(&credential.api_key, now).await {
            tracing::warn!(
                api_key = %credential.api_key,
                error = %err,
                "failed to record key usage"
            );
        }

        Ok(credential)
    }
}

fn check_client_id(headers: &HeaderMap) -> Result<(), AuthError> {
    let client_id = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::Forbidden)?;
    if CLIENT_ID_PATTERN.is_match(client_id) {
        Ok(())
    } else {
        Err(AuthError::Forbidden)
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn signed_headers(headers: &HeaderMap) -> Result<SignedHeaders<'_>, AuthError> {
    let (Some(api_key), Some(timestamp_raw), Some(nonce), Some(signature)) = (
        header(headers, HEADER_API_KEY),
        header(headers, HEADER_TIMESTAMP),
        header(headers, HEADER_NONCE),
        header(headers, HEADER_SIGNATURE),
    ) else {
        return Err(AuthError::MissingHeaders);
    };

    let timestamp = timestamp_raw
        .parse::<i64>()
        .map_err(|_| AuthError::MissingHeaders)?;

    if !is_valid_nonce(nonce) {
        return Err(AuthError::InvalidNonce);
    }

    Ok(SignedHeaders {
        api_key,
        timestamp_raw,
        timestamp,
        nonce,
        signature,
    })
}

pub fn is_valid_nonce(nonce: &str) -> bool {
    (MIN_NONCE_LEN..=MAX_NONCE_LEN).contains(&nonce.len())
        && nonce
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
