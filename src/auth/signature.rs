use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

fn signing_mac(secret: &str, body: &[u8], timestamp: &str, nonce: &str) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow!("Failed to create HMAC: {}", e))?;
    mac.update(body);
    mac.update(timestamp.as_bytes());
    mac.update(nonce.as_bytes());
    Ok(mac)
}

/// Hex HMAC-SHA256 over `body ‖ timestamp ‖ nonce`, as clients compute it.
///
/// `timestamp` is the raw header text, not a re-rendered integer, so a
/// client sending `0123` signs exactly those bytes.
pub fn sign_request(secret: &str, body: &[u8], timestamp: &str, nonce: &str) -> Result<String> {
    let mac = signing_mac(secret, body, timestamp, nonce)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a presented hex signature. Bad hex is a mismatch.
pub fn verify_request(
    secret: &str,
    body: &[u8],
    timestamp: &str,
    nonce: &str,
    presented: &str,
) -> Result<bool> {
    let Ok(provided_bytes) = hex::decode(presented.trim()) else {
        return Ok(false);
    };

    let expected_bytes = signing_mac(secret, body, timestamp, nonce)?
        .finalize()
        .into_bytes();

    Ok(expected_bytes.as_slice().ct_eq(&provided_bytes[..]).into())
}
