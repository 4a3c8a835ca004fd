use thiserror::Error;
use url::Url;

use crate::config::LinkConfig;

/// Longest target accepted. Longer URLs are rejected rather than cut.
pub const MAX_TARGET_URL_LEN: usize = 2083;

const MAX_DECODE_ROUNDS: usize = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetUrlError {
    #[error("target_url is required")]
    Empty,
    #[error("target_url exceeds {MAX_TARGET_URL_LEN} bytes")]
    TooLong,
    #[error("target_url must be an absolute http:// or https:// URL")]
    Malformed,
    #[error("target_url points back at a short link of this service")]
    SelfReferential,
}

/// Identity of this service's own short links, used to refuse redirect loops.
#[derive(Debug, Clone)]
pub struct SelfReference {
    host: String,
    short_path: String,
}

impl SelfReference {
    pub fn from_config(links: &LinkConfig) -> anyhow::Result<Self> {
        let base = Url::parse(&links.public_base_url)?;
        let host = base
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("PUBLIC_BASE_URL has no host"))?;
        Ok(Self {
            host: normalize_host(host),
            short_path: links.short_path.to_ascii_lowercase(),
        })
    }

    /// True when `url` would resolve to one of our own short links, under any
    /// scheme, port, letter case, `www.` prefix or percent-encoding of the path.
    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        if normalize_host(host) != self.host {
            return false;
        }

        let path = normalize_path(url.path());
        let prefix = format!("/{}", self.short_path);
        if path == prefix || path.starts_with(&format!("{prefix}/")) {
            return true;
        }

        // query form: /?go=slug
        (path.is_empty() || path == "/")
            && url
                .query_pairs()
                .any(|(key, _)| key.eq_ignore_ascii_case(&self.short_path))
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
}

/// Percent-decodes until stable (bounded), lowercases and collapses repeated slashes.
fn normalize_path(path: &str) -> String {
    let mut current = path.to_string();
    for _ in 0..MAX_DECODE_ROUNDS {
        match urlencoding::decode(&current) {
            Ok(decoded) if decoded != current => current = decoded.into_owned(),
            _ => break,
        }
    }

    let mut normalized = String::with_capacity(current.len());
    let mut previous_slash = false;
    for ch in current.to_lowercase().chars() {
        let is_slash = ch == '/' || ch == '\\';
        if is_slash && previous_slash {
            continue;
        }
        normalized.push(if is_slash { '/' } else { ch });
        previous_slash = is_slash;
    }
    normalized
}

/// Validates a target submitted at link creation. The raw string is what gets
/// stored, so it is never rewritten here.
pub fn validate_target_url(raw: &str, own: &SelfReference) -> Result<Url, TargetUrlError> {
    if raw.is_empty() {
        return Err(TargetUrlError::Empty);
    }
    if raw.len() > MAX_TARGET_URL_LEN {
        return Err(TargetUrlError::TooLong);
    }
    if raw.trim() != raw || raw.chars().any(char::is_control) {
        return Err(TargetUrlError::Malformed);
    }

    let lower_prefix = raw
        .get(..8)
        .unwrap_or(raw)
        .to_ascii_lowercase();
    if !(lower_prefix.starts_with("http://") || lower_prefix.starts_with("https://")) {
        return Err(TargetUrlError::Malformed);
    }

    let url = parse_redirect_target(raw).ok_or(TargetUrlError::Malformed)?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(TargetUrlError::Malformed);
    }
    if own.matches(&url) {
        return Err(TargetUrlError::SelfReferential);
    }
    Ok(url)
}

/// Parses a stored target and accepts it only for http and https.
pub fn parse_redirect_target(raw: &str) -> Option<Url> {
    let url = Url::parse(raw).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}
