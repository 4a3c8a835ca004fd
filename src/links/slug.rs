use rand::RngExt;
use regex::Regex;
use std::sync::LazyLock;

const BASE62: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

pub const GENERATED_SLUG_LEN: usize = 6;
pub const GENERATION_ATTEMPTS: usize = 3;
pub const MAX_SLUG_LEN: usize = 64;

static SLUG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("slug pattern is valid"));

/// Random string over `[0-9A-Za-z]`.
pub fn random_base62(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| BASE62[rng.random_range(0..BASE62.len())] as char)
        .collect()
}

pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty() && slug.len() <= MAX_SLUG_LEN && SLUG_PATTERN.is_match(slug)
}
