use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const MAX_REFERER_LEN: usize = 500;
pub const MAX_USER_AGENT_LEN: usize = 500;

/// One recorded visit. Rows are never updated after insert.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClickEvent {
    pub id: i64,
    pub link_id: i64,
    pub visitor_ip_hash: String,
    pub platform: String,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
    pub device: String,
    pub os: String,
    pub browser: String,
    pub visited_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewClickEvent {
    pub link_id: i64,
    pub visitor_ip_hash: String,
    pub platform: String,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
    pub device: String,
    pub os: String,
    pub browser: String,
    pub visited_at: i64,
}

impl NewClickEvent {
    pub fn into_event(self, id: i64) -> ClickEvent {
        ClickEvent {
            id,
            link_id: self.link_id,
            visitor_ip_hash: self.visitor_ip_hash,
            platform: self.platform,
            referer: self.referer,
            user_agent: self.user_agent,
            device: self.device,
            os: self.os,
            browser: self.browser,
            visited_at: self.visited_at,
        }
    }
}

/// Cuts `value` to at most `max` characters, never splitting a UTF-8 sequence.
pub fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        let korean = "가".repeat(600);
        let cut = truncate_chars(&korean, MAX_REFERER_LEN);
        assert_eq!(cut.chars().count(), 500);
        assert_eq!(truncate_chars("short", 500), "short");
    }
}
