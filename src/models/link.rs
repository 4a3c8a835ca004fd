use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A slug mapped to an affiliate target.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ShortLink {
    pub id: i64,
    pub slug: String,
    pub target_url: String,
    pub platform: String,
    pub click_count: i64,
    pub owner_id: Option<i64>,
    pub created_at: i64,
}

/// Values needed to insert a link; id, counter and timestamps come from storage.
#[derive(Debug, Clone)]
pub struct NewLink {
    pub slug: String,
    pub target_url: String,
    pub platform: String,
    pub owner_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateLinkRequest {
    pub target_url: String,
    #[serde(default)]
    pub slug: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateLinkResponse {
    pub success: bool,
    pub short_link: String,
    pub slug: String,
    pub target_url: String,
    pub platform: String,
    pub created_at: String,
}

/// Per-link metadata keys stored alongside the registry.
pub mod meta_keys {
    pub const TODAY_CLICKS: &str = "today_clicks";
    pub const TODAY_VISITORS: &str = "today_visitors";
    pub const LOADING_MESSAGE: &str = "loading_message";
}
