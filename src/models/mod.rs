pub mod click;
pub mod credential;
pub mod daily_counter;
pub mod daily_stats;
pub mod link;

pub use click::{ClickEvent, NewClickEvent};
pub use credential::{ApiCredential, CredentialStatus, NewCredential};
pub use daily_counter::{DailyCounter, StoredDailyCounter};
pub use daily_stats::DailyStats;
pub use link::{CreateLinkRequest, CreateLinkResponse, NewLink, ShortLink};
