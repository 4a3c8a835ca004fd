use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

pub const API_KEY_PREFIX: &str = "sb_live_";
pub const SECRET_KEY_PREFIX: &str = "sk_secret_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    Active,
    Inactive,
    Revoked,
}

impl CredentialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialStatus::Active => "active",
            CredentialStatus::Inactive => "inactive",
            CredentialStatus::Revoked => "revoked",
        }
    }
}

impl fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CredentialStatus::Active),
            "inactive" => Ok(CredentialStatus::Inactive),
            "revoked" => Ok(CredentialStatus::Revoked),
            other => Err(anyhow::anyhow!("unknown credential status '{other}'")),
        }
    }
}

/// A pre-shared key pair used by desktop clients to sign requests.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ApiCredential {
    pub id: i64,
    pub api_key: String,
    #[serde(skip_serializing)]
    pub secret_key: String,
    pub owner_id: i64,
    pub status: String,
    pub created_at: i64,
    pub last_used_at: Option<i64>,
    pub expires_at: Option<i64>,
}

impl ApiCredential {
    pub fn status(&self) -> Option<CredentialStatus> {
        self.status.parse().ok()
    }

    /// Active and not past its expiry at `now`.
    pub fn is_usable(&self, now: i64) -> bool {
        self.status() == Some(CredentialStatus::Active)
            && self.expires_at.is_none_or(|expires_at| now < expires_at)
    }
}

#[derive(Debug, Clone)]
pub struct NewCredential {
    pub api_key: String,
    pub secret_key: String,
    pub owner_id: i64,
    pub expires_at: Option<i64>,
}

impl NewCredential {
    /// Fresh random key pair for `owner_id`.
    pub fn generate(owner_id: i64, expires_at: Option<i64>) -> Self {
        Self {
            api_key: format!("{API_KEY_PREFIX}{}", crate::links::slug::random_base62(24)),
            secret_key: format!("{SECRET_KEY_PREFIX}{}", crate::links::slug::random_base62(32)),
            owner_id,
            expires_at,
        }
    }
}
