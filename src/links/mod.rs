//! Link registry operations: validation, slug allocation and creation.

pub mod platform;
pub mod slug;
pub mod target;

use chrono::{DateTime, SecondsFormat};
use std::sync::Arc;
use thiserror::Error;

use crate::config::LinkConfig;
use crate::models::{CreateLinkRequest, CreateLinkResponse, NewLink, ShortLink};
use crate::storage::{Storage, StorageError};

use self::slug::{is_valid_slug, random_base62, GENERATED_SLUG_LEN, GENERATION_ATTEMPTS};
use self::target::{validate_target_url, SelfReference, TargetUrlError};

#[derive(Debug, Error)]
pub enum CreateLinkError {
    #[error(transparent)]
    InvalidUrl(#[from] TargetUrlError),
    #[error("slug must be 1-64 characters of letters, digits, '-' or '_'")]
    InvalidSlug,
    #[error("slug '{0}' is already in use")]
    Conflict(String),
    #[error("could not allocate a unique slug after {GENERATION_ATTEMPTS} attempts")]
    GenerationFailed,
    #[error("stored target does not match the submitted URL")]
    StoredMismatch,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub struct LinkService {
    storage: Arc<dyn Storage>,
    links: LinkConfig,
    own: SelfReference,
}

impl LinkService {
    pub fn new(storage: Arc<dyn Storage>, links: LinkConfig) -> anyhow::Result<Self> {
        let own = SelfReference::from_config(&links)?;
        Ok(Self {
            storage,
            links,
            own,
        })
    }

    pub fn link_config(&self) -> &LinkConfig {
        &self.links
    }

    /// Registers a new short link for `owner_id`.
    ///
    /// After the insert the row is read back by slug: a different id means a
    /// concurrent writer won the slug, a different target means the store
    /// altered the URL. Both remove the row just written.
    pub async fn create(
        &self,
        request: &CreateLinkRequest,
        owner_id: Option<i64>,
    ) -> Result<CreateLinkResponse, CreateLinkError> {
        validate_target_url(&request.target_url, &self.own)?;
        let platform = platform::detect_platform(&request.target_url);

        let created = match request.slug.as_deref().filter(|s| !s.is_empty()) {
            Some(slug) => {
                if !is_valid_slug(slug) {
                    return Err(CreateLinkError::InvalidSlug);
                }
                self.insert(slug, &request.target_url, &platform, owner_id)
                    .await?
                    .ok_or_else(|| CreateLinkError::Conflict(slug.to_string()))?
            }
            None => {
                self.insert_generated(&request.target_url, &platform, owner_id)
                    .await?
            }
        };

        self.verify_stored(&created, &request.target_url).await?;

        tracing::info!(
            slug = %created.slug,
            platform = %created.platform,
            owner_id = ?owner_id,
            "short link created"
        );

        let created_at = DateTime::from_timestamp(created.created_at, 0)
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default();

        Ok(CreateLinkResponse {
            success: true,
            short_link: self.links.short_link(&created.slug),
            slug: created.slug,
            target_url: created.target_url,
            platform: created.platform,
            created_at,
        })
    }

    async fn insert_generated(
        &self,
        target_url: &str,
        platform: &str,
        owner_id: Option<i64>,
    ) -> Result<ShortLink, CreateLinkError> {
        for attempt in 1..=GENERATION_ATTEMPTS {
            let candidate = random_base62(GENERATED_SLUG_LEN);
            if self.storage.slug_exists(&candidate).await? {
                tracing::debug!(slug = %candidate, attempt, "generated slug already taken");
                continue;
            }
            if let Some(link) = self.insert(&candidate, target_url, platform, owner_id).await? {
                return Ok(link);
            }
        }
        Err(CreateLinkError::GenerationFailed)
    }

    /// `None` when the slug is already taken.
    async fn insert(
        &self,
        slug: &str,
        target_url: &str,
        platform: &str,
        owner_id: Option<i64>,
    ) -> Result<Option<ShortLink>, CreateLinkError> {
        let new_link = NewLink {
            slug: slug.to_string(),
            target_url: target_url.to_string(),
            platform: platform.to_string(),
            owner_id,
        };
        match self.storage.create_link(&new_link).await {
            Ok(link) => Ok(Some(link)),
            Err(StorageError::Conflict) => Ok(None),
            Err(StorageError::Other(err)) => Err(CreateLinkError::Storage(err)),
        }
    }

    async fn verify_stored(
        &self,
        created: &ShortLink,
        submitted: &str,
    ) -> Result<(), CreateLinkError> {
        let stored = self
            .storage
            .get_link_by_slug(&created.slug)
            .await?
            .ok_or_else(|| anyhow::anyhow!("link '{}' vanished after insert", created.slug))?;

        if stored.id != created.id {
            tracing::warn!(slug = %created.slug, "slug claimed concurrently, rolling back");
            self.rollback(created.id).await;
            return Err(CreateLinkError::Conflict(created.slug.clone()));
        }
        if stored.target_url != submitted {
            tracing::error!(
                slug = %created.slug,
                submitted_len = submitted.len(),
                stored_len = stored.target_url.len(),
                "stored target differs from submission, rolling back"
            );
            self.rollback(created.id).await;
            return Err(CreateLinkError::StoredMismatch);
        }
        Ok(())
    }

    async fn rollback(&self, id: i64) {
        if let Err(err) = self.storage.delete_link(id).await {
            tracing::error!(link_id = id, error = %err, "failed to roll back link");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    async fn service() -> LinkService {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        LinkService::new(
            Arc::new(storage),
            LinkConfig {
                public_base_url: "https://s.example.com".to_string(),
                short_path: "go".to_string(),
            },
        )
        .unwrap()
    }

    fn request(target_url: &str, slug: Option<&str>) -> CreateLinkRequest {
        CreateLinkRequest {
            target_url: target_url.to_string(),
            slug: slug.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_create_with_generated_slug() {
        let service = service().await;
        let response = service
            .create(&request("https://www.coupang.com/vp/products/1", None), Some(3))
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.slug.len(), GENERATED_SLUG_LEN);
        assert_eq!(response.platform, "Coupang");
        assert_eq!(
            response.short_link,
            format!("https://s.example.com/go/{}", response.slug)
        );
        assert!(response.created_at.ends_with('Z'));
    }

    #[tokio::test]
    async fn test_duplicate_slug_conflicts() {
        let service = service().await;
        service
            .create(&request("https://example.com/a", Some("promo")), None)
            .await
            .unwrap();
        let err = service
            .create(&request("https://example.com/b", Some("promo")), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CreateLinkError::Conflict(slug) if slug == "promo"));
    }

    #[tokio::test]
    async fn test_rejects_invalid_input() {
        let service = service().await;
        let err = service
            .create(&request("https://example.com", Some("bad slug")), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CreateLinkError::InvalidSlug));

        let err = service
            .create(&request("https://s.example.com/go/loop", None), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CreateLinkError::InvalidUrl(TargetUrlError::SelfReferential)
        ));
    }
}
