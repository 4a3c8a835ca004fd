use crate::models::{
    ApiCredential, ClickEvent, CredentialStatus, DailyStats, NewClickEvent, NewCredential,
    NewLink, ShortLink,
};
use crate::storage::filter::{
    bucket_sql, ClickFilter, Dimension, RefererVisitorRow, TimeBucket, VisitorActivity,
};
use crate::storage::rows::{DailyStatsRow, CREDENTIAL_COLUMNS, EVENT_COLUMNS, LINK_COLUMNS};
use crate::storage::{unix_now, Storage, StorageError, StorageResult};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::sync::Arc;

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &ClickFilter) {
    qb.push(" WHERE visited_at >= ")
        .push_bind(filter.bounds.start)
        .push(" AND visited_at < ")
        .push_bind(filter.bounds.end);
    if let Some(platform) = &filter.platform {
        qb.push(" AND platform = ").push_bind(platform.clone());
    }
    if let Some(link_id) = filter.link_id {
        qb.push(" AND link_id = ").push_bind(link_id);
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                id BIGSERIAL PRIMARY KEY,
                slug TEXT NOT NULL UNIQUE,
                target_url TEXT NOT NULL,
                platform TEXT NOT NULL,
                click_count BIGINT NOT NULL DEFAULT 0,
                owner_id BIGINT,
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS link_meta (
                link_id BIGINT NOT NULL,
                meta_key TEXT NOT NULL,
                meta_value TEXT NOT NULL,
                PRIMARY KEY (link_id, meta_key)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS click_events (
                id BIGSERIAL PRIMARY KEY,
                link_id BIGINT NOT NULL,
                visitor_ip_hash TEXT NOT NULL,
                platform TEXT NOT NULL,
                referer TEXT,
                user_agent TEXT,
                device TEXT NOT NULL,
                os TEXT NOT NULL,
                browser TEXT NOT NULL,
                visited_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_click_events_visited_at ON click_events(visited_at)",
            "CREATE INDEX IF NOT EXISTS idx_click_events_link ON click_events(link_id, visited_at)",
            "CREATE INDEX IF NOT EXISTS idx_click_events_platform ON click_events(platform, visited_at)",
            "CREATE INDEX IF NOT EXISTS idx_click_events_visitor ON click_events(visitor_ip_hash, visited_at)",
        ] {
            sqlx::query(ddl).execute(self.pool.as_ref()).await?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS api_credentials (
                id BIGSERIAL PRIMARY KEY,
                api_key TEXT NOT NULL UNIQUE,
                secret_key TEXT NOT NULL,
                owner_id BIGINT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                created_at BIGINT NOT NULL,
                last_used_at BIGINT,
                expires_at BIGINT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                setting_key TEXT PRIMARY KEY,
                setting_value TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_stats (
                stats_date TEXT PRIMARY KEY,
                total_clicks BIGINT NOT NULL,
                unique_visitors BIGINT NOT NULL,
                platform_share TEXT NOT NULL,
                referers TEXT NOT NULL,
                updated_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn create_link(&self, link: &NewLink) -> StorageResult<ShortLink> {
        let sql = format!(
            "INSERT INTO links (slug, target_url, platform, click_count, owner_id, created_at) \
             VALUES ($1, $2, $3, 0, $4, $5) \
             ON CONFLICT(slug) DO NOTHING \
             RETURNING {LINK_COLUMNS}"
        );
        let created = sqlx::query_as::<_, ShortLink>(&sql)
            .bind(&link.slug)
            .bind(&link.target_url)
            .bind(&link.platform)
            .bind(link.owner_id)
            .bind(unix_now())
            .fetch_optional(self.pool.as_ref())
            .await?;

        created.ok_or(StorageError::Conflict)
    }

    async fn get_link(&self, id: i64) -> Result<Option<ShortLink>> {
        let sql = format!("SELECT {LINK_COLUMNS} FROM links WHERE id = $1");
        let link = sqlx::query_as::<_, ShortLink>(&sql)
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(link)
    }

    async fn get_link_by_slug(&self, slug: &str) -> Result<Option<ShortLink>> {
        let sql = format!("SELECT {LINK_COLUMNS} FROM links WHERE slug = $1");
        let link = sqlx::query_as::<_, ShortLink>(&sql)
            .bind(slug)
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(link)
    }

    async fn get_links_by_ids(&self, ids: &[i64]) -> Result<Vec<ShortLink>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE id IN ("
        ));
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        let links = qb
            .build_query_as::<ShortLink>()
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(links)
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM links WHERE slug = $1")
            .bind(slug)
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(count > 0)
    }

    async fn delete_link(&self, id: i64) -> Result<bool> {
        sqlx::query("DELETE FROM link_meta WHERE link_id = $1")
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;
        let result = sqlx::query("DELETE FROM links WHERE id = $1")
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn increment_clicks(&self, id: i64) -> Result<i64> {
        let count: Option<i64> = sqlx::query_scalar(
            "UPDATE links SET click_count = COALESCE(click_count, 0) + 1 WHERE id = $1 RETURNING click_count",
        )
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;
        count.ok_or_else(|| anyhow!("link {id} not found"))
    }

    async fn count_links(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM links")
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(count)
    }

    async fn get_link_meta(&self, link_id: i64, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar(
            "SELECT meta_value FROM link_meta WHERE link_id = $1 AND meta_key = $2",
        )
        .bind(link_id)
        .bind(key)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(value)
    }

    async fn set_link_meta(&self, link_id: i64, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO link_meta (link_id, meta_key, meta_value)
            VALUES ($1, $2, $3)
            ON CONFLICT(link_id, meta_key) DO UPDATE SET meta_value = excluded.meta_value
            "#,
        )
        .bind(link_id)
        .bind(key)
        .bind(value)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn insert_click(&self, event: &NewClickEvent) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO click_events
                (link_id, visitor_ip_hash, platform, referer, user_agent, device, os, browser, visited_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(event.link_id)
        .bind(&event.visitor_ip_hash)
        .bind(&event.platform)
        .bind(&event.referer)
        .bind(&event.user_agent)
        .bind(&event.device)
        .bind(&event.os)
        .bind(&event.browser)
        .bind(event.visited_at)
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(id)
    }

    async fn count_clicks(&self, filter: &ClickFilter) -> Result<i64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM click_events");
        push_filter(&mut qb, filter);
        let count = qb
            .build_query_scalar::<i64>()
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(count)
    }

    async fn count_unique_visitors(&self, filter: &ClickFilter) -> Result<i64> {
        let mut qb =
            QueryBuilder::<Postgres>::new("SELECT COUNT(DISTINCT visitor_ip_hash) FROM click_events");
        push_filter(&mut qb, filter);
        let count = qb
            .build_query_scalar::<i64>()
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(count)
    }

    async fn bucket_counts(
        &self,
        filter: &ClickFilter,
        bucket: TimeBucket,
        utc_offset_secs: i64,
    ) -> Result<Vec<(i64, i64)>> {
        let (head, tail) = bucket_sql(bucket);
        let mut qb = QueryBuilder::<Postgres>::new("SELECT ");
        qb.push(head)
            .push_bind(utc_offset_secs)
            .push(tail)
            .push(" AS bucket, COUNT(*) AS clicks FROM click_events");
        push_filter(&mut qb, filter);
        qb.push(" GROUP BY 1 ORDER BY 1");
        let rows = qb
            .build_query_as::<(i64, i64)>()
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(rows)
    }

    async fn dimension_counts(
        &self,
        filter: &ClickFilter,
        dimension: Dimension,
    ) -> Result<Vec<(String, i64)>> {
        let column = dimension.column();
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {column} AS value, COUNT(*) AS clicks FROM click_events"
        ));
        push_filter(&mut qb, filter);
        qb.push(format!(" GROUP BY {column} ORDER BY clicks DESC, value ASC"));
        let rows = qb
            .build_query_as::<(String, i64)>()
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(rows)
    }

    async fn top_link_counts(&self, filter: &ClickFilter, limit: i64) -> Result<Vec<(i64, i64)>> {
        let mut qb =
            QueryBuilder::<Postgres>::new("SELECT link_id, COUNT(*) AS clicks FROM click_events");
        push_filter(&mut qb, filter);
        qb.push(" GROUP BY link_id ORDER BY clicks DESC, link_id ASC LIMIT ")
            .push_bind(limit);
        let rows = qb
            .build_query_as::<(i64, i64)>()
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(rows)
    }

    async fn referer_visitor_counts(&self, filter: &ClickFilter) -> Result<Vec<RefererVisitorRow>> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT referer, visitor_ip_hash, COUNT(*) AS clicks FROM click_events",
        );
        push_filter(&mut qb, filter);
        qb.push(" GROUP BY referer, visitor_ip_hash");
        let rows = qb
            .build_query_as::<RefererVisitorRow>()
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(rows)
    }

    async fn visitor_activity(
        &self,
        filter: &ClickFilter,
        range_start: i64,
        utc_offset_secs: i64,
    ) -> Result<Vec<VisitorActivity>> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT visitor_ip_hash, COUNT(DISTINCT (visited_at + ",
        );
        qb.push_bind(utc_offset_secs)
            .push(") / 86400) AS active_days, COUNT(CASE WHEN visited_at >= ")
            .push_bind(range_start)
            .push(" THEN 1 END) AS visits_in_range FROM click_events");
        push_filter(&mut qb, filter);
        qb.push(" GROUP BY visitor_ip_hash HAVING COUNT(CASE WHEN visited_at >= ")
            .push_bind(range_start)
            .push(" THEN 1 END) > 0");
        let rows = qb
            .build_query_as::<VisitorActivity>()
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(rows)
    }

    async fn distinct_platforms(&self) -> Result<Vec<String>> {
        let platforms: Vec<String> = sqlx::query_scalar(
            "SELECT platform FROM links UNION SELECT platform FROM click_events ORDER BY 1",
        )
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(platforms)
    }

    async fn recent_clicks(
        &self,
        after_id: Option<i64>,
        platform: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ClickEvent>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {EVENT_COLUMNS} FROM click_events WHERE 1 = 1"
        ));
        if let Some(after_id) = after_id {
            qb.push(" AND id > ").push_bind(after_id);
        }
        if let Some(platform) = platform {
            qb.push(" AND platform = ").push_bind(platform.to_string());
        }
        let newest_first = after_id.is_none();
        qb.push(if newest_first {
            " ORDER BY id DESC LIMIT "
        } else {
            " ORDER BY id ASC LIMIT "
        })
        .push_bind(limit);

        let mut events = qb
            .build_query_as::<ClickEvent>()
            .fetch_all(self.pool.as_ref())
            .await?;
        if newest_first {
            events.reverse();
        }
        Ok(events)
    }

    async fn latest_click_id(&self) -> Result<i64> {
        let id: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) FROM click_events")
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(id)
    }

    async fn upsert_daily_stats(&self, stats: &DailyStats) -> Result<()> {
        let row = DailyStatsRow::encode(stats)?;
        sqlx::query(
            r#"
            INSERT INTO daily_stats
                (stats_date, total_clicks, unique_visitors, platform_share, referers, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT(stats_date) DO UPDATE SET
                total_clicks = excluded.total_clicks,
                unique_visitors = excluded.unique_visitors,
                platform_share = excluded.platform_share,
                referers = excluded.referers,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&row.stats_date)
        .bind(row.total_clicks)
        .bind(row.unique_visitors)
        .bind(&row.platform_share)
        .bind(&row.referers)
        .bind(row.updated_at)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn get_daily_stats(&self, date: NaiveDate) -> Result<Option<DailyStats>> {
        let row = sqlx::query_as::<_, DailyStatsRow>(
            r#"
            SELECT stats_date, total_clicks, unique_visitors, platform_share, referers, updated_at
            FROM daily_stats
            WHERE stats_date = $1
            "#,
        )
        .bind(date.format("%Y-%m-%d").to_string())
        .fetch_optional(self.pool.as_ref())
        .await?;
        row.map(DailyStatsRow::decode).transpose()
    }

    async fn insert_credential(&self, credential: &NewCredential) -> StorageResult<ApiCredential> {
        let sql = format!(
            "INSERT INTO api_credentials (api_key, secret_key, owner_id, status, created_at, expires_at) \
             VALUES ($1, $2, $3, 'active', $4, $5) \
             ON CONFLICT(api_key) DO NOTHING \
             RETURNING {CREDENTIAL_COLUMNS}"
        );
        let created = sqlx::query_as::<_, ApiCredential>(&sql)
            .bind(&credential.api_key)
            .bind(&credential.secret_key)
            .bind(credential.owner_id)
            .bind(unix_now())
            .bind(credential.expires_at)
            .fetch_optional(self.pool.as_ref())
            .await?;
        created.ok_or(StorageError::Conflict)
    }

    async fn get_credential(&self, api_key: &str) -> Result<Option<ApiCredential>> {
        let sql = format!("SELECT {CREDENTIAL_COLUMNS} FROM api_credentials WHERE api_key = $1");
        let credential = sqlx::query_as::<_, ApiCredential>(&sql)
            .bind(api_key)
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(credential)
    }

    async fn touch_credential(&self, api_key: &str, used_at: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE api_credentials
            SET last_used_at = CASE
                WHEN last_used_at IS NULL OR last_used_at < $1 THEN $2
                ELSE last_used_at
            END
            WHERE api_key = $3
            "#,
        )
        .bind(used_at)
        .bind(used_at)
        .bind(api_key)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn set_credential_status(&self, api_key: &str, status: CredentialStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE api_credentials SET status = $1 WHERE api_key = $2")
            .bind(status.as_str())
            .bind(api_key)
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_credentials(&self, owner_id: Option<i64>) -> Result<Vec<ApiCredential>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM api_credentials"
        ));
        if let Some(owner_id) = owner_id {
            qb.push(" WHERE owner_id = ").push_bind(owner_id);
        }
        qb.push(" ORDER BY id");
        let credentials = qb
            .build_query_as::<ApiCredential>()
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(credentials)
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT setting_value FROM settings WHERE setting_key = $1")
                .bind(key)
                .fetch_optional(self.pool.as_ref())
                .await?;
        Ok(value)
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (setting_key, setting_value)
            VALUES ($1, $2)
            ON CONFLICT(setting_key) DO UPDATE SET setting_value = excluded.setting_value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }
}
