//! Session-authenticated stats endpoints and the live click stream.

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::{Stream, StreamExt};

use super::middleware::SessionOwner;
use crate::analytics::models::{
    parse_date, DateRange, DateRangeError, DeviceReport, LinkDetail, Overview, PatternReport,
    PeriodComparison, RefererReport,
};
use crate::analytics::FeedMessage;
use crate::app::Services;
use crate::error::ApiError;
use crate::storage::unix_now;

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub range: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub platform: Option<String>,
}

impl RangeQuery {
    fn resolve(&self, today: chrono::NaiveDate) -> Result<DateRange, DateRangeError> {
        DateRange::resolve(
            self.range.as_deref().filter(|r| !r.is_empty()),
            self.start_date.as_deref().filter(|d| !d.is_empty()),
            self.end_date.as_deref().filter(|d| !d.is_empty()),
            today,
        )
    }

    /// `all` and empty mean no filter.
    fn platform(&self) -> Option<&str> {
        self.platform
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty() && !p.eq_ignore_ascii_case("all"))
    }
}

#[derive(Debug, Deserialize)]
pub struct ComparisonQuery {
    #[serde(flatten)]
    pub current: RangeQuery,
    pub previous_start: Option<String>,
    pub previous_end: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub success: bool,
    pub data: T,
}

fn ok<T>(data: T) -> Json<DataResponse<T>> {
    Json(DataResponse {
        success: true,
        data,
    })
}

/// `GET /stats`
pub async fn get_stats(
    State(services): State<Arc<Services>>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<DataResponse<Overview>>, ApiError> {
    let engine = &services.analytics;
    let range = query.resolve(engine.today())?;
    Ok(ok(engine.overview(&range, query.platform()).await?))
}

/// `GET /analytics/referers`
pub async fn get_referers(
    State(services): State<Arc<Services>>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<DataResponse<RefererReport>>, ApiError> {
    let engine = &services.analytics;
    let range = query.resolve(engine.today())?;
    Ok(ok(engine.referer_report(&range, query.platform()).await?))
}

/// `GET /analytics/devices`
pub async fn get_devices(
    State(services): State<Arc<Services>>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<DataResponse<DeviceReport>>, ApiError> {
    let engine = &services.analytics;
    let range = query.resolve(engine.today())?;
    Ok(ok(engine.device_report(&range, query.platform()).await?))
}

/// `GET /analytics/patterns`
pub async fn get_patterns(
    State(services): State<Arc<Services>>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<DataResponse<PatternReport>>, ApiError> {
    let engine = &services.analytics;
    let range = query.resolve(engine.today())?;
    Ok(ok(engine.pattern_report(&range, query.platform()).await?))
}

/// `GET /analytics/comparison`; without explicit previous dates the
/// preceding window of equal length is used.
pub async fn get_comparison(
    State(services): State<Arc<Services>>,
    Query(query): Query<ComparisonQuery>,
) -> Result<Json<DataResponse<PeriodComparison>>, ApiError> {
    let engine = &services.analytics;
    let current = query.current.resolve(engine.today())?;
    let previous = match (
        query.previous_start.as_deref().filter(|d| !d.is_empty()),
        query.previous_end.as_deref().filter(|d| !d.is_empty()),
    ) {
        (Some(start), Some(end)) => DateRange::new(parse_date(start)?, parse_date(end)?)?,
        (None, None) => current.previous(),
        _ => return Err(DateRangeError::Incomplete.into()),
    };

    Ok(ok(engine
        .period_comparison(&current, &previous, query.current.platform())
        .await?))
}

/// `GET /links/{id}/analytics`
pub async fn get_link_analytics(
    State(services): State<Arc<Services>>,
    Path(link_id): Path<i64>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<DataResponse<LinkDetail>>, ApiError> {
    let engine = &services.analytics;
    let range = query.resolve(engine.today())?;
    engine
        .link_detailed_stats(link_id, &range)
        .await?
        .map(ok)
        .ok_or(ApiError::NotFound("link"))
}

fn to_event(message: FeedMessage) -> Event {
    match message {
        FeedMessage::Click(click) => Event::default()
            .event("click")
            .id(click.id.to_string())
            .data(serde_json::to_string(&click).unwrap_or_default()),
        FeedMessage::Heartbeat => Event::default()
            .event("heartbeat")
            .data(unix_now().to_string()),
        FeedMessage::SessionReplaced => Event::default()
            .event("session_replaced")
            .data("another session opened this stream"),
        FeedMessage::Closed => Event::default().event("end").data("reconnect to continue"),
    }
}

/// `GET /analytics/stream`: live clicks as server-sent events.
pub async fn stream_clicks(
    State(services): State<Arc<Services>>,
    Extension(SessionOwner(owner)): Extension<SessionOwner>,
    Query(query): Query<RangeQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let messages = services
        .feed
        .subscribe(owner, query.platform().map(str::to_string))
        .await?;
    let events = messages.map(|message| Ok::<_, Infallible>(to_event(message)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
