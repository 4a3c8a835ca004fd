/// Half-open interval of unix seconds, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBounds {
    pub start: i64,
    pub end: i64,
}

impl TimeBounds {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }
}

/// Selection of click events shared by every Event Store query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickFilter {
    pub bounds: TimeBounds,
    pub platform: Option<String>,
    pub link_id: Option<i64>,
}

impl ClickFilter {
    pub fn new(bounds: TimeBounds) -> Self {
        Self {
            bounds,
            platform: None,
            link_id: None,
        }
    }

    pub fn with_platform(mut self, platform: Option<&str>) -> Self {
        self.platform = platform.map(str::to_string);
        self
    }

    pub fn with_link(mut self, link_id: i64) -> Self {
        self.link_id = Some(link_id);
        self
    }

    pub fn with_bounds(&self, bounds: TimeBounds) -> Self {
        Self {
            bounds,
            ..self.clone()
        }
    }
}

/// Calendar bucket of `visited_at`, computed in the store after shifting by the local UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBucket {
    /// 0..=23
    HourOfDay,
    /// Days since 1970-01-01 in local time
    Day,
    /// 0 = Sunday ..= 6 = Saturday
    Weekday,
}

/// Categorical column of the event table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Platform,
    Device,
    Os,
    Browser,
}

impl Dimension {
    pub fn column(&self) -> &'static str {
        match self {
            Dimension::Platform => "platform",
            Dimension::Device => "device",
            Dimension::Os => "os",
            Dimension::Browser => "browser",
        }
    }
}

/// Clicks of one visitor from one referer value.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RefererVisitorRow {
    pub referer: Option<String>,
    pub visitor_ip_hash: String,
    pub clicks: i64,
}

/// Activity of one visitor seen inside a range, with look-back history.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct VisitorActivity {
    pub visitor_ip_hash: String,
    /// Distinct local days with at least one visit, look-back window included
    pub active_days: i64,
    pub visits_in_range: i64,
}

/// Bucket expression over `visited_at`. The offset is bound once per occurrence
/// of the placeholder; callers push it via `push_bind`.
pub(crate) fn bucket_sql(bucket: TimeBucket) -> (&'static str, &'static str) {
    match bucket {
        TimeBucket::HourOfDay => ("((visited_at + ", ") % 86400) / 3600"),
        TimeBucket::Day => ("(visited_at + ", ") / 86400"),
        TimeBucket::Weekday => ("(((visited_at + ", ") / 86400) + 4) % 7"),
    }
}
