use std::collections::{HashMap, HashSet};
use url::Url;

use super::models::{RefererGroups, RefererStat};
use crate::storage::filter::RefererVisitorRow;

pub const DIRECT: &str = "Direct";

const SNS_DOMAINS: &[&str] = &[
    "facebook.com",
    "instagram.com",
    "twitter.com",
    "x.com",
    "t.co",
    "linkedin.com",
    "tiktok.com",
    "youtube.com",
    "reddit.com",
    "pinterest.com",
    "threads.net",
    "naver.me",
    "blog.naver.com",
    "cafe.naver.com",
    "band.us",
    "kakao.com",
    "open.kakao.com",
];

const SEARCH_DOMAINS: &[&str] = &[
    "google.com",
    "google.co.kr",
    "bing.com",
    "yahoo.com",
    "naver.com",
    "daum.net",
    "zum.com",
    "duckduckgo.com",
    "baidu.com",
];

/// Host of a referer with scheme and `www.` removed; `Direct` when empty.
pub fn referer_host(referer: Option<&str>) -> String {
    let raw = match referer.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return DIRECT.to_string(),
    };

    let host = match Url::parse(raw) {
        Ok(url) => url.host_str().map(str::to_ascii_lowercase),
        Err(_) => None,
    }
    .unwrap_or_else(|| {
        // scheme-less or otherwise odd values: cut at the first delimiter
        let rest = raw
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(raw);
        rest.split(['/', '?', '#'])
            .next()
            .unwrap_or(rest)
            .to_ascii_lowercase()
    });

    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if host.is_empty() {
        DIRECT.to_string()
    } else {
        host
    }
}

fn in_list(host: &str, domains: &[&str]) -> bool {
    domains.iter().any(|domain| {
        host == *domain
            || host
                .strip_suffix(domain)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

/// Clicks and distinct visitors per referer host, busiest first.
pub fn referer_stats(rows: &[RefererVisitorRow], limit: usize) -> Vec<RefererStat> {
    let mut by_host: HashMap<String, (i64, HashSet<&str>)> = HashMap::new();
    for row in rows {
        let entry = by_host
            .entry(referer_host(row.referer.as_deref()))
            .or_default();
        entry.0 += row.clicks;
        entry.1.insert(row.visitor_ip_hash.as_str());
    }

    let mut stats: Vec<RefererStat> = by_host
        .into_iter()
        .map(|(referer, (clicks, visitors))| RefererStat {
            referer,
            clicks,
            unique_visitors: visitors.len() as i64,
        })
        .collect();
    stats.sort_by(|a, b| b.clicks.cmp(&a.clicks).then_with(|| a.referer.cmp(&b.referer)));
    stats.truncate(limit);
    stats
}

/// Buckets clicks into Direct, SNS, Search and Other. SNS is checked first,
/// so `blog.naver.com` counts as SNS even though `naver.com` is a search host.
pub fn referer_groups(rows: &[RefererVisitorRow]) -> RefererGroups {
    let mut groups = RefererGroups::default();
    for row in rows {
        let host = referer_host(row.referer.as_deref());
        if host == DIRECT {
            groups.direct += row.clicks;
        } else if in_list(&host, SNS_DOMAINS) {
            groups.sns += row.clicks;
        } else if in_list(&host, SEARCH_DOMAINS) {
            groups.search += row.clicks;
        } else {
            groups.other += row.clicks;
        }
    }
    groups
}
