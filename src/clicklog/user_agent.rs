//! Device, OS and browser classification.
//!
//! woothee supplies the base OS, browser and device category. In-app browsers,
//! Chromium Edge and tablets are layered on top since woothee folds them into
//! Chrome, Safari and smartphone.

use regex::Regex;
use std::sync::LazyLock;
use woothee::parser::Parser;

pub const UNKNOWN: &str = "Unknown";

static TABLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"tablet|ipad|playbook|silk").expect("tablet pattern is valid"));

static NAVER_INAPP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"naver\((inapp|search)| naver/|naversearchapp").expect("naver pattern is valid")
});

static EDGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"edg(e|a|ios)?/").expect("edge pattern is valid"));

/// Device class, OS and browser derived from a User-Agent header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAgent {
    pub device: &'static str,
    pub os: &'static str,
    pub browser: &'static str,
}

impl ParsedAgent {
    fn unknown() -> Self {
        Self {
            device: UNKNOWN,
            os: UNKNOWN,
            browser: UNKNOWN,
        }
    }
}

pub fn parse(user_agent: Option<&str>) -> ParsedAgent {
    let raw = user_agent.unwrap_or_default().trim();
    if raw.is_empty() {
        return ParsedAgent::unknown();
    }

    let parser = Parser::new();
    let result = parser.parse(raw).unwrap_or_default();
    let ua = raw.to_lowercase();
    ParsedAgent {
        device: device(&ua, &result.category),
        os: os(&ua, &result.os),
        browser: browser(&ua, &result.name),
    }
}

fn device(ua: &str, category: &str) -> &'static str {
    let android_tablet =
        ua.contains("android") && !ua.contains("mobile") && !ua.contains("opera mini");
    if TABLET.is_match(ua) || android_tablet {
        return "Tablet";
    }
    match category {
        "smartphone" | "mobilephone" => "Mobile",
        _ => "Desktop",
    }
}

fn os(ua: &str, os: &str) -> &'static str {
    // iOS agents say "like Mac OS X", so they are checked before macOS
    if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ipod") {
        return "iOS";
    }
    match os {
        os if os.starts_with("Windows") => "Windows",
        "iPhone" | "iPad" | "iPod" | "iOS" => "iOS",
        "Mac OSX" | "Mac OS Classic" => "macOS",
        "Android" => "Android",
        "Linux" | "ChromeOS" => "Linux",
        _ => UNKNOWN,
    }
}

fn browser(ua: &str, name: &str) -> &'static str {
    // in-app browsers embed Chrome/Safari tokens, so they go first
    if ua.contains("kakaotalk") {
        return "KakaoTalk";
    }
    if NAVER_INAPP.is_match(ua) {
        return "Naver";
    }
    if ua.contains("samsungbrowser") {
        return "Samsung";
    }
    if EDGE.is_match(ua) {
        return "Edge";
    }
    match name {
        "Chrome" => "Chrome",
        "Safari" => "Safari",
        "Firefox" => "Firefox",
        "Opera" => "Opera",
        "Edge" => "Edge",
        "Internet Explorer" => "IE",
        // Android WebView without an in-app marker
        "Webview" => "Chrome",
        _ => UNKNOWN,
    }
}
