use url::{Host, Url};

pub const UNKNOWN_PLATFORM: &str = "Unknown";

/// Second-level suffixes under which the registrable name is three labels long.
const TWO_LEVEL_TLDS: &[&str] = &["co.kr", "com.cn", "co.jp", "co.uk", "com.au"];

/// Hosts with a well-known display name. Matched on the host or any subdomain of it.
const NAMED_HOSTS: &[(&str, &str)] = &[
    ("blog.naver.com", "Naver Blog"),
    ("cafe.naver.com", "Naver Cafe"),
    ("smartstore.naver.com", "Naver Smart Store"),
    ("shopping.naver.com", "Naver Shopping"),
    ("coupang.com", "Coupang"),
    ("coupa.ng", "Coupang"),
    ("aliexpress.com", "AliExpress"),
    ("aliexpress.kr", "AliExpress"),
    ("amzn.to", "Amazon"),
    ("amzn.asia", "Amazon"),
    ("temu.com", "Temu"),
    ("temu.to", "Temu"),
    ("youtube.com", "YouTube"),
    ("youtu.be", "YouTube"),
    ("instagram.com", "Instagram"),
];

/// Derives the platform tag of a target URL from its host.
pub fn detect_platform(target_url: &str) -> String {
    let Ok(url) = Url::parse(target_url) else {
        return UNKNOWN_PLATFORM.to_string();
    };

    let host = match url.host() {
        Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_ascii_lowercase(),
        Some(Host::Ipv4(ip)) => return ip.to_string(),
        Some(Host::Ipv6(ip)) => return ip.to_string(),
        _ => return UNKNOWN_PLATFORM.to_string(),
    };
    let host = host.strip_prefix("www.").unwrap_or(&host);

    if let Some((_, name)) = NAMED_HOSTS
        .iter()
        .find(|(domain, _)| host_matches(host, domain))
    {
        return (*name).to_string();
    }

    let domain = registered_domain(host);
    // amazon.com, amazon.co.kr, amazon.de, ...
    if domain.split('.').next() == Some("amazon") {
        return "Amazon".to_string();
    }
    domain
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// `s.click.aliexpress.com` -> `aliexpress.com`, `shop.example.co.kr` -> `example.co.kr`.
pub fn registered_domain(host: &str) -> String {
    let labels: Vec<&str> = host.trim_end_matches('.').split('.').collect();
    let count = labels.len();
    if count < 2 {
        return host.to_string();
    }

    let last_two = format!("{}.{}", labels[count - 2], labels[count - 1]);
    if TWO_LEVEL_TLDS.contains(&last_two.as_str()) && count >= 3 {
        format!("{}.{}", labels[count - 3], last_two)
    } else {
        last_two
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_platforms() {
        assert_eq!(detect_platform("https://www.coupang.com/x"), "Coupang");
        assert_eq!(detect_platform("https://link.coupang.com/a/b/c"), "Coupang");
        assert_eq!(detect_platform("https://coupa.ng/abc"), "Coupang");
        assert_eq!(detect_platform("https://s.click.aliexpress.com/e/xyz"), "AliExpress");
        assert_eq!(detect_platform("https://www.amazon.co.kr/dp/1"), "Amazon");
        assert_eq!(detect_platform("https://amzn.to/3abc"), "Amazon");
        assert_eq!(detect_platform("https://www.temu.com/x"), "Temu");
        assert_eq!(detect_platform("https://youtu.be/xyz123"), "YouTube");
        assert_eq!(detect_platform("https://www.youtube.com/watch?v=xyz"), "YouTube");
        assert_eq!(detect_platform("https://www.instagram.com/reel/123"), "Instagram");
    }

    #[test]
    fn test_naver_services() {
        assert_eq!(detect_platform("https://blog.naver.com/profile"), "Naver Blog");
        assert_eq!(detect_platform("https://m.blog.naver.com/x"), "Naver Blog");
        assert_eq!(detect_platform("https://cafe.naver.com/feco"), "Naver Cafe");
        assert_eq!(detect_platform("https://smartstore.naver.com/store"), "Naver Smart Store");
        assert_eq!(detect_platform("https://shopping.naver.com/home"), "Naver Shopping");
        assert_eq!(detect_platform("https://news.naver.com/a"), "naver.com");
    }

    #[test]
    fn test_generic_registered_domain() {
        assert_eq!(detect_platform("https://unknown-site.co.kr"), "unknown-site.co.kr");
        assert_eq!(detect_platform("http://shop.unknown-site.co.kr/p"), "unknown-site.co.kr");
        assert_eq!(detect_platform("https://deals.example.com/p"), "example.com");
        // a bare two-level suffix has nothing to strip
        assert_eq!(detect_platform("https://co.kr/"), "co.kr");
        // lookalike hosts are not the named platform
        assert_eq!(detect_platform("https://notcoupang.com/"), "notcoupang.com");
    }

    #[test]
    fn test_unknown_inputs() {
        assert_eq!(detect_platform("not-a-url"), UNKNOWN_PLATFORM);
        assert_eq!(detect_platform(""), UNKNOWN_PLATFORM);
        assert_eq!(detect_platform("mailto:someone@example.com"), UNKNOWN_PLATFORM);
    }

    #[test]
    fn test_ip_hosts_are_kept_whole() {
        assert_eq!(detect_platform("http://192.168.0.10:8080/x"), "192.168.0.10");
    }
}
