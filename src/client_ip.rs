//! Client IP extraction from HTTP headers with trust validation
//!
//! Forwarding headers are only believed when the configuration says a proxy
//! sits in front of us:
//! - `cloudflare`: `CF-Connecting-IP`
//! - `standard`: RFC 7239 `Forwarded`, then `X-Forwarded-For`, walked right to
//!   left past the configured number of hops or the trusted CIDRs
//! - `none`: the socket peer address
//!
//! When `TRUSTED_PROXIES` is set, headers from a peer outside that list are
//! ignored.

use axum::http::HeaderMap;
use ipnet::IpNet;
use std::net::IpAddr;
use tracing::warn;

use crate::config::{ClientIpConfig, TrustedProxyMode};

pub fn extract_client_ip(
    headers: &HeaderMap,
    socket_addr: IpAddr,
    config: &ClientIpConfig,
) -> IpAddr {
    if !config.trusted_proxies.is_empty() && !is_trusted(socket_addr, &config.trusted_proxies) {
        return socket_addr;
    }

    match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).unwrap_or_else(|| {
            warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_addr
        }),
        TrustedProxyMode::Standard => extract_standard_ip(headers, config).unwrap_or(socket_addr),
        TrustedProxyMode::None => socket_addr,
    }
}

fn is_trusted(ip: IpAddr, trusted: &[IpNet]) -> bool {
    let ip = canonical(ip);
    trusted.iter().any(|net| net.contains(&ip))
}

/// IPv4-mapped IPv6 peers (`::ffff:a.b.c.d`) compare as IPv4.
fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

fn extract_standard_ip(headers: &HeaderMap, config: &ClientIpConfig) -> Option<IpAddr> {
    let chain = forwarded_chain(headers).or_else(|| x_forwarded_for_chain(headers))?;
    pick_from_chain(&chain, config)
}

/// `for=` values of RFC 7239 `Forwarded`, in header order.
fn forwarded_chain(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let forwarded = headers.get("forwarded")?.to_str().ok()?;

    let chain: Vec<IpAddr> = forwarded
        .split(',')
        .filter_map(|element| {
            element.split(';').find_map(|param| {
                let (key, value) = param.trim().split_once('=')?;
                if !key.eq_ignore_ascii_case("for") {
                    return None;
                }
                parse_forwarded_node(value)
            })
        })
        .collect();

    (!chain.is_empty()).then_some(chain)
}

/// `192.0.2.60`, `"192.0.2.60:4711"`, `"[2001:db8::1]:4711"`
fn parse_forwarded_node(value: &str) -> Option<IpAddr> {
    let value = value.trim().trim_matches('"');
    if let Some(rest) = value.strip_prefix('[') {
        return rest.split(']').next()?.parse().ok();
    }
    value
        .parse::<IpAddr>()
        .ok()
        .or_else(|| value.rsplit_once(':')?.0.parse().ok())
}

fn x_forwarded_for_chain(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let xff = headers.get("x-forwarded-for")?.to_str().ok()?;
    let chain: Vec<IpAddr> = xff
        .split(',')
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect();
    (!chain.is_empty()).then_some(chain)
}

/// Right-to-left: skip the configured hop count, or skip trusted proxies.
fn pick_from_chain(chain: &[IpAddr], config: &ClientIpConfig) -> Option<IpAddr> {
    if let Some(num_trusted) = config.num_trusted_proxies {
        return if chain.len() > num_trusted {
            Some(chain[chain.len() - num_trusted - 1])
        } else {
            chain.first().copied()
        };
    }

    if !config.trusted_proxies.is_empty() {
        return chain
            .iter()
            .rev()
            .find(|ip| !is_trusted(**ip, &config.trusted_proxies))
            .or_else(|| chain.first())
            .copied();
    }

    chain.last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn create_config(mode: TrustedProxyMode) -> ClientIpConfig {
        ClientIpConfig {
            trusted_proxy_mode: mode,
            trusted_proxies: vec![],
            num_trusted_proxies: None,
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_extract_client_ip_none_mode() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9"));
        let config = create_config(TrustedProxyMode::None);

        assert_eq!(extract_client_ip(&headers, ip("192.168.1.1"), &config), ip("192.168.1.1"));
    }

    #[test]
    fn test_extract_cloudflare_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", HeaderValue::from_static("203.0.113.1"));
        let config = create_config(TrustedProxyMode::Cloudflare);

        assert_eq!(extract_client_ip(&headers, ip("192.168.1.1"), &config), ip("203.0.113.1"));
        assert_eq!(
            extract_client_ip(&HeaderMap::new(), ip("192.168.1.1"), &config),
            ip("192.168.1.1")
        );
    }

    #[test]
    fn test_x_forwarded_for_rightmost_without_trust_list() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 198.51.100.1"),
        );
        let config = create_config(TrustedProxyMode::Standard);

        assert_eq!(extract_client_ip(&headers, ip("192.168.1.1"), &config), ip("198.51.100.1"));
    }

    #[test]
    fn test_hop_count_skips_known_proxies() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 198.51.100.1, 10.0.0.2"),
        );
        let mut config = create_config(TrustedProxyMode::Standard);
        config.num_trusted_proxies = Some(1);

        assert_eq!(extract_client_ip(&headers, ip("10.0.0.1"), &config), ip("198.51.100.1"));
    }

    #[test]
    fn test_trusted_cidrs_are_walked_right_to_left() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 198.51.100.7, 10.1.2.3"),
        );
        let mut config = create_config(TrustedProxyMode::Standard);
        config.trusted_proxies = vec!["10.0.0.0/8".parse().unwrap()];

        assert_eq!(extract_client_ip(&headers, ip("10.0.0.1"), &config), ip("198.51.100.7"));
        // headers from an untrusted peer are ignored
        assert_eq!(extract_client_ip(&headers, ip("8.8.8.8"), &config), ip("8.8.8.8"));
    }

    #[test]
    fn test_forwarded_header_is_preferred() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "forwarded",
            HeaderValue::from_static(r#"for="[2001:db8::1]:4711";proto=https, for=192.0.2.60"#),
        );
        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.1"));
        let config = create_config(TrustedProxyMode::Standard);

        assert_eq!(extract_client_ip(&headers, ip("10.0.0.1"), &config), ip("192.0.2.60"));
    }

    #[test]
    fn test_forwarded_node_forms() {
        assert_eq!(parse_forwarded_node("192.0.2.60"), Some(ip("192.0.2.60")));
        assert_eq!(parse_forwarded_node("\"192.0.2.60:4711\""), Some(ip("192.0.2.60")));
        assert_eq!(parse_forwarded_node("\"[2001:db8::1]:4711\""), Some(ip("2001:db8::1")));
        assert_eq!(parse_forwarded_node("unknown"), None);
    }
}
