//! Client identity extraction for rate limiting and auth failure tracking.
//!
//! The identity of a request is the IP of the TCP peer, taken from Axum's
//! `ConnectInfo<SocketAddr>` extension. The server must therefore be served
//! with `into_make_service_with_connect_info::<SocketAddr>()`.
//!
//! # Reverse Proxies
//!
//! Behind a reverse proxy every request arrives from the proxy's address.
//! Configure `TRUSTED_PROXIES` with the proxy's CIDR ranges and the first hop
//! of `X-Forwarded-For` (or `X-Real-IP`) is used instead, but only for
//! requests whose peer is inside one of those ranges. Forwarded headers from
//! any other peer are ignored, so clients cannot pick their own identity.
//!
//! Requests without peer information (e.g. in-process tests that do not set
//! `ConnectInfo`) share the [`UNKNOWN_IP`] identity.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::{debug, warn};

/// Identity used when the peer address is unavailable.
pub const UNKNOWN_IP: &str = "unknown";

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range for trusted proxy validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse CIDR notation (`10.0.0.0/8`, `::1/128`) or a bare address
    /// (implicit `/32` or `/128`).
    ///
    /// Returns `None` if the format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let (addr, prefix) = match cidr.trim().split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr.trim(), None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|p| *p <= max_prefix)?,
            None => max_prefix,
        };

        Some(Self {
            network,
            prefix_len,
        })
    }

    /// Check if an IP address is contained within this range.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix_len)).unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Set of reverse proxies whose forwarded-for headers are honored.
///
/// Empty means no proxy is trusted and the socket peer is always the identity.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Build from CIDR strings. Invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy ranges configured");
        }

        Self { ranges }
    }

    /// Whether any proxy range is configured.
    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Whether `ip` belongs to a trusted proxy.
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(ip))
    }
}

// =============================================================================
// Identity Extraction
// =============================================================================

/// First client address named by proxy headers, if any.
///
/// `X-Forwarded-For` wins over `X-Real-IP`; only the first (client) hop of
/// `X-Forwarded-For` is used.
fn forwarded_ip<B>(req: &Request<B>) -> Option<&str> {
    if let Some(value) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        && let Some(first) = value.split(',').next().map(str::trim)
        && !first.is_empty()
    {
        return Some(first);
    }

    req.headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Resolve the rate-limit identity of a request.
///
/// # Returns
///
/// `Cow<'static, str>`: borrowed for [`UNKNOWN_IP`], owned otherwise.
pub fn client_identity<B>(
    req: &Request<B>,
    trusted_proxies: &TrustedProxyConfig,
) -> Cow<'static, str> {
    let Some(ConnectInfo(peer)) = req.extensions().get::<ConnectInfo<SocketAddr>>() else {
        return Cow::Borrowed(UNKNOWN_IP);
    };
    let peer_ip = peer.ip();

    match forwarded_ip(req) {
        Some(forwarded) if trusted_proxies.is_trusted(&peer_ip) => {
            Cow::Owned(forwarded.to_string())
        }
        Some(forwarded) => {
            debug!(
                peer = %peer_ip,
                forwarded = %forwarded,
                "Ignoring forwarded client address from untrusted peer"
            );
            Cow::Owned(peer_ip.to_string())
        }
        None => Cow::Owned(peer_ip.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_from(peer: &str) -> axum::http::request::Builder {
        let addr: SocketAddr = peer.parse().unwrap();
        let mut builder = Request::builder();
        if let Some(ext) = builder.extensions_mut() {
            ext.insert(ConnectInfo(addr));
        }
        builder
    }

    fn proxies(cidrs: &[&str]) -> TrustedProxyConfig {
        let owned: Vec<String> = cidrs.iter().map(|s| (*s).to_string()).collect();
        TrustedProxyConfig::new(&owned)
    }

    #[test]
    fn test_cidr_parse_ipv4() {
        let cidr = CidrRange::parse("10.0.0.0/8").unwrap();
        assert_eq!(cidr.prefix_len, 8);
    }

    #[test]
    fn test_cidr_parse_single_ip() {
        assert_eq!(CidrRange::parse("192.168.1.1").unwrap().prefix_len, 32);
        assert_eq!(CidrRange::parse("::1").unwrap().prefix_len, 128);
    }

    #[test]
    fn test_cidr_parse_invalid() {
        assert!(CidrRange::parse("not-an-ip").is_none());
        assert!(CidrRange::parse("10.0.0.0/33").is_none());
        assert!(CidrRange::parse("10.0.0.0/x").is_none());
    }

    #[test]
    fn test_cidr_contains() {
        let cidr = CidrRange::parse("192.168.1.0/24").unwrap();
        assert!(cidr.contains(&"192.168.1.254".parse().unwrap()));
        assert!(!cidr.contains(&"192.168.2.1".parse().unwrap()));
        assert!(!cidr.contains(&"::1".parse().unwrap()));
    }

    #[test]
    fn test_cidr_zero_prefix_matches_everything() {
        let cidr = CidrRange::parse("0.0.0.0/0").unwrap();
        assert!(cidr.contains(&"8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_identity_is_peer_ip() {
        let req = request_from("203.0.113.7:52100").body(Body::empty()).unwrap();
        assert_eq!(client_identity(&req, &TrustedProxyConfig::default()), "203.0.113.7");
    }

    #[test]
    fn test_identity_unknown_without_peer() {
        let req = Request::builder().body(Body::empty()).unwrap();
        let identity = client_identity(&req, &TrustedProxyConfig::default());
        assert_eq!(identity, UNKNOWN_IP);
        assert!(matches!(identity, Cow::Borrowed(_)));
    }

    #[test]
    fn test_forwarded_header_ignored_from_untrusted_peer() {
        let req = request_from("203.0.113.7:52100")
            .header("x-forwarded-for", "1.2.3.4")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_identity(&req, &proxies(&["10.0.0.0/8"])), "203.0.113.7");
    }

    #[test]
    fn test_forwarded_header_used_from_trusted_proxy() {
        let req = request_from("10.1.2.3:443")
            .header("x-forwarded-for", " 198.51.100.9 , 10.1.2.3")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_identity(&req, &proxies(&["10.0.0.0/8"])), "198.51.100.9");
    }

    #[test]
    fn test_real_ip_used_from_trusted_proxy() {
        let req = request_from("10.1.2.3:443")
            .header("x-real-ip", "198.51.100.10")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_identity(&req, &proxies(&["10.0.0.0/8"])), "198.51.100.10");
    }

    #[test]
    fn test_trusted_proxy_without_headers_uses_peer() {
        let req = request_from("10.1.2.3:443").body(Body::empty()).unwrap();
        assert_eq!(client_identity(&req, &proxies(&["10.0.0.0/8"])), "10.1.2.3");
    }

    #[test]
    fn test_invalid_cidrs_are_skipped() {
        let config = proxies(&["bogus", "127.0.0.1"]);
        assert!(config.is_enabled());
        assert!(config.is_trusted(&"127.0.0.1".parse().unwrap()));
    }
}
