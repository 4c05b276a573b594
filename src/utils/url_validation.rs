//! URL validation for resolver endpoints and session targets
//!
//! Session targets come back from an external service, so before connecting
//! the relay checks that they:
//! - Use a websocket scheme (`ws` or `wss`)
//! - Have a host
//! - Do not point at loopback/private/link-local addresses (unless allowed)

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use tracing::warn;
use url::{Host, Url};

/// Errors that can occur during URL validation
#[derive(Debug, Error)]
pub enum UrlValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("URL must have a host")]
    MissingHost,

    #[error("URL points to a private/internal address: {0}")]
    PrivateAddress(String),
}

/// Checks if an IPv4 address is private/internal
///
/// Covers loopback, RFC 1918, link-local, broadcast, unspecified,
/// documentation ranges, CGNAT (100.64.0.0/10) and benchmarking (198.18.0.0/15).
pub fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_unspecified()
        || ip.is_documentation()
        || (octets[0] == 100 && (octets[1] & 0xC0) == 64)
        || (octets[0] == 198 && (octets[1] == 18 || octets[1] == 19))
}

/// Checks if an IPv6 address is private/internal
///
/// Covers loopback, unspecified, link-local (fe80::/10), unique local
/// (fc00::/7), documentation (2001:db8::/32) and IPv4-mapped private addresses.
pub fn is_private_ipv6(ip: &Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }

    let segments = ip.segments();
    if segments[0] & 0xFFC0 == 0xFE80 || segments[0] & 0xFE00 == 0xFC00 {
        return true;
    }
    if segments[0] == 0x2001 && segments[1] == 0x0DB8 {
        return true;
    }

    ip.to_ipv4_mapped()
        .map(|v4| is_private_ipv4(&v4))
        .unwrap_or(false)
}

pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_ipv4(v4),
        IpAddr::V6(v6) => is_private_ipv6(v6),
    }
}

fn check_scheme(url: &Url, allowed: &[&str]) -> Result<(), UrlValidationError> {
    if allowed.contains(&url.scheme()) {
        Ok(())
    } else {
        Err(UrlValidationError::UnsupportedScheme(url.scheme().to_string()))
    }
}

/// Validate a session target returned by the resolver.
///
/// Only literal hosts are checked; hostnames are not resolved here.
pub fn validate_session_target(
    target: &str,
    allow_private: bool,
) -> Result<Url, UrlValidationError> {
    let url = Url::parse(target)?;
    check_scheme(&url, &["ws", "wss"])?;

    let host = url.host().ok_or(UrlValidationError::MissingHost)?;
    if allow_private {
        return Ok(url);
    }

    let private = match &host {
        Host::Ipv4(ip) => is_private_ipv4(ip),
        Host::Ipv6(ip) => is_private_ipv6(ip),
        Host::Domain(domain) => {
            domain.eq_ignore_ascii_case("localhost") || domain.ends_with(".localhost")
        }
    };

    if private {
        warn!(host = %host, "Rejecting session target with private address");
        return Err(UrlValidationError::PrivateAddress(host.to_string()));
    }

    Ok(url)
}

/// Validate the configured resolver base url (http or https with a host).
pub fn validate_resolver_url(base_url: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(base_url)?;
    check_scheme(&url, &["http", "https"])?;
    if url.host().is_none() {
        return Err(UrlValidationError::MissingHost);
    }
    Ok(url)
}
