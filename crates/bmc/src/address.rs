//! BMC address parsing
//!
//! Accepted forms:
//! - `host`, `host:port`, `[v6addr]:port` (scheme defaults to `ipmi`)
//! - `scheme://host[:port][/path][?query]`
//! - `scheme:host[:port]` (no `//` separator)

use crate::error::BmcError;
use std::net::Ipv4Addr;
use tracing::debug;
use url::{Host, Url};

const DEFAULT_SCHEME: &str = "ipmi";
const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Parse a BMC address into a URL with a scheme and a validated host.
pub fn parse_address(address: &str) -> Result<Url, BmcError> {
    let parsed = match Url::parse(address) {
        // "ipmi:192.168.122.1" parses with an opaque path instead of a host
        Ok(url) if url.cannot_be_a_base() => reparse(&address.replacen(':', "://", 1))?,
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            if address.contains(':') {
                split_host_port(address)?;
            }
            reparse(&format!("{DEFAULT_SCHEME}://{address}"))?
        }
        Err(e) => return Err(BmcError::InvalidAddress(e.to_string())),
    };

    validate_host(&parsed)?;
    debug!(scheme = parsed.scheme(), host = ?parsed.host_str(), "Parsed BMC address");
    Ok(parsed)
}

fn reparse(address: &str) -> Result<Url, BmcError> {
    Url::parse(address).map_err(|e| BmcError::InvalidAddress(format!("{address}: {e}")))
}

/// Split `host:port` or `[host]:port`, rejecting anything else that contains a colon.
fn split_host_port(address: &str) -> Result<(&str, &str), BmcError> {
    let missing_port = || BmcError::InvalidAddress(format!("address {address}: missing port in address"));

    if let Some(rest) = address.strip_prefix('[') {
        let (host, port) = rest.split_once("]:").ok_or_else(missing_port)?;
        return Ok((host, port));
    }

    match address.rsplit_once(':') {
        Some((host, _)) if host.contains(':') => Err(BmcError::InvalidAddress(format!(
            "address {address}: too many colons in address"
        ))),
        Some((host, port)) => Ok((host, port)),
        None => Err(missing_port()),
    }
}

fn validate_host(url: &Url) -> Result<(), BmcError> {
    match url.host() {
        None => Err(BmcError::InvalidAddress(format!("{url}: missing host"))),
        Some(Host::Ipv4(_) | Host::Ipv6(_)) => Ok(()),
        // Non-special schemes keep IPv4 literals as opaque domains
        Some(Host::Domain(name)) if name.parse::<Ipv4Addr>().is_ok() => Ok(()),
        Some(Host::Domain(name)) if is_valid_hostname(name) => Ok(()),
        Some(Host::Domain(name)) => Err(BmcError::InvalidAddress(format!(
            "BMC address hostname/IP : [{name}] is invalid"
        ))),
    }
}

fn is_valid_hostname(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_HOSTNAME_LEN {
        return false;
    }
    name.trim_end_matches('.').split('.').all(is_valid_label)
}

/// `[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?`
fn is_valid_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            bytes.len() <= MAX_LABEL_LEN
                && first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_host_defaults_to_ipmi() {
        let url = parse_address("192.168.122.1").unwrap();
        assert_eq!(url.scheme(), "ipmi", "Bare host should default to ipmi");
        assert_eq!(url.host_str(), Some("192.168.122.1"));
        assert_eq!(url.port(), None);
    }

    #[test]
    fn test_host_and_port() {
        let url = parse_address("192.168.122.1:6233").unwrap();
        assert_eq!(url.scheme(), "ipmi");
        assert_eq!(url.port(), Some(6233), "Port should be kept");
    }

    #[test]
    fn test_bracketed_ipv6_with_port() {
        let url = parse_address("[fe80::fc33:62ff:fe83:8a76]:6233").unwrap();
        assert_eq!(url.host_str(), Some("[fe80::fc33:62ff:fe83:8a76]"));
        assert_eq!(url.port(), Some(6233));
    }

    #[test]
    fn test_bracketed_ipv6_without_port_is_rejected() {
        assert!(
            parse_address("[fe80::fc33:62ff:fe83:8a76]").is_err(),
            "Bare IPv6 without port must be rejected"
        );
    }

    #[test]
    fn test_malformed_ipv6_is_rejected() {
        assert!(parse_address("[fe80::fc33:62ff:fe33:8xff]:6223").is_err());
    }

    #[test]
    fn test_invalid_dns_label_is_rejected() {
        let err = parse_address("my-.examplehost.com").unwrap_err();
        assert!(
            err.to_string().contains("is invalid"),
            "Unexpected error: {err}"
        );
        assert!(parse_address("my.examplehost.com").is_ok());
    }

    #[test]
    fn test_scheme_without_separator() {
        let url = parse_address("ipmi:192.168.122.1:6233").unwrap();
        assert_eq!(url.scheme(), "ipmi");
        assert_eq!(url.host_str(), Some("192.168.122.1"));
        assert_eq!(url.port(), Some(6233));

        let url = parse_address("idrac:192.168.122.1").unwrap();
        assert_eq!(url.scheme(), "idrac");
        assert_eq!(url.port(), None);
    }

    #[test]
    fn test_full_url_keeps_path_and_query() {
        let url = parse_address("libvirt://192.168.122.1:6233/?abc=def").unwrap();
        assert_eq!(url.scheme(), "libvirt");
        assert_eq!(url.port(), Some(6233));
        assert_eq!(url.path(), "/");
        assert_eq!(url.query(), Some("abc=def"));
    }

    #[test]
    fn test_round_trip_preserves_scheme_host_port() {
        for address in [
            "redfish+https://[fe80::fc33:62ff:fe83:8a76]:6233/foo",
            "ibmc://192.168.122.1:6233/foo",
            "192.168.122.1:623",
            "ilo5:my.favoritebmc.com",
        ] {
            let first = parse_address(address).unwrap();
            let second = parse_address(first.as_str()).unwrap();
            assert_eq!(first.scheme(), second.scheme(), "Scheme changed for {address}");
            assert_eq!(first.host_str(), second.host_str(), "Host changed for {address}");
            assert_eq!(first.port(), second.port(), "Port changed for {address}");
        }
    }

    #[test]
    fn test_label_validation() {
        assert!(is_valid_label("a"));
        assert!(is_valid_label("a-b"));
        assert!(!is_valid_label("-a"));
        assert!(!is_valid_label(""));
        assert!(!is_valid_label(&"a".repeat(64)));
    }
}
