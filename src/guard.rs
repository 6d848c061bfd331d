//! URL validation and SSRF guard.
//!
//! Every URL the crawler is about to fetch passes through here first: the
//! hostname is resolved and any URL that points at private, loopback,
//! link-local, or otherwise reserved address space is rejected, so a hostile
//! page cannot steer the crawler at internal infrastructure.

use std::io;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::sync::Arc;

use log::warn;
use url::Url;

/// Hostname-to-addresses lookup used by the guard. The default resolver goes
/// through system DNS; tests inject a table-backed one.
pub type HostResolver = Arc<dyn Fn(&str) -> io::Result<Vec<IpAddr>> + Send + Sync>;

/// Resolver backed by the OS resolver.
pub fn system_resolver() -> HostResolver {
    Arc::new(|host: &str| {
        let addrs = (host, 0u16).to_socket_addrs()?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    })
}

/// Validate and normalize a raw URL string using system DNS.
///
/// Trims whitespace, prepends `https://` when no scheme is present, requires a
/// host, and rejects any URL whose host resolves to blocked address space.
/// Returns the (possibly scheme-completed) URL otherwise unchanged.
pub fn validate_and_normalize(raw: &str) -> Option<String> {
    validate_and_normalize_with(raw, &system_resolver())
}

/// Same as [`validate_and_normalize`] but with an explicit resolver.
pub fn validate_and_normalize_with(raw: &str, resolver: &HostResolver) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let candidate = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let parsed = Url::parse(&candidate).ok()?;
    let host = parsed.host()?;

    match host {
        url::Host::Ipv4(addr) => {
            if is_blocked_ip(IpAddr::V4(addr)) {
                warn!("SSRF blocked: {candidate} is a private/reserved address {addr}");
                return None;
            }
        }
        url::Host::Ipv6(addr) => {
            if is_blocked_ip(IpAddr::V6(addr)) {
                warn!("SSRF blocked: {candidate} is a private/reserved address {addr}");
                return None;
            }
        }
        url::Host::Domain(name) => {
            let resolved = resolver(name).ok()?;
            if resolved.is_empty() {
                return None;
            }
            for ip in resolved {
                if is_blocked_ip(ip) {
                    warn!("SSRF blocked: {candidate} resolves to private/reserved IP {ip}");
                    return None;
                }
            }
        }
    }

    Some(candidate)
}

fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_ipv4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_blocked_ipv4(mapped);
            }
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
        }
    }
}

fn is_blocked_ipv4(v4: Ipv4Addr) -> bool {
    let octets = v4.octets();
    v4.is_private()
        || v4.is_loopback()
        || v4.is_link_local()
        || v4.is_unspecified()
        || v4.is_broadcast()
        || v4.is_documentation()
        // 0.0.0.0/8 "this network"
        || octets[0] == 0
        // 100.64.0.0/10 shared address space (CGNAT)
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
        // 240.0.0.0/4 reserved
        || octets[0] >= 240
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver_for(table: &'static [(&'static str, [u8; 4])]) -> HostResolver {
        Arc::new(move |host: &str| {
            table
                .iter()
                .find(|(name, _)| *name == host)
                .map(|(_, octets)| vec![IpAddr::V4(Ipv4Addr::from(*octets))])
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such host"))
        })
    }

    #[test]
    fn rejects_loopback_and_private_literals() {
        for url in [
            "http://127.0.0.1/admin",
            "http://10.0.0.1",
            "http://172.16.5.5/x",
            "http://192.168.1.1",
            "http://169.254.1.1",
            "http://0.0.0.0",
            "http://100.64.0.9",
            "http://255.255.255.255",
            "http://[::1]/",
            "http://[fe80::1]",
            "http://[fc00::1]",
            "http://[::ffff:10.0.0.1]",
        ] {
            assert!(validate_and_normalize(url).is_none(), "{url} should be blocked");
        }
    }

    #[test]
    fn accepts_public_literal_unchanged() {
        assert_eq!(
            validate_and_normalize("http://8.8.8.8/path?q=1").as_deref(),
            Some("http://8.8.8.8/path?q=1")
        );
    }

    #[test]
    fn completes_missing_scheme_with_https() {
        assert_eq!(
            validate_and_normalize("8.8.8.8/path").as_deref(),
            Some("https://8.8.8.8/path")
        );
    }

    #[test]
    fn rejects_empty_and_hostless_input() {
        assert!(validate_and_normalize("").is_none());
        assert!(validate_and_normalize("   ").is_none());
        assert!(validate_and_normalize("https://").is_none());
        assert!(validate_and_normalize("http://###").is_none());
    }

    #[test]
    fn blocks_hostnames_resolving_to_private_space() {
        let resolver = resolver_for(&[
            ("intranet.corp", [10, 0, 0, 5]),
            ("public.example", [93, 184, 216, 34]),
        ]);
        assert!(validate_and_normalize_with("https://intranet.corp/payroll", &resolver).is_none());
        assert_eq!(
            validate_and_normalize_with("https://public.example/a", &resolver).as_deref(),
            Some("https://public.example/a")
        );
    }

    #[test]
    fn resolution_failure_rejects() {
        let resolver = resolver_for(&[]);
        assert!(validate_and_normalize_with("https://nxdomain.example", &resolver).is_none());
    }
}
