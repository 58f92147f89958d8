// [libs/infra/proxy/src/validate.rs]
/*!
 * Validación pura de rutas antes de que `add_route` las acepte: el
 * subdominio debe ser una etiqueta DNS válida y el host upstream no debe
 * resolver a una dirección privada, loopback o link-local. Sin I/O — la
 * resolución DNS real del hostname queda fuera de este crate (ver
 * DESIGN.md); los literales de IP se validan directamente.
 */

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use botplane_domain_errors::DomainError;
use once_cell::sync::Lazy;
use regex::Regex;

static SUBDOMAIN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("static subdomain regex must compile"));

pub fn validate_subdomain(subdomain: &str) -> Result<(), DomainError> {
    if SUBDOMAIN_PATTERN.is_match(subdomain) {
        Ok(())
    } else {
        Err(DomainError::InvalidUpstream(format!("subdomain '{subdomain}' does not match the allowed label shape")))
    }
}

fn is_forbidden_ipv4(addr: Ipv4Addr) -> bool {
    addr.is_private() || addr.is_loopback() || addr.is_link_local() || addr.octets()[0] == 0
}

fn is_forbidden_ipv6(addr: Ipv6Addr) -> bool {
    if addr.is_loopback() || addr.is_unspecified() {
        return true;
    }
    if let Some(mapped) = addr.to_ipv4_mapped() {
        return is_forbidden_ipv4(mapped);
    }
    let segments = addr.segments();
    let is_unique_local = (segments[0] & 0xfe00) == 0xfc00; // fc00::/7
    let is_link_local = (segments[0] & 0xffc0) == 0xfe80; // fe80::/10
    is_unique_local || is_link_local
}

fn is_forbidden_hostname_suffix(host: &str) -> bool {
    let lower = host.to_ascii_lowercase();
    lower == "localhost" || lower.ends_with(".local") || lower.ends_with(".internal")
}

/// Valida el host upstream antes de aceptarlo en una ruta. Un literal de
/// IP se valida directamente contra los rangos prohibidos; un hostname
/// se rechaza pre-DNS si cae en un sufijo reservado conocido.
pub fn validate_upstream_host(host: &str) -> Result<(), DomainError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        let forbidden = match ip {
            IpAddr::V4(v4) => is_forbidden_ipv4(v4),
            IpAddr::V6(v6) => is_forbidden_ipv6(v6),
        };
        return if forbidden {
            Err(DomainError::InvalidUpstream(format!("upstream host '{host}' resolves to a disallowed address range")))
        } else {
            Ok(())
        };
    }

    if is_forbidden_hostname_suffix(host) {
        return Err(DomainError::InvalidUpstream(format!("upstream host '{host}' is a reserved local hostname")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subdomain_accepts_simple_labels() {
        assert!(validate_subdomain("tenant-abc").is_ok());
        assert!(validate_subdomain("a").is_ok());
        assert!(validate_subdomain("ab").is_ok());
    }

    #[test]
    fn subdomain_rejects_leading_trailing_hyphen_and_uppercase() {
        assert!(validate_subdomain("-tenant").is_err());
        assert!(validate_subdomain("tenant-").is_err());
        assert!(validate_subdomain("Tenant").is_err());
        assert!(validate_subdomain("").is_err());
    }

    #[test]
    fn rejects_private_and_loopback_ipv4() {
        assert!(validate_upstream_host("10.0.0.5").is_err());
        assert!(validate_upstream_host("127.0.0.1").is_err());
        assert!(validate_upstream_host("169.254.1.1").is_err());
        assert!(validate_upstream_host("172.16.0.1").is_err());
        assert!(validate_upstream_host("192.168.1.1").is_err());
        assert!(validate_upstream_host("0.0.0.1").is_err());
    }

    #[test]
    fn accepts_public_ipv4() {
        assert!(validate_upstream_host("93.184.216.34").is_ok());
    }

    #[test]
    fn rejects_ipv6_loopback_and_unique_local_and_link_local() {
        assert!(validate_upstream_host("::1").is_err());
        assert!(validate_upstream_host("fc00::1").is_err());
        assert!(validate_upstream_host("fe80::1").is_err());
    }

    #[test]
    fn rejects_ipv4_mapped_ipv6_private_address() {
        assert!(validate_upstream_host("::ffff:10.0.0.1").is_err());
    }

    #[test]
    fn rejects_reserved_hostname_suffixes_pre_dns() {
        assert!(validate_upstream_host("worker.internal").is_err());
        assert!(validate_upstream_host("worker.local").is_err());
        assert!(validate_upstream_host("localhost").is_err());
        assert!(validate_upstream_host("LOCALHOST").is_err());
    }

    #[test]
    fn accepts_an_ordinary_public_hostname() {
        assert!(validate_upstream_host("node-7.workers.botplane.dev").is_ok());
    }
}
