//! Egress policy for artifact URLs
//!
//! Every artifact URL (and every redirect hop) is checked before the service
//! connects to it. The default policy accepts any http(s) URL, including
//! loopback and private hosts, but never link-local or cloud metadata hosts.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Security-related errors
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("URL scheme '{0}' is not allowed")]
    InvalidScheme(String),

    #[error("Host '{0}' is blocked")]
    BlockedHost(String),

    #[error("URL must have a host")]
    MissingHost,
}

/// Loopback hostnames, blocked unless `allow_localhost` is set
const LOOPBACK_HOSTNAMES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "ip6-localhost",
    "ip6-loopback",
];

/// Cloud metadata services, always blocked
const METADATA_HOSTNAMES: &[&str] = &[
    "metadata.google.internal",
    "metadata.goog",
    "169.254.169.254", // AWS/GCP/Azure metadata
    "fd00:ec2::254",   // AWS IPv6 metadata
];

/// Which artifact URLs the service may fetch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EgressPolicy {
    /// Allow plain HTTP
    #[serde(default = "default_true")]
    pub allow_http: bool,

    /// Allow localhost/loopback addresses
    #[serde(default = "default_true")]
    pub allow_localhost: bool,

    /// Allow private/internal IP ranges (RFC 1918, etc.)
    #[serde(default = "default_true")]
    pub allow_private_ips: bool,

    /// Optional list of allowed domains (if set, only these domains are permitted)
    #[serde(default)]
    pub allowed_domains: Option<Vec<String>>,
}

impl Default for EgressPolicy {
    fn default() -> Self {
        Self {
            allow_http: true,
            allow_localhost: true,
            allow_private_ips: true,
            allowed_domains: None,
        }
    }
}

impl EgressPolicy {
    /// HTTPS only, public hosts only
    pub fn strict() -> Self {
        Self {
            allow_http: false,
            allow_localhost: false,
            allow_private_ips: false,
            allowed_domains: None,
        }
    }
}

/// Validate an artifact URL against `policy`.
///
/// This function checks:
/// - URL scheme (https, and http when allowed)
/// - Host is not a metadata service or link-local address
/// - Host is not loopback or private unless allowed
/// - Optionally validates against an allowlist of domains
pub fn validate_artifact_url(url_str: &str, policy: &EgressPolicy) -> Result<Url, SecurityError> {
    let url = Url::parse(url_str)?;
    check_url(&url, policy)?;
    Ok(url)
}

/// Validate an already parsed URL against `policy`
pub fn check_url(url: &Url, policy: &EgressPolicy) -> Result<(), SecurityError> {
    match url.scheme() {
        "https" => {}
        "http" if policy.allow_http => {}
        scheme => return Err(SecurityError::InvalidScheme(scheme.to_string())),
    }

    let host = url.host_str().ok_or(SecurityError::MissingHost)?;
    let host_lower = host.to_lowercase();
    // IPv6 hosts come bracketed from the URL
    let bare_host = host_lower.trim_start_matches('[').trim_end_matches(']');

    if matches_any(bare_host, METADATA_HOSTNAMES) {
        return Err(SecurityError::BlockedHost(host.to_string()));
    }

    if !policy.allow_localhost && matches_any(bare_host, LOOPBACK_HOSTNAMES) {
        return Err(SecurityError::BlockedHost(host.to_string()));
    }

    if let Ok(ip) = bare_host.parse::<IpAddr>() {
        if is_link_local(&ip) {
            return Err(SecurityError::BlockedHost(host.to_string()));
        }
        if !policy.allow_localhost && ip.is_loopback() {
            return Err(SecurityError::BlockedHost(host.to_string()));
        }
        if !policy.allow_private_ips && is_private_ip(&ip) {
            return Err(SecurityError::BlockedHost(host.to_string()));
        }
    }

    if let Some(ref allowed) = policy.allowed_domains {
        let is_allowed = allowed.iter().any(|domain| {
            let domain_lower = domain.to_lowercase();
            host_lower == domain_lower || host_lower.ends_with(&format!(".{}", domain_lower))
        });
        if !is_allowed {
            return Err(SecurityError::BlockedHost(format!(
                "{} is not in the allowed domains list",
                host
            )));
        }
    }

    Ok(())
}

fn matches_any(host: &str, names: &[&str]) -> bool {
    names
        .iter()
        .any(|name| host == *name || host.ends_with(&format!(".{}", name)))
}

/// Check if an IP address is in a private range (RFC 1918, RFC 4193, etc.)
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                // 0.0.0.0/8 (current network)
                || v4.octets()[0] == 0
        }
        IpAddr::V6(v6) => {
            // fc00::/7 (Unique Local Address)
            (v6.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}

/// Check if an IP address is link-local
fn is_link_local(ip: &IpAddr) -> bool {
    match ip {
        // 169.254.0.0/16, includes the cloud metadata endpoint
        IpAddr::V4(v4) => v4.octets()[0] == 169 && v4.octets()[1] == 254,
        // fe80::/10
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allows_any_http_host() {
        let policy = EgressPolicy::default();
        assert!(validate_artifact_url("http://models.example.com/m.zip", &policy).is_ok());
        assert!(validate_artifact_url("http://127.0.0.1:9000/m.zip", &policy).is_ok());
        assert!(validate_artifact_url("http://localhost/m.zip", &policy).is_ok());
        assert!(validate_artifact_url("http://10.1.2.3/m.zip", &policy).is_ok());
    }

    #[test]
    fn test_metadata_always_blocked() {
        let policy = EgressPolicy::default();
        let result = validate_artifact_url("http://169.254.169.254/latest/meta-data/", &policy);
        assert!(matches!(result, Err(SecurityError::BlockedHost(_))));

        let result = validate_artifact_url("http://metadata.google.internal/", &policy);
        assert!(matches!(result, Err(SecurityError::BlockedHost(_))));

        let result = validate_artifact_url("http://[fe80::1]/m.zip", &policy);
        assert!(matches!(result, Err(SecurityError::BlockedHost(_))));
    }

    #[test]
    fn test_non_http_scheme_rejected() {
        let policy = EgressPolicy::default();
        let result = validate_artifact_url("file:///etc/passwd", &policy);
        assert!(matches!(result, Err(SecurityError::InvalidScheme(_))));

        let result = validate_artifact_url("ftp://models.example.com/m.zip", &policy);
        assert!(matches!(result, Err(SecurityError::InvalidScheme(_))));
    }

    #[test]
    fn test_strict_policy() {
        let policy = EgressPolicy::strict();
        assert!(validate_artifact_url("https://models.example.com/m.zip", &policy).is_ok());

        let result = validate_artifact_url("http://models.example.com/m.zip", &policy);
        assert!(matches!(result, Err(SecurityError::InvalidScheme(_))));

        let result = validate_artifact_url("https://localhost:8080/m.zip", &policy);
        assert!(matches!(result, Err(SecurityError::BlockedHost(_))));

        let result = validate_artifact_url("https://127.0.0.1/m.zip", &policy);
        assert!(matches!(result, Err(SecurityError::BlockedHost(_))));

        let result = validate_artifact_url("https://192.168.1.1/m.zip", &policy);
        assert!(matches!(result, Err(SecurityError::BlockedHost(_))));

        let result = validate_artifact_url("https://172.16.0.1/m.zip", &policy);
        assert!(matches!(result, Err(SecurityError::BlockedHost(_))));
    }

    #[test]
    fn test_allowlist() {
        let policy = EgressPolicy {
            allowed_domains: Some(vec!["storage.googleapis.com".to_string()]),
            ..Default::default()
        };

        assert!(validate_artifact_url("https://storage.googleapis.com/b/m.zip", &policy).is_ok());
        assert!(validate_artifact_url("https://eu.storage.googleapis.com/m.zip", &policy).is_ok());

        let result = validate_artifact_url("https://models.example.com/m.zip", &policy);
        assert!(matches!(result, Err(SecurityError::BlockedHost(_))));
    }

    #[test]
    fn test_garbage_url() {
        let result = validate_artifact_url("not a url", &EgressPolicy::default());
        assert!(matches!(result, Err(SecurityError::InvalidUrl(_))));
    }
}
