//! URL validation and SSRF protection for subscription targets.
//!
//! A subscription URL is accepted only if:
//! 1. It parses and uses `https` (or `http` when allowed)
//! 2. It has a host
//! 3. Every address the host resolves to is public
//!
//! IP literal hosts are checked directly. Names go through a [`HostResolver`]
//! so tests can pin DNS answers.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use async_trait::async_trait;
use url::{Host, Url};

use crate::error::{WebhookError, WebhookResult};

/// Maximum accepted URL length.
pub const MAX_URL_LENGTH: usize = 2048;

/// Resolves host names to addresses.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the system's DNS configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

/// Resolver with fixed answers. Unknown names fail to resolve.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    answers: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an answer for `host`.
    pub fn with_host(mut self, host: impl Into<String>, addrs: Vec<IpAddr>) -> Self {
        self.answers.insert(host.into().to_ascii_lowercase(), addrs);
        self
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve(&self, host: &str, _port: u16) -> std::io::Result<Vec<IpAddr>> {
        self.answers
            .get(&host.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, format!("no such host: {host}")))
    }
}

/// Validates candidate delivery targets.
#[derive(Clone)]
pub struct SsrfGuard {
    resolver: Arc<dyn HostResolver>,
    allow_http: bool,
}

impl SsrfGuard {
    /// Creates a guard using the system resolver.
    pub fn new(allow_http: bool) -> Self {
        Self::with_resolver(Arc::new(SystemResolver), allow_http)
    }

    pub fn with_resolver(resolver: Arc<dyn HostResolver>, allow_http: bool) -> Self {
        Self {
            resolver,
            allow_http,
        }
    }

    /// Validates `raw` and returns the parsed URL.
    pub async fn validate(&self, raw: &str) -> WebhookResult<Url> {
        if raw.trim().is_empty() {
            return Err(WebhookError::InvalidUrl("URL is required".to_string()));
        }
        if raw.len() > MAX_URL_LENGTH {
            return Err(WebhookError::InvalidUrl(format!(
                "URL exceeds {MAX_URL_LENGTH} characters"
            )));
        }

        let parsed = Url::parse(raw)
            .map_err(|e| WebhookError::InvalidUrl(format!("Invalid URL format: {e}")))?;

        match parsed.scheme() {
            "https" => {}
            "http" if self.allow_http => {}
            "http" => {
                return Err(WebhookError::InvalidUrl(
                    "Webhook URLs must use HTTPS".to_string(),
                ));
            }
            scheme => {
                return Err(WebhookError::InvalidUrl(format!(
                    "Unsupported URL scheme: {scheme}"
                )));
            }
        }

        let port = parsed.port_or_known_default().unwrap_or(443);
        match parsed.host() {
            None => return Err(WebhookError::InvalidUrl("URL must have a host".to_string())),
            Some(Host::Ipv4(v4)) => check_ip(IpAddr::V4(v4), &v4.to_string())?,
            Some(Host::Ipv6(v6)) => check_ip(IpAddr::V6(v6), &v6.to_string())?,
            Some(Host::Domain(name)) => {
                let addrs = self.resolver.resolve(name, port).await.map_err(|e| {
                    WebhookError::InvalidUrl(format!("Failed to resolve host {name}: {e}"))
                })?;
                if addrs.is_empty() {
                    return Err(WebhookError::InvalidUrl(format!(
                        "Host {name} did not resolve to any address"
                    )));
                }
                for ip in addrs {
                    check_ip(ip, name)?;
                }
            }
        }

        Ok(parsed)
    }
}

impl std::fmt::Debug for SsrfGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsrfGuard")
            .field("allow_http", &self.allow_http)
            .finish_non_exhaustive()
    }
}

fn check_ip(ip: IpAddr, host: &str) -> WebhookResult<()> {
    if is_internal_ip(&ip) {
        tracing::warn!(host = %host, ip = %ip, "Rejected webhook URL targeting internal address");
        return Err(WebhookError::SsrfBlocked(format!(
            "Destination host {host} resolves to a private/internal address"
        )));
    }
    Ok(())
}

/// Returns true if the address belongs to a private/internal range.
pub fn is_internal_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_internal_v4(v4),
        IpAddr::V6(v6) => is_internal_v6(v6),
    }
}

fn is_internal_v4(v4: &Ipv4Addr) -> bool {
    v4.is_loopback()                // 127.0.0.0/8
        || v4.is_private()          // 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16
        || v4.is_link_local()       // 169.254.0.0/16, cloud metadata
        || v4.is_multicast()        // 224.0.0.0/4
        || v4.octets()[0] == 0      // 0.0.0.0/8 "this network"
        || v4.octets()[0] >= 240    // 240.0.0.0/4 reserved, includes broadcast
        || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64) // 100.64.0.0/10 (CGNAT)
}

fn is_internal_v6(v6: &Ipv6Addr) -> bool {
    // ::ffff:a.b.c.d and ::a.b.c.d embed an IPv4 target; so do :: and ::1.
    if let Some(embedded) = v6.to_ipv4() {
        return is_internal_v4(&embedded);
    }
    let segments = v6.segments();
    // 64:ff9b::/96 NAT64 translates to the trailing IPv4 address.
    if segments[..6] == [0x64, 0xff9b, 0, 0, 0, 0] {
        let [.., hi, lo] = segments;
        let embedded = Ipv4Addr::from((u32::from(hi) << 16) | u32::from(lo));
        return is_internal_v4(&embedded);
    }
    let first = segments[0];
    v6.is_loopback()
        || v6.is_unspecified()
        || v6.is_multicast()          // ff00::/8
        || (first & 0xfe00) == 0xfc00 // fc00::/7 unique local
        || (first & 0xffc0) == 0xfe80 // fe80::/10 link local
}
