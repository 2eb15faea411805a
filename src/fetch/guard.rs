// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! SSRF guard: every URL the service touches passes through [`UrlGuard::check`]

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tracing::warn;
use url::{Host, Url};

use super::network::{blocked_reason, Cidr};
use super::resolver::HostResolver;
use crate::config::WebConfig;
use crate::errors::{ExtractError, Result};

/// A URL whose every resolved address passed validation.
///
/// Connections must go to `resolved` only; the hostname is never looked up
/// again between the check and the request.
#[derive(Debug, Clone, PartialEq)]
pub struct SafeUrl {
    pub url: Url,
    pub scheme: String,
    pub hostname: String,
    pub port: u16,
    pub resolved: Vec<IpAddr>,
}

impl SafeUrl {
    pub fn socket_addrs(&self) -> Vec<SocketAddr> {
        self.resolved
            .iter()
            .map(|ip| SocketAddr::new(*ip, self.port))
            .collect()
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

#[derive(Debug, Clone)]
pub struct UrlGuard {
    resolver: Arc<dyn HostResolver>,
    blocked_hosts: Vec<String>,
    blocked_networks: Vec<Cidr>,
}

fn reject(url: &str, reason: impl Into<String>) -> ExtractError {
    let reason = reason.into();
    warn!(url = %url, reason = %reason, "blocked outbound request");
    ExtractError::SecurityRejection(reason)
}

impl UrlGuard {
    pub fn new(resolver: Arc<dyn HostResolver>, config: &WebConfig) -> Self {
        let blocked_networks = config
            .blocked_networks
            .iter()
            .filter_map(|cidr| {
                let parsed = Cidr::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "ignoring unparseable blocked network");
                }
                parsed
            })
            .collect();
        Self {
            resolver,
            blocked_hosts: config
                .blocked_hosts
                .iter()
                .map(|h| h.trim().trim_end_matches('.').to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            blocked_networks,
        }
    }

    /// Parse, resolve and validate a URL
    pub async fn check(&self, raw: &str) -> Result<SafeUrl> {
        let url = Url::parse(raw.trim())
            .map_err(|e| ExtractError::BadRequest(format!("invalid URL: {}", e)))?;
        self.check_url(url).await
    }

    /// Validate a redirect target relative to the current hop
    pub async fn next_hop(&self, current: &SafeUrl, location: &str) -> Result<SafeUrl> {
        let url = current
            .url
            .join(location.trim())
            .map_err(|e| reject(location, format!("invalid redirect target: {}", e)))?;
        self.check_url(url).await
    }

    pub async fn check_url(&self, url: Url) -> Result<SafeUrl> {
        let scheme = url.scheme().to_string();
        if scheme != "http" && scheme != "https" {
            return Err(reject(url.as_str(), format!("scheme {} is not allowed", scheme)));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(reject(url.as_str(), "URLs with credentials are not allowed"));
        }
        let port = url
            .port_or_known_default()
            .ok_or_else(|| reject(url.as_str(), "URL has no port"))?;

        let (hostname, resolved) = match url.host() {
            Some(Host::Ipv4(v4)) => (v4.to_string(), vec![IpAddr::V4(v4)]),
            Some(Host::Ipv6(v6)) => (v6.to_string(), vec![IpAddr::V6(v6)]),
            Some(Host::Domain(domain)) => {
                let hostname = domain.trim_end_matches('.').to_ascii_lowercase();
                self.check_hostname(url.as_str(), &hostname)?;
                let resolved = self.resolver.resolve(&hostname).await?;
                (hostname, resolved)
            }
            None => return Err(reject(url.as_str(), "URL has no host")),
        };

        for ip in &resolved {
            if let Some(reason) = blocked_reason(*ip) {
                return Err(reject(
                    url.as_str(),
                    format!("{} resolves to a {}", hostname, reason),
                ));
            }
            if self.blocked_networks.iter().any(|net| net.contains(*ip)) {
                return Err(reject(
                    url.as_str(),
                    format!("{} resolves to a blocked network", hostname),
                ));
            }
        }

        Ok(SafeUrl {
            url,
            scheme,
            hostname,
            port,
            resolved,
        })
    }

    fn check_hostname(&self, url: &str, hostname: &str) -> Result<()> {
        if hostname.is_empty() {
            return Err(reject(url, "URL has an empty host"));
        }
        if hostname == "localhost" || hostname.ends_with(".localhost") {
            return Err(reject(url, "localhost is not allowed"));
        }
        let listed = self.blocked_hosts.iter().any(|blocked| {
            hostname == blocked
                || hostname
                    .strip_suffix(blocked.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        });
        if listed {
            return Err(reject(url, format!("host {} is blocked", hostname)));
        }
        Ok(())
    }
}
