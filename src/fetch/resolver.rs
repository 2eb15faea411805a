// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Hostname resolution behind a trait so the guard can be tested offline

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use hickory_resolver::config::{LookupIpStrategy, ResolverConfig, ResolverOpts};
use hickory_resolver::system_conf::read_system_conf;
use hickory_resolver::TokioAsyncResolver;
use tracing::{debug, warn};

use crate::errors::{ExtractError, Result};

/// Resolves a hostname to every address it has, both families
#[async_trait]
pub trait HostResolver: Send + Sync + std::fmt::Debug {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>>;
}

/// System DNS configuration through hickory
pub struct HickoryResolver {
    inner: TokioAsyncResolver,
}

impl std::fmt::Debug for HickoryResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HickoryResolver").finish_non_exhaustive()
    }
}

impl HickoryResolver {
    /// Use `/etc/resolv.conf`, falling back to public defaults when unreadable
    pub fn from_system() -> Self {
        let (config, opts) = read_system_conf().unwrap_or_else(|e| {
            warn!(error = %e, "system resolver config unreadable, using defaults");
            (ResolverConfig::default(), ResolverOpts::default())
        });
        Self {
            inner: TokioAsyncResolver::tokio(config, both_families(opts)),
        }
    }
}

/// Query A and AAAA together; hickory's default stops at A when it exists
fn both_families(mut opts: ResolverOpts) -> ResolverOpts {
    opts.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
    opts
}

#[async_trait]
impl HostResolver for HickoryResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        let lookup = self.inner.lookup_ip(host).await.map_err(|e| {
            debug!(host = %host, error = %e, "dns lookup failed");
            ExtractError::SecurityRejection(format!("could not resolve host {}", host))
        })?;
        let addrs: Vec<IpAddr> = lookup.iter().collect();
        if addrs.is_empty() {
            return Err(ExtractError::SecurityRejection(format!(
                "host {} has no addresses",
                host
            )));
        }
        Ok(addrs)
    }
}

/// Fixed answers; unknown hosts fail like an NXDOMAIN
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    entries: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, host: &str, addrs: &[IpAddr]) -> Self {
        self.entries.insert(host.to_ascii_lowercase(), addrs.to_vec());
        self
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        self.entries
            .get(&host.to_ascii_lowercase())
            .filter(|addrs| !addrs.is_empty())
            .cloned()
            .ok_or_else(|| ExtractError::SecurityRejection(format!("could not resolve host {}", host)))
    }
}
