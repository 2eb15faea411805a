// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Plain HTTP with address pinning and hand-followed redirects

use std::time::Duration;

use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, Response};
use tracing::{debug, info};
use url::Host;

use super::guard::{SafeUrl, UrlGuard};
use crate::errors::{ExtractError, Result};

/// What a HEAD (or body-less GET) said about a URL
#[derive(Debug, Clone)]
pub struct Probe {
    pub final_url: SafeUrl,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub disposition_name: Option<String>,
}

impl Probe {
    /// Media type without parameters, lowercase
    pub fn mime(&self) -> Option<String> {
        self.content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
            .filter(|ct| !ct.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct Downloaded {
    pub final_url: SafeUrl,
    pub content_type: Option<String>,
    pub disposition_name: Option<String>,
    pub bytes: Vec<u8>,
}

fn transient(url: &SafeUrl, e: reqwest::Error) -> ExtractError {
    if e.is_timeout() {
        ExtractError::TransientIo(format!("timed out fetching {}", url.hostname))
    } else {
        ExtractError::TransientIo(format!("request to {} failed: {}", url.hostname, e))
    }
}

/// Builds one client per hop, pinned to that hop's validated addresses
#[derive(Debug, Clone)]
pub struct PinnedHttp {
    user_agent: String,
    timeout: Duration,
}

impl PinnedHttp {
    pub fn new(user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            user_agent: user_agent.into(),
            timeout,
        }
    }

    /// Same client settings with a per-request timeout
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            user_agent: self.user_agent.clone(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn client_for(&self, target: &SafeUrl) -> Result<Client> {
        let mut builder = Client::builder()
            .redirect(Policy::none())
            .no_proxy()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .user_agent(self.user_agent.as_str());
        if let Some(Host::Domain(_)) = target.url.host() {
            builder = builder.resolve_to_addrs(&target.hostname, &target.socket_addrs());
        }
        builder
            .build()
            .map_err(|e| ExtractError::Internal(format!("http client: {}", e)))
    }

    /// Send `method`, following up to `max_redirects` validated hops
    pub async fn send(
        &self,
        guard: &UrlGuard,
        start: SafeUrl,
        method: Method,
        max_redirects: usize,
    ) -> Result<(SafeUrl, Response)> {
        let mut current = start;
        let mut hops = 0usize;
        loop {
            let client = self.client_for(&current)?;
            let response = client
                .request(method.clone(), current.url.clone())
                .send()
                .await
                .map_err(|e| transient(&current, e))?;

            if !response.status().is_redirection() {
                return Ok((current, response));
            }
            let Some(location) = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
            else {
                return Ok((current, response));
            };
            hops += 1;
            if hops > max_redirects {
                return Err(ExtractError::TransientIo(format!(
                    "more than {} redirects",
                    max_redirects
                )));
            }
            debug!(from = %current.url, to = %location, hop = hops, "following redirect");
            current = guard.next_hop(&current, &location).await?;
        }
    }

    /// HEAD first; a streamed GET with the body discarded when HEAD fails
    pub async fn probe(&self, guard: &UrlGuard, start: SafeUrl, max_redirects: usize) -> Result<Probe> {
        match self.send(guard, start.clone(), Method::HEAD, max_redirects).await {
            Ok((final_url, response)) if response.status().is_success() => {
                return Ok(probe_from(final_url, &response));
            }
            Ok((_, response)) => {
                debug!(status = %response.status(), "HEAD refused, probing with GET");
            }
            Err(ExtractError::TransientIo(reason)) => {
                debug!(reason = %reason, "HEAD failed, probing with GET");
            }
            Err(e) => return Err(e),
        }

        let (final_url, response) = self.send(guard, start, Method::GET, max_redirects).await?;
        ensure_success(&final_url, &response)?;
        let probe = probe_from(final_url, &response);
        drop(response);
        Ok(probe)
    }

    /// GET the body, refusing anything larger than `max_bytes`
    pub async fn download(
        &self,
        guard: &UrlGuard,
        start: SafeUrl,
        max_redirects: usize,
        max_bytes: u64,
    ) -> Result<Downloaded> {
        let (final_url, mut response) = self.send(guard, start, Method::GET, max_redirects).await?;
        ensure_success(&final_url, &response)?;
        if let Some(length) = header_u64(&response, CONTENT_LENGTH) {
            if length > max_bytes {
                return Err(ExtractError::PolicyViolation(format!(
                    "remote file is {} bytes, limit is {}",
                    length, max_bytes
                )));
            }
        }
        let content_type = header_string(&response, CONTENT_TYPE);
        let disposition_name =
            header_string(&response, CONTENT_DISPOSITION).and_then(|v| disposition_filename(&v));

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| transient(&final_url, e))? {
            if bytes.len() as u64 + chunk.len() as u64 > max_bytes {
                return Err(ExtractError::PolicyViolation(format!(
                    "remote file exceeds limit of {} bytes",
                    max_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }
        info!(url = %final_url.url, bytes = bytes.len(), "downloaded");

        Ok(Downloaded {
            final_url,
            content_type,
            disposition_name,
            bytes,
        })
    }
}

fn ensure_success(url: &SafeUrl, response: &Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(ExtractError::TransientIo(format!(
            "{} returned HTTP {}",
            url.hostname,
            status.as_u16()
        )))
    }
}

fn header_string(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn header_u64(response: &Response, name: reqwest::header::HeaderName) -> Option<u64> {
    header_string(response, name).and_then(|v| v.trim().parse().ok())
}

fn probe_from(final_url: SafeUrl, response: &Response) -> Probe {
    Probe {
        content_type: header_string(response, CONTENT_TYPE),
        content_length: header_u64(response, CONTENT_LENGTH),
        disposition_name: header_string(response, CONTENT_DISPOSITION)
            .and_then(|v| disposition_filename(&v)),
        final_url,
    }
}

/// `filename` parameter of a Content-Disposition header
pub fn disposition_filename(header: &str) -> Option<String> {
    header.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let value = value.trim().trim_matches('"').trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}
